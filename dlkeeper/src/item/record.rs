//! The download record and its creation parameters.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::{DangerType, DbHandle, DownloadId, DownloadState, SafetyState};
use crate::gateway::history::HistoryEntry;
use crate::path::{PathDecision, Uniquifier};

/// Caller-supplied placement hints for a new download.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveInfo {
    /// Exact destination; bypasses filename generation, prompting and
    /// uniquification (drag-out and "save link to" flows).
    pub file_path: Option<PathBuf>,

    /// Explicit "Save As" request.
    pub prompt_for_save_location: bool,
}

/// Everything the network layer knows when it announces a new download.
#[derive(Debug, Clone)]
pub struct CreateInfo {
    /// Id obtained from [`crate::manager::DownloadManager::next_download_id`].
    pub id: DownloadId,
    /// Redirect chain; the last entry is the effective URL.
    pub url_chain: Vec<String>,
    pub referrer_url: String,
    pub mime_type: String,
    /// Raw `Content-Disposition` header value, if any.
    pub content_disposition: String,
    /// Filename suggested by the page (e.g. the `download` attribute).
    pub suggested_filename: String,
    /// Expected size; `None` when the server did not say.
    pub total_bytes: Option<u64>,
    pub start_time: DateTime<Utc>,
    pub save_info: SaveInfo,
    pub has_user_gesture: bool,
    /// Temporary downloads (drag-and-drop, helper apps) stay out of listings.
    pub is_temporary: bool,
}

impl CreateInfo {
    /// Create the parameters for a plain download of `url`.
    pub fn new(id: DownloadId, url: impl Into<String>) -> Self {
        Self {
            id,
            url_chain: vec![url.into()],
            referrer_url: String::new(),
            mime_type: String::new(),
            content_disposition: String::new(),
            suggested_filename: String::new(),
            total_bytes: None,
            start_time: Utc::now(),
            save_info: SaveInfo::default(),
            has_user_gesture: false,
            is_temporary: false,
        }
    }

    /// Append a redirect target to the URL chain.
    pub fn with_redirect(mut self, url: impl Into<String>) -> Self {
        self.url_chain.push(url.into());
        self
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer_url = referrer.into();
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_content_disposition(mut self, value: impl Into<String>) -> Self {
        self.content_disposition = value.into();
        self
    }

    pub fn with_suggested_filename(mut self, name: impl Into<String>) -> Self {
        self.suggested_filename = name.into();
        self
    }

    pub fn with_total_bytes(mut self, total: u64) -> Self {
        self.total_bytes = Some(total);
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    /// Force the destination path.
    pub fn with_forced_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_info.file_path = Some(path.into());
        self
    }

    /// Request a "Save As" prompt regardless of preferences.
    pub fn with_save_as(mut self) -> Self {
        self.save_info.prompt_for_save_location = true;
        self
    }

    pub fn with_user_gesture(mut self, gesture: bool) -> Self {
        self.has_user_gesture = gesture;
        self
    }

    pub fn temporary(mut self) -> Self {
        self.is_temporary = true;
        self
    }
}

/// The mutable state of one download.
///
/// Mutators only change the record itself; keeping the manager's indices in
/// step with the record is the manager's job.
#[derive(Debug, Clone)]
pub struct DownloadItem {
    id: DownloadId,
    db_handle: DbHandle,

    url_chain: Vec<String>,
    referrer_url: String,
    mime_type: String,
    content_disposition: String,
    suggested_filename: String,

    /// Working path. `None` until a save location is determined.
    full_path: Option<PathBuf>,
    path_uniquifier: u32,
    path_decision: PathDecision,

    received_bytes: u64,
    total_bytes: Option<u64>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,

    state: DownloadState,
    safety_state: SafetyState,
    danger_type: DangerType,
    interrupt_reason: Option<i32>,
    hash: Option<String>,

    all_data_saved: bool,
    completing: bool,
    is_temporary: bool,
    is_otr: bool,
    file_externally_removed: bool,
    opened: bool,
}

impl DownloadItem {
    /// Create a new in-progress record from network-layer parameters.
    pub fn new(info: CreateInfo, is_otr: bool) -> Self {
        let path_decision = PathDecision {
            force_path: info.save_info.file_path.clone(),
            prompt_user_for_save_location: info.save_info.prompt_for_save_location,
            has_user_gesture: info.has_user_gesture,
            ..PathDecision::default()
        };

        Self {
            id: info.id,
            db_handle: DbHandle::UNINITIALIZED,
            url_chain: info.url_chain,
            referrer_url: info.referrer_url,
            mime_type: info.mime_type,
            content_disposition: info.content_disposition,
            suggested_filename: info.suggested_filename,
            full_path: None,
            path_uniquifier: 0,
            path_decision,
            received_bytes: 0,
            total_bytes: info.total_bytes,
            start_time: info.start_time,
            end_time: None,
            state: DownloadState::InProgress,
            safety_state: SafetyState::Safe,
            danger_type: DangerType::NotDangerous,
            interrupt_reason: None,
            hash: None,
            all_data_saved: false,
            completing: false,
            is_temporary: info.is_temporary,
            is_otr,
            file_externally_removed: false,
            opened: false,
        }
    }

    /// Rebuild a record from a persisted history entry.
    ///
    /// Entries persisted while still in progress come back cancelled: the
    /// transfer they belonged to died with the previous session.
    pub fn from_history(id: DownloadId, entry: &HistoryEntry) -> Self {
        let state = match entry.state {
            DownloadState::InProgress | DownloadState::Removing => DownloadState::Cancelled,
            other => other,
        };

        Self {
            id,
            db_handle: entry.handle,
            url_chain: vec![entry.url.clone()],
            referrer_url: entry.referrer_url.clone(),
            mime_type: String::new(),
            content_disposition: String::new(),
            suggested_filename: String::new(),
            full_path: Some(entry.path.clone()),
            path_uniquifier: 0,
            path_decision: PathDecision::default(),
            received_bytes: entry.received_bytes,
            total_bytes: entry.total_bytes,
            start_time: entry.start_time,
            end_time: entry.end_time,
            state,
            safety_state: SafetyState::Safe,
            danger_type: DangerType::NotDangerous,
            interrupt_reason: None,
            hash: None,
            all_data_saved: state == DownloadState::Complete,
            completing: false,
            is_temporary: false,
            is_otr: false,
            file_externally_removed: false,
            opened: entry.opened,
        }
    }

    /// Snapshot of the persisted fields.
    pub fn to_history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            handle: self.db_handle,
            url: self.url().to_string(),
            referrer_url: self.referrer_url.clone(),
            path: self.target_path().unwrap_or_default(),
            start_time: self.start_time,
            end_time: self.end_time,
            received_bytes: self.received_bytes,
            total_bytes: self.total_bytes,
            state: self.state,
            opened: self.opened,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn id(&self) -> DownloadId {
        self.id
    }

    pub fn db_handle(&self) -> DbHandle {
        self.db_handle
    }

    /// The effective URL (last entry of the redirect chain).
    pub fn url(&self) -> &str {
        self.url_chain.last().map(String::as_str).unwrap_or("")
    }

    pub fn url_chain(&self) -> &[String] {
        &self.url_chain
    }

    pub fn referrer_url(&self) -> &str {
        &self.referrer_url
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn content_disposition(&self) -> &str {
        &self.content_disposition
    }

    pub fn suggested_filename(&self) -> &str {
        &self.suggested_filename
    }

    /// Current on-disk location (intermediate name while incomplete).
    pub fn full_path(&self) -> Option<&Path> {
        self.full_path.as_deref()
    }

    /// Where the file will live once complete.
    ///
    /// For dangerous downloads parked under an obfuscated name this is the
    /// real name in the same directory.
    pub fn target_path(&self) -> Option<PathBuf> {
        let full_path = self.full_path.as_deref()?;
        match &self.path_decision.target_name {
            Some(name) => Some(full_path.with_file_name(name)),
            None => Some(full_path.to_path_buf()),
        }
    }

    /// Path proposed by path resolution (before any user choice).
    pub fn suggested_path(&self) -> &Path {
        &self.path_decision.suggested_path
    }

    pub fn path_decision(&self) -> &PathDecision {
        &self.path_decision
    }

    pub fn path_uniquifier(&self) -> u32 {
        self.path_uniquifier
    }

    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// Expected size, `None` when unknown.
    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn safety_state(&self) -> SafetyState {
        self.safety_state
    }

    pub fn danger_type(&self) -> DangerType {
        self.danger_type
    }

    /// Transport error code for interrupted downloads.
    pub fn interrupt_reason(&self) -> Option<i32> {
        self.interrupt_reason
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    pub fn all_data_saved(&self) -> bool {
        self.all_data_saved
    }

    /// True between the completion gate and the final rename.
    pub fn is_completing(&self) -> bool {
        self.completing
    }

    pub fn is_temporary(&self) -> bool {
        self.is_temporary
    }

    pub fn is_extension_install(&self) -> bool {
        self.path_decision.is_extension_install
    }

    pub fn is_otr(&self) -> bool {
        self.is_otr
    }

    pub fn file_externally_removed(&self) -> bool {
        self.file_externally_removed
    }

    pub fn opened(&self) -> bool {
        self.opened
    }

    pub fn prompt_user_for_save_location(&self) -> bool {
        self.path_decision.prompt_user_for_save_location
    }

    pub fn is_in_progress(&self) -> bool {
        self.state == DownloadState::InProgress
    }

    /// Still receiving bytes (or waiting to).
    pub fn is_partial(&self) -> bool {
        self.state == DownloadState::InProgress
    }

    pub fn is_complete(&self) -> bool {
        self.state == DownloadState::Complete
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == DownloadState::Cancelled
    }

    pub fn is_interrupted(&self) -> bool {
        self.state == DownloadState::Interrupted
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Flagged dangerous by either the file type or the classifier.
    pub fn is_dangerous(&self) -> bool {
        self.path_decision.is_dangerous()
    }

    /// Dangerous bytes the user never accepted; they must not outlive the
    /// record.
    pub fn needs_discard(&self) -> bool {
        self.safety_state == SafetyState::Dangerous
            && !self.is_complete()
            && !self.file_externally_removed
    }

    /// Case-insensitive match against the URL and file names.
    ///
    /// `query_lower` must already be lower-cased; an empty query matches
    /// everything.
    pub fn matches_query(&self, query_lower: &str) -> bool {
        if query_lower.is_empty() {
            return true;
        }
        if self.url().to_lowercase().contains(query_lower) {
            return true;
        }
        let names = [self.target_path(), self.full_path.clone()];
        names.iter().flatten().any(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().to_lowercase().contains(query_lower))
                .unwrap_or(false)
        })
    }

    // -------------------------------------------------------------------------
    // Mutators
    // -------------------------------------------------------------------------

    pub(crate) fn set_db_handle(&mut self, handle: DbHandle) {
        self.db_handle = handle;
    }

    /// The classifier flagged the URL.
    pub(crate) fn mark_url_dangerous(&mut self) {
        self.path_decision.is_dangerous_url = true;
        self.danger_type = DangerType::DangerousUrl;
        self.safety_state = SafetyState::Dangerous;
    }

    /// Merge the outcome of path resolution.
    pub(crate) fn set_file_check_results(&mut self, decision: PathDecision) {
        self.path_decision = decision;
        if let Uniquifier::Applied(n) = self.path_decision.uniquifier {
            self.path_uniquifier = n;
        }
        if self.path_decision.is_dangerous() {
            self.safety_state = SafetyState::Dangerous;
            self.danger_type = if self.path_decision.is_dangerous_url {
                DangerType::DangerousUrl
            } else {
                DangerType::DangerousFile
            };
        }
    }

    /// Record the working path chosen for this download.
    pub(crate) fn on_path_determined(&mut self, path: PathBuf) {
        if self.path_decision.target_name.is_none() {
            self.path_decision.target_name = path.file_name().map(PathBuf::from);
        }
        self.full_path = Some(path);
    }

    /// The bytes now live at `path` (intermediate name).
    pub(crate) fn rename(&mut self, path: PathBuf) {
        self.full_path = Some(path);
    }

    pub(crate) fn update(&mut self, received_bytes: u64) {
        self.received_bytes = received_bytes;
    }

    pub(crate) fn on_all_data_saved(&mut self, size: u64, hash: Option<String>) {
        self.all_data_saved = true;
        self.received_bytes = size;
        self.hash = hash;
    }

    /// Enter the completing phase.
    ///
    /// Returns the final target and whether the placement layer must find a
    /// unique name for it. Only downloads parked under an obfuscated name
    /// (dangerous, since validated) were not uniquified at resolution time.
    pub(crate) fn on_download_completing(&mut self) -> (PathBuf, bool) {
        self.completing = true;
        let target = self.target_path().unwrap_or_default();
        (target, self.safety_state == SafetyState::Validated)
    }

    pub(crate) fn on_renamed_to_final(&mut self, path: PathBuf, uniquifier: u32) {
        if uniquifier > 0 {
            self.path_uniquifier = uniquifier;
        }
        self.path_decision.target_name = path.file_name().map(PathBuf::from);
        self.full_path = Some(path);
    }

    /// Leave the completing phase as interrupted. Returns false if the
    /// record was not completing.
    pub(crate) fn final_rename_failed(&mut self, reason: i32) -> bool {
        if !self.completing {
            return false;
        }
        self.completing = false;
        self.interrupted(self.received_bytes, reason)
    }

    pub(crate) fn completed(&mut self) {
        self.completing = false;
        self.state = DownloadState::Complete;
        self.end_time = Some(Utc::now());
        if self.total_bytes.is_none() {
            self.total_bytes = Some(self.received_bytes);
        }
    }

    /// Returns false if the record was no longer partial.
    pub(crate) fn cancel(&mut self) -> bool {
        if !self.is_partial() {
            return false;
        }
        self.state = DownloadState::Cancelled;
        self.end_time = Some(Utc::now());
        true
    }

    /// Returns false if the record was no longer partial.
    pub(crate) fn interrupted(&mut self, size: u64, reason: i32) -> bool {
        if !self.is_partial() {
            return false;
        }
        self.received_bytes = size;
        self.interrupt_reason = Some(reason);
        self.state = DownloadState::Interrupted;
        self.end_time = Some(Utc::now());
        true
    }

    pub(crate) fn mark_validated(&mut self) {
        if self.safety_state == SafetyState::Dangerous {
            self.safety_state = SafetyState::Validated;
        }
    }

    pub(crate) fn on_downloaded_file_removed(&mut self) {
        self.file_externally_removed = true;
    }

    pub(crate) fn set_removing(&mut self) {
        self.state = DownloadState::Removing;
    }
}

impl fmt::Display for DownloadItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DownloadItem{{id={} handle={} state={} safety={:?} received={} total={} path={} url={}}}",
            self.id,
            self.db_handle,
            self.state,
            self.safety_state,
            self.received_bytes,
            self.total_bytes
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".to_string()),
            self.full_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<none>".to_string()),
            self.url(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;


    fn new_item() -> DownloadItem {
        DownloadItem::new(
            CreateInfo::new(DownloadId(1), "https://example.com/files/Report.PDF")
                .with_total_bytes(100),
            false,
        )
    }

    #[test]
    fn test_new_item_is_in_progress_and_unpersisted() {
        let item = new_item();
        assert!(item.is_in_progress());
        assert!(item.is_partial());
        assert_eq!(item.db_handle(), DbHandle::UNINITIALIZED);
        assert!(item.full_path().is_none());
        assert_eq!(item.safety_state(), SafetyState::Safe);
    }

    #[test]
    fn test_url_is_last_of_chain() {
        let item = DownloadItem::new(
            CreateInfo::new(DownloadId(2), "http://a.test/redirect").with_redirect("http://b.test/f.zip"),
            false,
        );
        assert_eq!(item.url(), "http://b.test/f.zip");
        assert_eq!(item.url_chain().len(), 2);
    }

    #[test]
    fn test_cancel_only_from_partial() {
        let mut item = new_item();
        assert!(item.cancel());
        assert!(item.is_cancelled());
        assert!(item.end_time().is_some());
        assert!(!item.cancel());
        assert!(!item.interrupted(10, -3));
        assert!(item.is_cancelled());
    }

    #[test]
    fn test_interrupted_keeps_partial_bytes() {
        let mut item = new_item();
        item.update(40);
        assert!(item.interrupted(42, -21));
        assert_eq!(item.received_bytes(), 42);
        assert_eq!(item.interrupt_reason(), Some(-21));
        assert!(item.is_interrupted());
    }

    #[test]
    fn test_dangerous_target_path_uses_real_name() {
        let mut item = new_item();
        item.set_file_check_results(PathDecision {
            suggested_path: PathBuf::from("/dl/Unconfirmed 12.partial"),
            target_name: Some(PathBuf::from("setup.exe")),
            is_dangerous_file: true,
            ..PathDecision::default()
        });
        item.on_path_determined(PathBuf::from("/dl/Unconfirmed 12.partial"));

        assert_eq!(item.safety_state(), SafetyState::Dangerous);
        assert_eq!(item.danger_type(), DangerType::DangerousFile);
        assert_eq!(item.target_path(), Some(PathBuf::from("/dl/setup.exe")));
        assert!(item.needs_discard());
    }

    #[test]
    fn test_validated_download_requests_uniquify() {
        let mut item = new_item();
        item.mark_url_dangerous();
        item.on_path_determined(PathBuf::from("/dl/report.pdf"));
        item.mark_validated();
        let (target, uniquify) = item.on_download_completing();
        assert_eq!(target, PathBuf::from("/dl/report.pdf"));
        assert!(uniquify);
        assert!(item.is_completing());
    }

    #[test]
    fn test_uniquifier_recorded_from_decision() {
        let mut item = new_item();
        item.set_file_check_results(PathDecision {
            suggested_path: PathBuf::from("/dl/report (2).pdf"),
            uniquifier: Uniquifier::Applied(2),
            ..PathDecision::default()
        });
        assert_eq!(item.path_uniquifier(), 2);
    }

    #[test]
    fn test_failed_final_rename_interrupts_completing_record() {
        let mut item = new_item();
        item.on_path_determined(PathBuf::from("/dl/report.pdf"));
        assert!(!item.final_rename_failed(1), "not completing yet");

        item.on_all_data_saved(100, None);
        item.on_download_completing();
        assert!(item.final_rename_failed(1));
        assert!(!item.is_completing());
        assert_eq!(item.state(), DownloadState::Interrupted);
        assert_eq!(item.interrupt_reason(), Some(1));
        assert_eq!(item.received_bytes(), 100);
        assert!(item.end_time().is_some());
    }

    #[test]
    fn test_completed_fills_unknown_total() {
        let mut item = DownloadItem::new(CreateInfo::new(DownloadId(3), "http://x.test/a"), false);
        item.on_all_data_saved(512, None);
        item.completed();
        assert_eq!(item.total_bytes(), Some(512));
        assert!(item.is_complete());
        assert!(!item.needs_discard());
    }

    #[test]
    fn test_matches_query_is_case_insensitive_on_names() {
        let mut item = new_item();
        item.on_path_determined(PathBuf::from("/dl/Quarterly Report.pdf"));
        assert!(item.matches_query("quarterly"));
        assert!(item.matches_query("example.com"));
        assert!(item.matches_query(""));
        assert!(!item.matches_query("invoice"));
    }

    #[test]
    fn test_history_round_trip_cancels_unfinished() {
        let mut item = new_item();
        item.on_path_determined(PathBuf::from("/dl/report.pdf"));
        item.set_db_handle(DbHandle(9));
        item.update(10);

        let entry = item.to_history_entry();
        let restored = DownloadItem::from_history(DownloadId(50), &entry);

        assert_eq!(restored.db_handle(), DbHandle(9));
        assert_eq!(restored.full_path(), Some(Path::new("/dl/report.pdf")));
        assert_eq!(restored.received_bytes(), 10);
        assert!(restored.is_cancelled());
    }
}
