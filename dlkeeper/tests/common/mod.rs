//! Shared fixtures for the manager integration tests.
//!
//! Collaborators record what the manager asked of them and reply inline
//! unless told to hold. File-system work runs on a [`DeferredIoContext`], so
//! tests decide exactly when probes and deletions happen.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use dlkeeper::executor::DeferredIoContext;
use dlkeeper::gateway::{FileChooser, FilePlacement, FinalName, MemoryHistoryStore, SafetyClassifier};
use dlkeeper::{
    Collaborators, CreateInfo, DownloadId, DownloadItem, DownloadManager, DownloadObserver,
    DownloadPrefs, DownloadState, EventReceiver, ManagerConfig, Reply,
};

// ============================================================================
// Classifier
// ============================================================================

/// Flags URLs containing any configured marker and hashes in a set.
#[derive(Default)]
pub struct ScriptedClassifier {
    url_markers: Mutex<Vec<String>>,
    bad_hashes: Mutex<HashSet<String>>,
    pub hash_checks: Mutex<Vec<String>>,
}

impl ScriptedClassifier {
    pub fn flag_url(&self, marker: &str) {
        self.url_markers.lock().push(marker.to_string());
    }

    pub fn flag_hash(&self, hash: &str) {
        self.bad_hashes.lock().insert(hash.to_string());
    }
}

impl SafetyClassifier for ScriptedClassifier {
    fn check_url(&self, url_chain: &[String], _referrer: &str, reply: Reply<bool>) {
        let markers = self.url_markers.lock();
        let flagged = url_chain
            .iter()
            .any(|url| markers.iter().any(|m| url.contains(m.as_str())));
        reply.send(flagged);
    }

    fn check_hash(&self, hash: &str, reply: Reply<bool>) {
        self.hash_checks.lock().push(hash.to_string());
        reply.send(self.bad_hashes.lock().contains(hash));
    }
}

// ============================================================================
// Placement
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum PlacementCall {
    Intermediate(DownloadId, PathBuf),
    Final(DownloadId, PathBuf, bool),
    Cancel(DownloadId),
    Release(DownloadId),
    Shutdown,
}

/// Records directives. Final renames land on the requested target unless
/// held with [`RecordingPlacement::hold_final_renames`] or failed with
/// [`RecordingPlacement::fail_final_renames`].
#[derive(Default)]
pub struct RecordingPlacement {
    pub calls: Mutex<Vec<PlacementCall>>,
    hold: Mutex<bool>,
    fail: Mutex<bool>,
    held: Mutex<Vec<(DownloadId, PathBuf, Reply<io::Result<FinalName>>)>>,
}

impl RecordingPlacement {
    pub fn fail_final_renames(&self) {
        *self.fail.lock() = true;
    }

    pub fn hold_final_renames(&self) {
        *self.hold.lock() = true;
    }

    /// Complete every held final rename. Returns how many were released.
    pub fn release_final_renames(&self) -> usize {
        *self.hold.lock() = false;
        let held: Vec<_> = self.held.lock().drain(..).collect();
        let count = held.len();
        for (_, path, reply) in held {
            reply.send(Ok(FinalName { path, uniquifier: 0 }));
        }
        count
    }

    pub fn calls(&self) -> Vec<PlacementCall> {
        self.calls.lock().clone()
    }

    pub fn final_renames(&self) -> Vec<(DownloadId, PathBuf, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PlacementCall::Final(id, path, uniquify) => Some((id, path, uniquify)),
                _ => None,
            })
            .collect()
    }
}

impl FilePlacement for RecordingPlacement {
    fn rename_to_intermediate(&self, id: DownloadId, path: &Path) {
        self.calls
            .lock()
            .push(PlacementCall::Intermediate(id, path.to_path_buf()));
    }

    fn rename_to_final(
        &self,
        id: DownloadId,
        target: &Path,
        uniquify: bool,
        reply: Reply<io::Result<FinalName>>,
    ) {
        self.calls
            .lock()
            .push(PlacementCall::Final(id, target.to_path_buf(), uniquify));
        if *self.fail.lock() {
            reply.send(Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only")));
        } else if *self.hold.lock() {
            self.held.lock().push((id, target.to_path_buf(), reply));
        } else {
            reply.send(Ok(FinalName {
                path: target.to_path_buf(),
                uniquifier: 0,
            }));
        }
    }

    fn cancel(&self, id: DownloadId) {
        self.calls.lock().push(PlacementCall::Cancel(id));
    }

    fn complete_and_release(&self, id: DownloadId) {
        self.calls.lock().push(PlacementCall::Release(id));
    }

    fn manager_shutdown(&self) {
        self.calls.lock().push(PlacementCall::Shutdown);
    }
}

// ============================================================================
// Chooser
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ChooserAnswer {
    AcceptSuggested,
    Pick(PathBuf),
    Cancel,
}

/// Answers every prompt with the configured answer and records suggestions.
pub struct ScriptedChooser {
    answer: Mutex<ChooserAnswer>,
    pub suggestions: Mutex<Vec<PathBuf>>,
}

impl Default for ScriptedChooser {
    fn default() -> Self {
        Self {
            answer: Mutex::new(ChooserAnswer::AcceptSuggested),
            suggestions: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedChooser {
    pub fn answer_with(&self, answer: ChooserAnswer) {
        *self.answer.lock() = answer;
    }
}

impl FileChooser for ScriptedChooser {
    fn choose_path(&self, _id: DownloadId, suggested: &Path, reply: Reply<Option<PathBuf>>) {
        self.suggestions.lock().push(suggested.to_path_buf());
        let chosen = match self.answer.lock().clone() {
            ChooserAnswer::AcceptSuggested => Some(suggested.to_path_buf()),
            ChooserAnswer::Pick(path) => Some(path),
            ChooserAnswer::Cancel => None,
        };
        reply.send(chosen);
    }
}

// ============================================================================
// Observer
// ============================================================================

#[derive(Default)]
pub struct RecordingObserver {
    pub model_changes: Mutex<usize>,
    pub going_down: Mutex<usize>,
    pub choosers: Mutex<Vec<DownloadId>>,
    pub updates: Mutex<Vec<(DownloadId, DownloadState)>>,
}

impl DownloadObserver for RecordingObserver {
    fn model_changed(&self) {
        *self.model_changes.lock() += 1;
    }

    fn manager_going_down(&self) {
        *self.going_down.lock() += 1;
    }

    fn file_chooser_displayed(&self, id: DownloadId) {
        self.choosers.lock().push(id);
    }

    fn download_updated(&self, item: &DownloadItem) {
        self.updates.lock().push((item.id(), item.state()));
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub temp: TempDir,
    pub download_dir: PathBuf,
    pub io: Arc<DeferredIoContext>,
    pub history: Arc<MemoryHistoryStore>,
    pub classifier: Arc<ScriptedClassifier>,
    pub placement: Arc<RecordingPlacement>,
    pub chooser: Arc<ScriptedChooser>,
    pub observer: Arc<RecordingObserver>,
    pub manager: DownloadManager,
    pub rx: EventReceiver,
}

impl Harness {
    /// A running manager saving to `<temp>/downloads` without prompting.
    pub fn new() -> Self {
        Self::build(|config| config, Arc::new(MemoryHistoryStore::new()))
    }

    pub fn with_config(configure: impl FnOnce(ManagerConfig) -> ManagerConfig) -> Self {
        Self::build(configure, Arc::new(MemoryHistoryStore::new()))
    }

    pub fn with_history(history: Arc<MemoryHistoryStore>) -> Self {
        Self::build(|config| config, history)
    }

    pub fn build(
        configure: impl FnOnce(ManagerConfig) -> ManagerConfig,
        history: Arc<MemoryHistoryStore>,
    ) -> Self {
        let temp = TempDir::new().unwrap();
        let download_dir = temp.path().join("downloads");
        let config = configure(
            ManagerConfig::new()
                .with_prefs(DownloadPrefs::default().with_download_dir(&download_dir))
                .with_documents_dir(temp.path().join("documents")),
        );

        let io = Arc::new(DeferredIoContext::new());
        let classifier = Arc::new(ScriptedClassifier::default());
        let placement = Arc::new(RecordingPlacement::default());
        let chooser = Arc::new(ScriptedChooser::default());
        let observer = Arc::new(RecordingObserver::default());

        let collaborators = Collaborators {
            classifier: classifier.clone(),
            history: history.clone(),
            placement: placement.clone(),
            chooser: chooser.clone(),
            io: io.clone(),
        };
        let (mut manager, rx) = DownloadManager::new(config, collaborators);
        manager.add_observer(observer.clone());
        manager.initialize().unwrap();

        let mut harness = Self {
            temp,
            download_dir,
            io,
            history,
            classifier,
            placement,
            chooser,
            observer,
            manager,
            rx,
        };
        harness.pump();
        harness
    }

    /// Handle events and run I/O tasks until both queues are empty.
    pub fn pump(&mut self) {
        loop {
            let events = self.manager.drain(&mut self.rx);
            let tasks = self.io.run_pending();
            if events == 0 && tasks == 0 {
                break;
            }
        }
    }

    /// Handle queued events without running I/O tasks.
    pub fn drain_events(&mut self) -> usize {
        self.manager.drain(&mut self.rx)
    }

    /// Handle exactly one queued event. Returns false if none was queued.
    pub fn step(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(event) => {
                self.manager.handle_event(event);
                true
            }
            Err(_) => false,
        }
    }

    pub fn info(&mut self, url: &str) -> CreateInfo {
        let id = self.manager.next_download_id();
        CreateInfo::new(id, url).with_user_gesture(true)
    }

    /// Create a download, start it and pump until it settles.
    pub fn create_and_start(&mut self, url: &str) -> DownloadId {
        let info = self.info(url);
        self.start_with(info)
    }

    pub fn start_with(&mut self, info: CreateInfo) -> DownloadId {
        let id = self.manager.create_download(info).unwrap();
        self.manager.start_download(id);
        self.pump();
        id
    }

    pub fn item(&self, id: DownloadId) -> &DownloadItem {
        self.manager
            .get_download(id)
            .unwrap_or_else(|| panic!("download {id} not owned"))
    }

    pub fn assert_consistent(&self) {
        if let Err(e) = self.manager.check_consistency() {
            panic!("inconsistent manager: {e}");
        }
    }
}
