//! The download manager.
//!
//! [`DownloadManager`] owns every download record of one browsing session and
//! is only ever touched from its owner task. Collaborators never call back
//! into it directly; their replies arrive as [`ManagerEvent`]s on the inbox
//! returned by [`DownloadManager::new`], and the owner feeds them to
//! [`DownloadManager::handle_event`].
//!
//! Records live in one master map keyed by [`DownloadId`]. Four indices refer
//! into it:
//!
//! | index         | contents                                              |
//! |---------------|-------------------------------------------------------|
//! | `active`      | records not yet complete, cancelled or interrupted    |
//! | `in_progress` | active records with a path, not yet completing        |
//! | `history`     | records with a valid history handle, keyed by handle  |
//! | `save_page`   | records created by save-page-as                       |
//!
//! A record with no index entry is removed from the master map.

mod consistency;
mod history;
mod path_stage;
mod queries;
mod removal;
mod shutdown;
mod transfer;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::config::ManagerConfig;
use crate::error::{ManagerError, ManagerResult};
use crate::executor::{EventReceiver, EventSender, IoContext, Mailbox, ManagerEvent};
use crate::gateway::{FileChooser, FilePlacement, HistoryStore, SafetyClassifier};
use crate::item::{CreateInfo, DbHandle, DownloadId, DownloadItem};
use crate::observer::{DownloadObserver, ObserverId, ObserverList};

pub use consistency::ConsistencyError;
pub use queries::ProgressSummary;

use history::DownloadHistory;

/// External components the manager drives.
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn SafetyClassifier>,
    pub history: Arc<dyn HistoryStore>,
    pub placement: Arc<dyn FilePlacement>,
    pub chooser: Arc<dyn FileChooser>,
    /// Where file-system probes and deletions run.
    pub io: Arc<dyn IoContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    ShutDown,
}

/// Owner of all download records for one session.
pub struct DownloadManager {
    config: ManagerConfig,
    classifier: Arc<dyn SafetyClassifier>,
    history: DownloadHistory,
    placement: Arc<dyn FilePlacement>,
    chooser: Arc<dyn FileChooser>,
    io: Arc<dyn IoContext>,
    mailbox: Mailbox,
    observers: ObserverList,
    lifecycle: Lifecycle,
    next_id: u32,

    downloads: BTreeMap<DownloadId, DownloadItem>,
    active: BTreeSet<DownloadId>,
    in_progress: BTreeSet<DownloadId>,
    history_index: BTreeMap<DbHandle, DownloadId>,
    save_page: BTreeSet<DownloadId>,
    /// Records discarded while their history entry was still being created.
    /// The entry is removed as soon as its handle arrives.
    orphaned_entries: BTreeSet<DownloadId>,

    /// Directory of the last file the user picked in a save prompt.
    last_download_path: Option<PathBuf>,
}

impl DownloadManager {
    /// Create a manager and the inbox its owner must drain.
    pub fn new(config: ManagerConfig, collaborators: Collaborators) -> (Self, EventReceiver) {
        let (mailbox, receiver) = Mailbox::new();
        let history = DownloadHistory::new(collaborators.history, config.off_the_record);
        let manager = Self {
            config,
            classifier: collaborators.classifier,
            history,
            placement: collaborators.placement,
            chooser: collaborators.chooser,
            io: collaborators.io,
            mailbox,
            observers: ObserverList::new(),
            lifecycle: Lifecycle::Created,
            next_id: 0,
            downloads: BTreeMap::new(),
            active: BTreeSet::new(),
            in_progress: BTreeSet::new(),
            history_index: BTreeMap::new(),
            save_page: BTreeSet::new(),
            orphaned_entries: BTreeSet::new(),
            last_download_path: None,
        };
        (manager, receiver)
    }

    /// Start the manager and request the persisted history.
    pub fn initialize(&mut self) -> ManagerResult<()> {
        match self.lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Running => return Err(ManagerError::AlreadyInitialized),
            Lifecycle::ShutDown => return Err(ManagerError::ShutDown),
        }
        self.lifecycle = Lifecycle::Running;
        info!(
            off_the_record = self.config.off_the_record,
            download_dir = %self.config.prefs.download_dir.display(),
            "Download manager initialized"
        );
        self.history
            .load(self.mailbox.reply(ManagerEvent::HistoryLoaded));
        Ok(())
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn is_off_the_record(&self) -> bool {
        self.config.off_the_record
    }

    pub fn is_shut_down(&self) -> bool {
        self.lifecycle == Lifecycle::ShutDown
    }

    /// Allocate an id for a new download. Ids are never reused.
    pub fn next_download_id(&mut self) -> DownloadId {
        let id = DownloadId(self.next_id);
        self.next_id += 1;
        id
    }

    /// A sender for network-layer events.
    pub fn event_sender(&self) -> EventSender {
        self.mailbox.sender()
    }

    pub fn observers(&self) -> &ObserverList {
        &self.observers
    }

    /// Register an observer; it immediately receives one `model_changed`.
    pub fn add_observer(&self, observer: Arc<dyn DownloadObserver>) -> ObserverId {
        self.observers.add(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    /// Register a new download announced by the network layer.
    ///
    /// The record starts active but not in progress: it has no path yet.
    pub fn create_download(&mut self, info: CreateInfo) -> ManagerResult<DownloadId> {
        if self.is_shut_down() {
            return Err(ManagerError::ShutDown);
        }
        let id = info.id;
        if self.downloads.contains_key(&id) {
            return Err(ManagerError::DuplicateId(id));
        }
        if id.0 >= self.next_id {
            self.next_id = id.0.saturating_add(1);
        }

        let item = DownloadItem::new(info, self.config.off_the_record);
        debug!(download_id = %id, url = %item.url(), "Download created");
        self.downloads.insert(id, item);
        self.active.insert(id);
        Ok(id)
    }

    /// Dispatch one inbox event. Events arriving after shutdown are dropped.
    pub fn handle_event(&mut self, event: ManagerEvent) {
        if self.is_shut_down() {
            trace!(event = event.name(), "Ignoring event after shutdown");
            return;
        }
        trace!(event = event.name(), "Handling event");

        match event {
            ManagerEvent::DownloadCreated(info) => {
                if let Err(e) = self.create_download(info) {
                    warn!(error = %e, "Rejected new download");
                }
            }
            ManagerEvent::StartDownload(id) => self.start_download(id),
            ManagerEvent::Progress { id, received_bytes } => {
                self.update_download(id, received_bytes)
            }
            ManagerEvent::ResponseCompleted {
                id,
                size,
                status,
                hash,
            } => self.on_response_completed(id, size, status, hash),
            ManagerEvent::Cancelled(id) => self.download_cancelled(id),
            ManagerEvent::HistoryLoaded(entries) => self.on_history_loaded(entries),
            ManagerEvent::UrlChecked { id, is_dangerous } => self.on_url_checked(id, is_dangerous),
            ManagerEvent::ReferrerChecked { id, visited_before } => {
                self.on_referrer_checked(id, visited_before)
            }
            ManagerEvent::PathResolved { id, decision } => self.on_path_resolved(id, decision),
            ManagerEvent::FileChosen { id, path } => match path {
                Some(path) => self.file_selected(id, path),
                None => self.file_selection_canceled(id),
            },
            ManagerEvent::EntryCreated { id, handle } => self.on_entry_created(id, handle),
            ManagerEvent::HashChecked { id, is_dangerous } => {
                self.on_hash_checked(id, is_dangerous)
            }
            ManagerEvent::RenamedToFinal { id, name } => self.on_renamed_to_final(id, name),
            ManagerEvent::FinalRenameFailed { id, error } => self.on_final_rename_failed(id, &error),
            ManagerEvent::FileRemovalDetected { handle } => self.on_file_removal_detected(handle),
            ManagerEvent::Run(task) => task.run(self),
        }
    }

    /// Handle every event currently queued in `receiver` without waiting.
    ///
    /// Returns the number of events handled.
    pub fn drain(&mut self, receiver: &mut EventReceiver) -> usize {
        let mut handled = 0;
        while let Ok(event) = receiver.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    // -------------------------------------------------------------------------
    // Index helpers shared by the stages
    // -------------------------------------------------------------------------

    /// The record for `id` if it is still active.
    fn active_item(&self, id: DownloadId) -> Option<&DownloadItem> {
        if !self.active.contains(&id) {
            return None;
        }
        self.downloads.get(&id)
    }

    fn active_item_mut(&mut self, id: DownloadId) -> Option<&mut DownloadItem> {
        if !self.active.contains(&id) {
            return None;
        }
        self.downloads.get_mut(&id)
    }

    /// Drop `id` from every index and the master map.
    fn forget(&mut self, id: DownloadId) -> Option<DownloadItem> {
        self.active.remove(&id);
        self.in_progress.remove(&id);
        self.save_page.remove(&id);
        let item = self.downloads.remove(&id)?;
        if item.db_handle().is_valid() {
            self.history_index.remove(&item.db_handle());
        }
        Some(item)
    }
}
