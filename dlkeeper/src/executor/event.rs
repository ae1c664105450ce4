//! Events delivered to the manager's owner task.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::gateway::history::HistoryEntry;
use crate::gateway::placement::FinalName;
use crate::item::{CreateInfo, DbHandle, DownloadId, TransferStatus};
use crate::manager::DownloadManager;
use crate::path::PathDecision;

/// A closure run on the owner task with exclusive access to the manager.
pub struct OwnerTask {
    name: &'static str,
    run: Box<dyn FnOnce(&mut DownloadManager) + Send>,
}

impl OwnerTask {
    pub fn new<F>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(&mut DownloadManager) + Send + 'static,
    {
        Self {
            name,
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn run(self, manager: &mut DownloadManager) {
        (self.run)(manager)
    }
}

impl fmt::Debug for OwnerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerTask").field("name", &self.name).finish()
    }
}

/// Everything that can happen to the manager.
///
/// Network-layer signals and collaborator replies share one inbox so that
/// the owner task observes them in a single, arrival-ordered stream.
#[derive(Debug)]
pub enum ManagerEvent {
    // Network layer
    DownloadCreated(CreateInfo),
    StartDownload(DownloadId),
    Progress {
        id: DownloadId,
        received_bytes: u64,
    },
    ResponseCompleted {
        id: DownloadId,
        size: u64,
        status: TransferStatus,
        hash: Option<String>,
    },
    Cancelled(DownloadId),

    // Collaborator replies
    HistoryLoaded(Vec<HistoryEntry>),
    UrlChecked {
        id: DownloadId,
        is_dangerous: bool,
    },
    ReferrerChecked {
        id: DownloadId,
        visited_before: bool,
    },
    PathResolved {
        id: DownloadId,
        decision: PathDecision,
    },
    FileChosen {
        id: DownloadId,
        path: Option<PathBuf>,
    },
    EntryCreated {
        id: DownloadId,
        handle: DbHandle,
    },
    HashChecked {
        id: DownloadId,
        is_dangerous: bool,
    },
    RenamedToFinal {
        id: DownloadId,
        name: FinalName,
    },
    FinalRenameFailed {
        id: DownloadId,
        error: io::Error,
    },
    FileRemovalDetected {
        handle: DbHandle,
    },

    /// Arbitrary owner-context work.
    Run(OwnerTask),
}

impl ManagerEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DownloadCreated(_) => "download_created",
            Self::StartDownload(_) => "start_download",
            Self::Progress { .. } => "progress",
            Self::ResponseCompleted { .. } => "response_completed",
            Self::Cancelled(_) => "cancelled",
            Self::HistoryLoaded(_) => "history_loaded",
            Self::UrlChecked { .. } => "url_checked",
            Self::ReferrerChecked { .. } => "referrer_checked",
            Self::PathResolved { .. } => "path_resolved",
            Self::FileChosen { .. } => "file_chosen",
            Self::EntryCreated { .. } => "entry_created",
            Self::HashChecked { .. } => "hash_checked",
            Self::RenamedToFinal { .. } => "renamed_to_final",
            Self::FinalRenameFailed { .. } => "final_rename_failed",
            Self::FileRemovalDetected { .. } => "file_removal_detected",
            Self::Run(task) => task.name(),
        }
    }
}
