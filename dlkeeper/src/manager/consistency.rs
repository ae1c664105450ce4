//! Structural checks over the manager's indices.

use thiserror::Error;

use super::DownloadManager;
use crate::item::{DbHandle, DownloadId, DownloadState};

/// A broken relationship between the master map and an index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    #[error("{index} index refers to unknown download {id}")]
    Dangling { index: &'static str, id: DownloadId },

    #[error("download {0} is not referenced by any index")]
    Orphan(DownloadId),

    #[error("history handle {handle} maps to download {id} which has another handle")]
    HandleMismatch { handle: DbHandle, id: DownloadId },

    #[error("download {id} has handle {handle} but is missing from the history index")]
    MissingHistory { id: DownloadId, handle: DbHandle },

    #[error("download {0} is being removed but still owned")]
    RemovingOwned(DownloadId),

    #[error("download {0} is in progress but not active")]
    InactiveInProgress(DownloadId),

    #[error("download {0} is finished but still active")]
    StaleActive(DownloadId),

    #[error("download {id} in_progress membership should be {expected}")]
    InProgressMismatch { id: DownloadId, expected: bool },
}

impl DownloadManager {
    /// Verify the index invariants. Returns the first violation found.
    pub fn check_consistency(&self) -> Result<(), ConsistencyError> {
        let sets = [
            ("active", &self.active),
            ("in_progress", &self.in_progress),
            ("save_page", &self.save_page),
        ];
        for (index, ids) in sets {
            if let Some(&id) = ids.iter().find(|id| !self.downloads.contains_key(*id)) {
                return Err(ConsistencyError::Dangling { index, id });
            }
        }

        for (&handle, &id) in &self.history_index {
            let Some(item) = self.downloads.get(&id) else {
                return Err(ConsistencyError::Dangling { index: "history", id });
            };
            if item.db_handle() != handle {
                return Err(ConsistencyError::HandleMismatch { handle, id });
            }
        }

        if let Some(&id) = self.in_progress.iter().find(|id| !self.active.contains(*id)) {
            return Err(ConsistencyError::InactiveInProgress(id));
        }

        for (&id, item) in &self.downloads {
            let handle = item.db_handle();
            let active = self.active.contains(&id);
            let save_page = self.save_page.contains(&id);
            let in_history = handle.is_valid() && self.history_index.contains_key(&handle);

            if item.state() == DownloadState::Removing {
                return Err(ConsistencyError::RemovingOwned(id));
            }
            if !active && !save_page && !in_history {
                return Err(ConsistencyError::Orphan(id));
            }
            if handle.is_valid() && !in_history {
                return Err(ConsistencyError::MissingHistory { id, handle });
            }
            if item.is_in_progress() && !active && !save_page {
                return Err(ConsistencyError::InactiveInProgress(id));
            }

            // Stopped before its history entry existed; cleaned up when the
            // handle arrives.
            let deferred = item.is_terminal() && !handle.is_valid() && item.full_path().is_some();
            if item.is_terminal() && active && !deferred {
                return Err(ConsistencyError::StaleActive(id));
            }

            let expected = !save_page
                && (deferred
                    || (item.is_in_progress()
                        && item.full_path().is_some()
                        && !item.is_completing()));
            if self.in_progress.contains(&id) != expected {
                return Err(ConsistencyError::InProgressMismatch { id, expected });
            }
        }

        Ok(())
    }
}
