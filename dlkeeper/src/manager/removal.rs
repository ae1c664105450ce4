//! History loading, removal and save-page-as bookkeeping.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::DownloadManager;
use crate::error::{ManagerError, ManagerResult};
use crate::executor::{IoTask, ManagerEvent};
use crate::gateway::HistoryEntry;
use crate::item::{CreateInfo, DbHandle, DownloadId, DownloadItem};
use crate::path::resolver::delete_file;

impl DownloadManager {
    pub(super) fn on_history_loaded(&mut self, entries: Vec<HistoryEntry>) {
        let mut loaded = 0usize;
        for entry in entries {
            if !entry.handle.is_valid() || self.history_index.contains_key(&entry.handle) {
                warn!(handle = %entry.handle, "Skipping duplicate history entry");
                continue;
            }
            let id = self.next_download_id();
            let item = DownloadItem::from_history(id, &entry);
            if item.state() != entry.state {
                // Persist the cancellation of transfers that died with the
                // previous session.
                self.history.update_entry(&item);
            }
            self.history_index.insert(entry.handle, id);
            self.downloads.insert(id, item);
            loaded += 1;
        }
        info!(entries = loaded, "Download history loaded");
        self.observers.notify_model_changed();
        self.check_for_history_files_removal();
    }

    /// Probe every completed download's file and flag the ones deleted
    /// behind the manager's back.
    pub fn check_for_history_files_removal(&self) {
        for (&handle, id) in &self.history_index {
            let Some(item) = self.downloads.get(id) else {
                continue;
            };
            if !item.is_complete() || item.file_externally_removed() {
                continue;
            }
            let Some(path) = item.full_path().map(PathBuf::from) else {
                continue;
            };
            let reply = self
                .mailbox
                .reply(move |()| ManagerEvent::FileRemovalDetected { handle });
            self.io.post(IoTask::new("check_file_exists", move || {
                if !path.exists() {
                    reply.send(());
                }
            }));
        }
    }

    pub(super) fn on_file_removal_detected(&mut self, handle: DbHandle) {
        let Some(id) = self.history_index.get(&handle).copied() else {
            return;
        };
        let Some(item) = self.downloads.get_mut(&id) else {
            return;
        };
        debug!(download_id = %id, "Downloaded file removed externally");
        item.on_downloaded_file_removed();
        self.observers.notify_download_updated(item);
    }

    /// Remove one finished download from history.
    ///
    /// Returns `Ok(false)` when no record has `handle`.
    pub fn remove_download(&mut self, handle: DbHandle) -> ManagerResult<bool> {
        let Some(id) = self.history_index.get(&handle).copied() else {
            return Ok(false);
        };
        if self.is_removable(id) != Some(true) {
            return Err(ManagerError::StillActive(handle));
        }

        self.history.remove_entry(handle);
        self.drop_removed(id);
        self.observers.notify_model_changed();
        Ok(true)
    }

    /// Remove every finished download started in `[begin, end)`; `None`
    /// leaves the range open-ended. Returns the number removed.
    pub fn remove_downloads_between(
        &mut self,
        begin: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> usize {
        self.history.remove_entries_between(begin, end);

        let doomed: Vec<DownloadId> = self
            .history_index
            .values()
            .copied()
            .filter(|id| {
                self.downloads.get(id).is_some_and(|item| {
                    item.start_time() >= begin && end.map_or(true, |end| item.start_time() < end)
                })
            })
            .filter(|id| self.is_removable(*id) == Some(true))
            .collect();

        for &id in &doomed {
            self.drop_removed(id);
        }

        if !doomed.is_empty() {
            info!(count = doomed.len(), "Removed downloads from history");
            self.observers.notify_model_changed();
        }
        doomed.len()
    }

    pub fn remove_downloads_since(&mut self, begin: DateTime<Utc>) -> usize {
        self.remove_downloads_between(begin, None)
    }

    pub fn remove_all_downloads(&mut self) -> usize {
        self.remove_downloads_between(DateTime::<Utc>::MIN_UTC, None)
    }

    /// Terminal and out of the active set.
    fn is_removable(&self, id: DownloadId) -> Option<bool> {
        let item = self.downloads.get(&id)?;
        Some(item.is_terminal() && !self.active.contains(&id))
    }

    fn drop_removed(&mut self, id: DownloadId) {
        let Some(mut item) = self.forget(id) else {
            return;
        };
        if item.needs_discard() {
            if let Some(path) = item.full_path().map(PathBuf::from) {
                self.io.post(IoTask::new("delete_download", move || {
                    delete_file(&path);
                }));
            }
        }
        item.set_removing();
        debug!(download_id = %id, "Download removed");
    }

    /// Track a download produced by save-page-as.
    ///
    /// The page is written by its own pipeline straight to `path`, so the
    /// record skips path determination and is tracked in memory only.
    pub fn save_page_as_download_started(
        &mut self,
        info: CreateInfo,
        path: PathBuf,
    ) -> ManagerResult<DownloadId> {
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

        let mut item = DownloadItem::new(info, self.config.off_the_record);
        item.on_path_determined(path);
        let handle = self.history.next_fake_handle();
        item.set_db_handle(handle);

        debug!(download_id = %id, handle = %handle, "Save-page download started");
        self.downloads.insert(id, item);
        self.save_page.insert(id);
        self.history_index.insert(handle, id);
        self.observers.notify_model_changed();
        Ok(id)
    }

    /// The save-page pipeline finished writing `size` bytes.
    pub fn save_page_download_finished(&mut self, id: DownloadId, size: u64) -> ManagerResult<()> {
        if !self.save_page.remove(&id) {
            return Err(ManagerError::UnknownDownload(id));
        }
        let item = self
            .downloads
            .get_mut(&id)
            .ok_or(ManagerError::UnknownDownload(id))?;
        item.on_all_data_saved(size, None);
        item.completed();
        self.history.update_entry(item);
        self.observers.notify_download_updated(item);
        Ok(())
    }
}
