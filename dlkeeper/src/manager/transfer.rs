//! Transfer progress, completion and failure.

use std::io;

use tracing::{debug, error, info, trace, warn};

use super::DownloadManager;
use crate::error::{ManagerError, ManagerResult};
use crate::executor::{IoTask, ManagerEvent};
use crate::gateway::FinalName;
use crate::item::{DbHandle, DownloadId, SafetyState, TransferStatus, FILE_FAILED};
use crate::path::resolver::delete_file;

impl DownloadManager {
    /// The history store created the entry for `id`.
    pub(super) fn on_entry_created(&mut self, id: DownloadId, handle: DbHandle) {
        if self.orphaned_entries.remove(&id) {
            debug!(download_id = %id, handle = %handle, "Removing entry of discarded download");
            self.history.remove_entry(handle);
            return;
        }
        if !self.active.contains(&id) {
            trace!(download_id = %id, "Entry created for inactive download");
            return;
        }

        let handle = if handle.is_valid() {
            handle
        } else {
            let fake = self.history.next_fake_handle();
            warn!(download_id = %id, fake_handle = %fake, "History store returned no handle");
            fake
        };

        let Some(item) = self.downloads.get_mut(&id) else {
            return;
        };
        if item.db_handle().is_valid() {
            error!(download_id = %id, existing = %item.db_handle(), "History entry created twice");
            return;
        }
        if self.history_index.contains_key(&handle) {
            error!(download_id = %id, handle = %handle, "Duplicate history handle");
            return;
        }

        item.set_db_handle(handle);
        self.history_index.insert(handle, id);
        debug!(download_id = %id, handle = %handle, "Download added to history");
        self.observers.notify_model_changed();

        if item.is_in_progress() {
            self.maybe_complete_download(id);
        } else {
            // Cancelled or interrupted while the entry was being created.
            self.in_progress.remove(&id);
            self.active.remove(&id);
            self.history.update_entry(item);
            self.observers.notify_download_updated(item);
        }
    }

    /// Progress reported by the network layer.
    pub fn update_download(&mut self, id: DownloadId, received_bytes: u64) {
        if !self.active.contains(&id) {
            return;
        }
        let Some(item) = self.downloads.get_mut(&id) else {
            return;
        };
        if !item.is_in_progress() {
            return;
        }
        item.update(received_bytes);
        self.history.update_entry(item);
        self.observers.notify_download_updated(item);
    }

    pub(super) fn on_response_completed(
        &mut self,
        id: DownloadId,
        size: u64,
        status: TransferStatus,
        hash: Option<String>,
    ) {
        match status {
            TransferStatus::Ok | TransferStatus::ConnectionClosed => {
                self.on_all_data_saved(id, size, hash)
            }
            TransferStatus::Failed(code) => self.on_download_error(id, size, code),
        }
    }

    /// Every byte of the response has been written.
    pub fn on_all_data_saved(&mut self, id: DownloadId, size: u64, hash: Option<String>) {
        let Some(item) = self.active_item_mut(id) else {
            trace!(download_id = %id, "Data saved for inactive download");
            return;
        };
        if !item.is_in_progress() {
            return;
        }
        item.on_all_data_saved(size, hash.clone());
        debug!(download_id = %id, size, "All data saved");

        if let Some(hash) = hash.filter(|h| !h.is_empty()) {
            let reply = self
                .mailbox
                .reply(move |is_dangerous| ManagerEvent::HashChecked { id, is_dangerous });
            self.classifier.check_hash(&hash, reply);
        }
        self.maybe_complete_download(id);
    }

    pub(super) fn on_hash_checked(&mut self, id: DownloadId, is_dangerous: bool) {
        let Some(item) = self.downloads.get(&id) else {
            return;
        };
        if is_dangerous {
            warn!(download_id = %id, hash = ?item.hash(), "Classifier flagged download contents");
        } else {
            trace!(download_id = %id, "Download contents look safe");
        }
    }

    /// True if `id` passes the completion gate.
    fn is_ready_for_completion(&self, id: DownloadId) -> bool {
        let Some(item) = self.downloads.get(&id) else {
            return false;
        };
        item.all_data_saved()
            && item.safety_state() != SafetyState::Dangerous
            && !item.is_completing()
            && item.db_handle().is_valid()
            && self.active.contains(&id)
            && self.in_progress.contains(&id)
    }

    /// Enter the completing phase if every precondition holds.
    ///
    /// Safe to call any number of times; only the first call that finds the
    /// gate open has an effect. Returns whether completion started.
    pub fn maybe_complete_download(&mut self, id: DownloadId) -> bool {
        if !self.is_ready_for_completion(id) {
            return false;
        }
        let Some(item) = self.downloads.get_mut(&id) else {
            return false;
        };

        self.in_progress.remove(&id);
        let (target, uniquify) = item.on_download_completing();
        self.history.update_entry(item);
        info!(download_id = %id, target = %target.display(), "Completing download");

        let reply = self.mailbox.reply(move |result| match result {
            Ok(name) => ManagerEvent::RenamedToFinal { id, name },
            Err(error) => ManagerEvent::FinalRenameFailed { id, error },
        });
        self.placement.rename_to_final(id, &target, uniquify, reply);
        true
    }

    pub(super) fn on_renamed_to_final(&mut self, id: DownloadId, name: FinalName) {
        let Some(item) = self.downloads.get_mut(&id) else {
            trace!(download_id = %id, "Final rename for unknown download");
            return;
        };
        if !item.is_completing() {
            trace!(download_id = %id, "Stale final rename ignored");
            return;
        }
        self.placement.complete_and_release(id);
        item.on_renamed_to_final(name.path, name.uniquifier);
        self.history.update_entry(item);
        self.download_completed(id);
    }

    /// The bytes could not be moved to their final name.
    ///
    /// The record leaves the completing phase as interrupted with
    /// [`FILE_FAILED`]; whatever bytes remain stay where they were.
    pub(super) fn on_final_rename_failed(&mut self, id: DownloadId, error: &io::Error) {
        let Some(item) = self.downloads.get_mut(&id) else {
            trace!(download_id = %id, "Final rename failure for unknown download");
            return;
        };
        if !item.is_completing() {
            trace!(download_id = %id, "Stale final rename failure ignored");
            return;
        }
        if !item.final_rename_failed(FILE_FAILED) {
            return;
        }
        warn!(download_id = %id, error = %error, "Final rename failed, download interrupted");
        self.placement.cancel(id);
        self.retire_after_stop(id);
    }

    fn download_completed(&mut self, id: DownloadId) {
        let Some(item) = self.downloads.get_mut(&id) else {
            return;
        };
        item.completed();
        self.history.update_entry(item);
        self.active.remove(&id);
        info!(
            download_id = %id,
            path = ?item.full_path(),
            bytes = item.received_bytes(),
            "Download complete"
        );
        self.observers.notify_download_updated(item);
    }

    /// The network layer cancelled the transfer.
    ///
    /// Completing downloads are past the point of no return and ignore this.
    pub fn download_cancelled(&mut self, id: DownloadId) {
        let Some(item) = self.active_item_mut(id) else {
            trace!(download_id = %id, "Cancel for inactive download ignored");
            return;
        };
        if item.is_completing() {
            debug!(download_id = %id, "Cancel ignored, download is completing");
            return;
        }
        if !item.cancel() {
            return;
        }
        info!(download_id = %id, "Download cancelled");
        self.placement.cancel(id);
        self.retire_after_stop(id);
    }

    /// The transfer failed with `code` after `size` bytes.
    pub fn on_download_error(&mut self, id: DownloadId, size: u64, code: i32) {
        let Some(item) = self.active_item_mut(id) else {
            return;
        };
        if item.is_completing() {
            debug!(download_id = %id, "Error ignored, download is completing");
            return;
        }
        if !item.interrupted(size, code) {
            return;
        }
        warn!(download_id = %id, code, received = size, "Download interrupted");
        self.placement.cancel(id);
        self.retire_after_stop(id);
    }

    /// Fix up the indices after a record reached a terminal state.
    ///
    /// Records that already have a history handle leave the active indices
    /// now. Records whose entry is still being created stay until the handle
    /// arrives. Records that never got a path are discarded outright.
    pub(super) fn retire_after_stop(&mut self, id: DownloadId) {
        let Some(item) = self.downloads.get(&id) else {
            return;
        };

        if item.db_handle().is_valid() {
            self.in_progress.remove(&id);
            self.active.remove(&id);
            self.history.update_entry(item);
            self.observers.notify_download_updated(item);
        } else if item.full_path().is_some() {
            debug!(download_id = %id, "Cleanup deferred until history entry exists");
            self.observers.notify_download_updated(item);
        } else {
            self.observers.notify_download_updated(item);
            self.forget(id);
            debug!(download_id = %id, "Discarded download without a path");
        }
    }

    /// The user accepted a dangerous download.
    pub fn validate_dangerous_download(&mut self, id: DownloadId) -> ManagerResult<()> {
        let item = self
            .downloads
            .get_mut(&id)
            .ok_or(ManagerError::UnknownDownload(id))?;
        if item.safety_state() != SafetyState::Dangerous || !item.is_partial() {
            return Err(ManagerError::InvalidState {
                id,
                operation: "be validated",
            });
        }
        item.mark_validated();
        info!(download_id = %id, "Dangerous download accepted");
        self.observers.notify_download_updated(item);
        self.maybe_complete_download(id);
        Ok(())
    }

    /// The user rejected a download: stop it, delete its bytes and forget it.
    pub fn discard_download(&mut self, id: DownloadId) -> ManagerResult<()> {
        let item = self
            .downloads
            .get_mut(&id)
            .ok_or(ManagerError::UnknownDownload(id))?;
        if item.is_completing() {
            return Err(ManagerError::InvalidState {
                id,
                operation: "be discarded",
            });
        }
        if item.cancel() {
            self.placement.cancel(id);
        }

        let handle = item.db_handle();
        let pending_entry = !handle.is_valid() && item.full_path().is_some();
        if let Some(path) = item.full_path().map(|p| p.to_path_buf()) {
            self.io.post(IoTask::new("delete_download", move || {
                delete_file(&path);
            }));
        }
        item.set_removing();
        info!(download_id = %id, "Download discarded");

        self.history.remove_entry(handle);
        if pending_entry {
            self.orphaned_entries.insert(id);
        }
        self.forget(id);
        self.observers.notify_model_changed();
        Ok(())
    }
}
