use std::path::PathBuf;

use tracing::{debug, info};

use super::{DownloadManager, Lifecycle};
use crate::executor::IoTask;
use crate::item::DownloadId;
use crate::path::resolver::delete_file;

impl DownloadManager {
    /// Tear the manager down. Calling it again is a no-op.
    ///
    /// Observers hear `manager_going_down` first. Dangerous downloads the
    /// user never accepted lose their bytes and history entry; every other
    /// unfinished download is cancelled. Replies that arrive afterwards are
    /// dropped.
    pub fn shutdown(&mut self) {
        if self.lifecycle == Lifecycle::ShutDown {
            return;
        }
        self.lifecycle = Lifecycle::ShutDown;
        info!(downloads = self.downloads.len(), "Download manager shutting down");

        self.observers.notify_going_down();
        self.placement.manager_shutdown();

        let ids: Vec<DownloadId> = self.downloads.keys().copied().collect();
        for id in ids {
            let Some(item) = self.downloads.get_mut(&id) else {
                continue;
            };

            if item.needs_discard() {
                if item.cancel() {
                    self.placement.cancel(id);
                }
                if let Some(path) = item.full_path().map(PathBuf::from) {
                    self.io.post(IoTask::new("delete_download", move || {
                        delete_file(&path);
                    }));
                }
                self.history.remove_entry(item.db_handle());
                debug!(download_id = %id, "Discarded unaccepted dangerous download");
            } else if item.is_partial() {
                item.cancel();
                self.placement.cancel(id);
                self.history.update_entry(item);
                debug!(download_id = %id, "Cancelled unfinished download");
            }
        }

        self.active.clear();
        self.in_progress.clear();
        self.history_index.clear();
        self.save_page.clear();
        self.orphaned_entries.clear();
        self.downloads.clear();
        self.mailbox.close();
        info!("Download manager shut down");
    }
}
