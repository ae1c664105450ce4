//! Deciding where a download is saved.
//!
//! The stages run in this order, each one triggered by the previous stage's
//! reply:
//!
//! 1. [`DownloadManager::start_download`] asks the classifier about the URL.
//! 2. `on_url_checked` asks the history store about the referrer.
//! 3. `on_referrer_checked` generates a file name, decides whether to prompt
//!    and posts the file-system probe to the I/O context.
//! 4. `on_path_resolved` either shows the chooser or continues with the
//!    suggested path.
//! 5. [`DownloadManager::continue_download_with_path`] commits the path.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, trace};

use super::DownloadManager;
use crate::error::{ManagerError, ManagerResult};
use crate::executor::{IoTask, ManagerEvent};
use crate::item::DownloadId;
use crate::path::danger::{is_dangerous_file, should_auto_open};
use crate::path::naming::{generate_file_name, is_extension_install};
use crate::path::resolver::{check_suggested_path, release_placeholder};
use crate::path::{intermediate_path, PathDecision};

impl DownloadManager {
    /// Begin path determination for a download created earlier.
    pub fn start_download(&mut self, id: DownloadId) {
        let Some(item) = self.active_item(id) else {
            trace!(download_id = %id, "Start for unknown download ignored");
            return;
        };
        if item.full_path().is_some() {
            debug!(download_id = %id, "Download already has a path");
            return;
        }
        debug!(download_id = %id, url = %item.url(), "Checking download URL");
        let reply = self
            .mailbox
            .reply(move |is_dangerous| ManagerEvent::UrlChecked { id, is_dangerous });
        self.classifier
            .check_url(item.url_chain(), item.referrer_url(), reply);
    }

    pub(super) fn on_url_checked(&mut self, id: DownloadId, is_dangerous: bool) {
        let Some(item) = self.active_item_mut(id) else {
            return;
        };
        if is_dangerous {
            info!(download_id = %id, url = %item.url(), "Classifier flagged download URL");
            item.mark_url_dangerous();
        }
        let referrer = item.referrer_url().to_string();
        let reply = self
            .mailbox
            .reply(move |visited_before| ManagerEvent::ReferrerChecked { id, visited_before });
        self.history.visited_referrer_before(&referrer, reply);
    }

    pub(super) fn on_referrer_checked(&mut self, id: DownloadId, visited_before: bool) {
        let Some(item) = self.active_item(id) else {
            return;
        };
        let prefs = &self.config.prefs;
        let mut decision = item.path_decision().clone();

        if !decision.prompt_user_for_save_location
            && is_extension_install(item.url(), item.mime_type())
        {
            decision.is_extension_install = true;
        }

        match decision.force_path.clone() {
            None => {
                let name = generate_file_name(
                    item.url(),
                    item.content_disposition(),
                    item.suggested_filename(),
                    item.mime_type(),
                );
                if prefs.prompt_for_download
                    && !decision.is_extension_install
                    && !should_auto_open(Path::new(&name), &prefs.auto_open_extensions)
                {
                    decision.prompt_user_for_save_location = true;
                }
                if prefs.download_dir_managed {
                    decision.prompt_user_for_save_location = false;
                }

                let dir = match &self.last_download_path {
                    Some(last) if decision.prompt_user_for_save_location => last.clone(),
                    _ => prefs.download_dir.clone(),
                };
                decision.suggested_path = dir.join(name);
            }
            Some(forced) => decision.suggested_path = forced,
        }

        if !decision.prompt_user_for_save_location && decision.force_path.is_none() {
            let auto_open = should_auto_open(&decision.suggested_path, &prefs.auto_open_extensions);
            let from_gallery = self
                .config
                .gallery
                .is_download_from_gallery(item.url(), item.referrer_url());
            decision.is_dangerous_file =
                is_dangerous_file(&decision, auto_open, visited_before, from_gallery);
        }

        debug!(
            download_id = %id,
            suggested = %decision.suggested_path.display(),
            prompt = decision.prompt_user_for_save_location,
            dangerous = decision.is_dangerous(),
            "Probing suggested path"
        );

        let default_dir = prefs.download_dir.clone();
        let documents_dir = self.config.documents_dir.clone();
        let reply = self
            .mailbox
            .reply(move |decision| ManagerEvent::PathResolved { id, decision });
        self.io.post(IoTask::new("check_suggested_path", move || {
            reply.send(check_suggested_path(decision, &default_dir, &documents_dir));
        }));
    }

    pub(super) fn on_path_resolved(&mut self, id: DownloadId, decision: PathDecision) {
        let Some(item) = self.active_item_mut(id) else {
            if let Some(placeholder) = decision.placeholder {
                debug!(download_id = %id, "Download gone, releasing reserved path");
                self.io.post(IoTask::new("release_placeholder", move || {
                    release_placeholder(&placeholder);
                }));
            }
            return;
        };

        if item.full_path().is_some() {
            debug!(download_id = %id, "Duplicate path resolution ignored");
            if let Some(placeholder) = decision.placeholder {
                self.io.post(IoTask::new("release_placeholder", move || {
                    release_placeholder(&placeholder);
                }));
            }
            return;
        }

        let suggested = decision.suggested_path.clone();
        item.set_file_check_results(decision);

        if item.prompt_user_for_save_location() {
            let reply = self
                .mailbox
                .reply(move |path| ManagerEvent::FileChosen { id, path });
            self.chooser.choose_path(id, &suggested, reply);
            self.observers.notify_file_chooser_displayed(id);
        } else if let Err(e) = self.continue_download_with_path(id, suggested) {
            error!(download_id = %id, error = %e, "Failed to continue download");
        }
    }

    /// The user picked `path` in the save prompt.
    pub fn file_selected(&mut self, id: DownloadId, path: PathBuf) {
        let Some(item) = self.active_item(id) else {
            trace!(download_id = %id, "Selection for inactive download ignored");
            return;
        };
        if item.full_path().is_some() {
            debug!(download_id = %id, "Duplicate selection ignored");
            return;
        }
        if item.prompt_user_for_save_location() {
            self.last_download_path = path.parent().map(Path::to_path_buf);
        }
        if let Err(e) = self.continue_download_with_path(id, path) {
            error!(download_id = %id, error = %e, "Failed to continue download");
        }
    }

    /// The user dismissed the save prompt.
    pub fn file_selection_canceled(&mut self, id: DownloadId) {
        let Some(item) = self.active_item_mut(id) else {
            return;
        };
        info!(download_id = %id, "Save prompt cancelled");
        item.cancel();
        self.placement.cancel(id);
        self.retire_after_stop(id);
    }

    /// Commit the save path of a download.
    ///
    /// The path is set exactly once. The record enters `in_progress`, the
    /// bytes move to their intermediate name and the history entry is
    /// requested.
    pub fn continue_download_with_path(
        &mut self,
        id: DownloadId,
        path: PathBuf,
    ) -> ManagerResult<()> {
        let is_active = self.active.contains(&id);
        let already_tracked = self.in_progress.contains(&id);
        let item = self
            .downloads
            .get_mut(&id)
            .ok_or(ManagerError::UnknownDownload(id))?;

        debug_assert!(
            item.full_path().is_none(),
            "download {id}: path already set to {:?}",
            item.full_path()
        );
        if let Some(existing) = item.full_path() {
            error!(download_id = %id, existing = %existing.display(), "Path set twice");
            return Err(ManagerError::PathAlreadySet {
                id,
                existing: existing.to_path_buf(),
            });
        }
        if !is_active || already_tracked || !item.is_in_progress() {
            return Err(ManagerError::InvalidState {
                id,
                operation: "continue with a path",
            });
        }

        item.on_path_determined(path.clone());
        let intermediate = if item.is_dangerous() {
            path
        } else {
            intermediate_path(&path)
        };
        self.placement.rename_to_intermediate(id, &intermediate);
        item.rename(intermediate);
        self.in_progress.insert(id);

        info!(
            download_id = %id,
            path = %item.full_path().unwrap_or(Path::new("")).display(),
            dangerous = item.is_dangerous(),
            "Download path determined"
        );

        let reply = self
            .mailbox
            .reply(move |handle| ManagerEvent::EntryCreated { id, handle });
        self.history.add_entry(item, reply);
        self.observers.notify_download_updated(item);
        Ok(())
    }

    /// Forget the directory remembered from the last save prompt.
    pub fn clear_last_download_path(&mut self) {
        self.last_download_path = None;
    }

    pub fn last_download_path(&self) -> Option<&Path> {
        self.last_download_path.as_deref()
    }
}
