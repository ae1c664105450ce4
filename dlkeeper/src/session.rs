//! A browsing session: one normal manager and an optional off-the-record one.
//!
//! The off-the-record manager sees its parent's downloads in its views, and
//! its observers hear about changes to the parent's model. Nothing flows the
//! other way.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::item::DownloadItem;
use crate::manager::DownloadManager;
use crate::observer::{DownloadObserver, ObserverId, ObserverList};

/// Which of a session's managers to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Normal,
    OffTheRecord,
}

/// Relays the parent's `model_changed` to the child's observers until the
/// parent goes down.
struct ForwardingObserver {
    target: ObserverList,
    attached: AtomicBool,
}

impl DownloadObserver for ForwardingObserver {
    fn model_changed(&self) {
        if self.attached.load(Ordering::Acquire) {
            self.target.notify_model_changed();
        }
    }

    fn manager_going_down(&self) {
        self.attached.store(false, Ordering::Release);
    }
}

/// The managers of one browsing session.
pub struct DownloadSession {
    normal: DownloadManager,
    off_the_record: Option<DownloadManager>,
    forwarding: Option<ObserverId>,
}

impl DownloadSession {
    pub fn new(normal: DownloadManager) -> Self {
        Self {
            normal,
            off_the_record: None,
            forwarding: None,
        }
    }

    /// A session with an off-the-record child of `normal`.
    pub fn with_off_the_record(normal: DownloadManager, off_the_record: DownloadManager) -> Self {
        let forwarder = Arc::new(ForwardingObserver {
            target: off_the_record.observers().clone(),
            attached: AtomicBool::new(true),
        });
        let forwarding = normal.add_observer(forwarder);
        Self {
            normal,
            off_the_record: Some(off_the_record),
            forwarding: Some(forwarding),
        }
    }

    pub fn manager(&self, kind: SessionKind) -> Option<&DownloadManager> {
        match kind {
            SessionKind::Normal => Some(&self.normal),
            SessionKind::OffTheRecord => self.off_the_record.as_ref(),
        }
    }

    pub fn manager_mut(&mut self, kind: SessionKind) -> Option<&mut DownloadManager> {
        match kind {
            SessionKind::Normal => Some(&mut self.normal),
            SessionKind::OffTheRecord => self.off_the_record.as_mut(),
        }
    }

    /// Current downloads as seen from `kind`; the off-the-record view includes
    /// the parent's.
    pub fn get_current_downloads(&self, kind: SessionKind, dir: Option<&Path>) -> Vec<&DownloadItem> {
        self.merged(kind, |manager| manager.get_current_downloads(dir))
    }

    pub fn get_all_downloads(&self, kind: SessionKind, dir: Option<&Path>) -> Vec<&DownloadItem> {
        self.merged(kind, |manager| manager.get_all_downloads(dir))
    }

    pub fn search_downloads(&self, kind: SessionKind, query: &str) -> Vec<&DownloadItem> {
        self.merged(kind, |manager| manager.search_downloads(query))
    }

    /// Clear finished downloads. Clearing the off-the-record view clears the
    /// parent's history as well.
    pub fn remove_all_downloads(&mut self, kind: SessionKind) -> usize {
        match (kind, self.off_the_record.as_mut()) {
            (SessionKind::OffTheRecord, Some(child)) => {
                child.remove_all_downloads() + self.normal.remove_all_downloads()
            }
            (SessionKind::OffTheRecord, None) => 0,
            (SessionKind::Normal, _) => self.normal.remove_all_downloads(),
        }
    }

    /// Shut down the off-the-record manager, then the normal one.
    pub fn shutdown(&mut self) {
        if let Some(child) = self.off_the_record.as_mut() {
            child.shutdown();
        }
        if let Some(id) = self.forwarding.take() {
            self.normal.remove_observer(id);
        }
        self.normal.shutdown();
        debug!("Download session shut down");
    }

    fn merged<'a, F>(&'a self, kind: SessionKind, query: F) -> Vec<&'a DownloadItem>
    where
        F: Fn(&'a DownloadManager) -> Vec<&'a DownloadItem>,
    {
        match (kind, self.off_the_record.as_ref()) {
            (SessionKind::Normal, _) => query(&self.normal),
            (SessionKind::OffTheRecord, Some(child)) => {
                let mut items = query(child);
                items.extend(query(&self.normal));
                items
            }
            (SessionKind::OffTheRecord, None) => Vec::new(),
        }
    }
}
