//! Change notifications for UI layers.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::item::{DownloadId, DownloadItem};

/// Receives manager notifications. Every method defaults to a no-op.
pub trait DownloadObserver: Send + Sync {
    /// The set of downloads changed. Emitted once per logical batch.
    fn model_changed(&self) {}

    /// Shutdown has started; no more notifications follow.
    fn manager_going_down(&self) {}

    /// A save-location prompt was shown for `id`.
    fn file_chooser_displayed(&self, _id: DownloadId) {}

    /// One download's state or progress changed.
    fn download_updated(&self, _item: &DownloadItem) {}
}

/// Handle returned by registration; used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    observers: Vec<(ObserverId, Arc<dyn DownloadObserver>)>,
}

/// Registered observers, notified synchronously in registration order.
///
/// Clones share the same registry. Notification iterates a snapshot, so an
/// observer may register or unregister others from inside a callback.
#[derive(Clone, Default)]
pub struct ObserverList {
    registry: Arc<RwLock<Registry>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer` and immediately send it one `model_changed`.
    pub fn add(&self, observer: Arc<dyn DownloadObserver>) -> ObserverId {
        let id = {
            let mut registry = self.registry.write();
            let id = ObserverId(registry.next_id);
            registry.next_id += 1;
            registry.observers.push((id, Arc::clone(&observer)));
            id
        };
        observer.model_changed();
        id
    }

    /// Returns false if `id` was not registered.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut registry = self.registry.write();
        let before = registry.observers.len();
        registry.observers.retain(|(oid, _)| *oid != id);
        registry.observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.registry.read().observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify_model_changed(&self) {
        for observer in self.snapshot() {
            observer.model_changed();
        }
    }

    pub fn notify_going_down(&self) {
        for observer in self.snapshot() {
            observer.manager_going_down();
        }
    }

    pub fn notify_file_chooser_displayed(&self, id: DownloadId) {
        for observer in self.snapshot() {
            observer.file_chooser_displayed(id);
        }
    }

    pub fn notify_download_updated(&self, item: &DownloadItem) {
        for observer in self.snapshot() {
            observer.download_updated(item);
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn DownloadObserver>> {
        self.registry
            .read()
            .observers
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect()
    }
}

impl fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverList")
            .field("len", &self.len())
            .finish()
    }
}
