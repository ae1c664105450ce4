//! History policy applied on top of the raw store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::executor::Reply;
use crate::gateway::{HistoryEntry, HistoryStore};
use crate::item::{DbHandle, DownloadItem};

/// Decides which records reach the [`HistoryStore`].
///
/// Off-the-record sessions, extension installs and temporary downloads are
/// tracked in memory only. They get a fake handle straight away and their
/// updates never touch the store.
pub(super) struct DownloadHistory {
    store: Arc<dyn HistoryStore>,
    off_the_record: bool,
}

impl DownloadHistory {
    pub(super) fn new(store: Arc<dyn HistoryStore>, off_the_record: bool) -> Self {
        Self {
            store,
            off_the_record,
        }
    }

    pub(super) fn load(&self, reply: Reply<Vec<HistoryEntry>>) {
        if self.off_the_record {
            reply.send(Vec::new());
            return;
        }
        self.store.load(reply);
    }

    pub(super) fn visited_referrer_before(&self, referrer_url: &str, reply: Reply<bool>) {
        if referrer_url.is_empty() {
            reply.send(false);
            return;
        }
        self.store.visited_referrer_before(referrer_url, reply);
    }

    pub(super) fn add_entry(&self, item: &DownloadItem, reply: Reply<DbHandle>) {
        if self.is_memory_only(item) {
            trace!(download_id = %item.id(), "Download kept out of history store");
            reply.send(self.store.next_fake_handle());
            return;
        }
        self.store.add_entry(&item.to_history_entry(), reply);
    }

    pub(super) fn update_entry(&self, item: &DownloadItem) {
        if item.db_handle().is_persisted() {
            self.store.update_entry(&item.to_history_entry());
        }
    }

    pub(super) fn remove_entry(&self, handle: DbHandle) {
        if handle.is_persisted() {
            self.store.remove_entry(handle);
        }
    }

    pub(super) fn remove_entries_between(&self, begin: DateTime<Utc>, end: Option<DateTime<Utc>>) {
        if !self.off_the_record {
            self.store.remove_entries_between(begin, end);
        }
    }

    pub(super) fn next_fake_handle(&self) -> DbHandle {
        self.store.next_fake_handle()
    }

    fn is_memory_only(&self, item: &DownloadItem) -> bool {
        self.off_the_record || item.is_otr() || item.is_extension_install() || item.is_temporary()
    }
}
