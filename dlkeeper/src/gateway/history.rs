//! Durable download history.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::executor::Reply;
use crate::item::{DbHandle, DownloadState};
use crate::path::naming::url_host;

/// The persisted view of one download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub handle: DbHandle,
    pub url: String,
    #[serde(default)]
    pub referrer_url: String,
    /// Final path for complete downloads, target path otherwise.
    pub path: PathBuf,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub received_bytes: u64,
    #[serde(default)]
    pub total_bytes: Option<u64>,
    pub state: DownloadState,
    #[serde(default)]
    pub opened: bool,
}

/// Durable record store.
///
/// Handles are allocated by the store. A store that cannot allocate one
/// (offline, degraded) replies [`DbHandle::UNINITIALIZED`] and the manager
/// falls back to [`HistoryStore::next_fake_handle`].
pub trait HistoryStore: Send + Sync {
    /// Reply with every persisted entry, ordered by ascending start time.
    fn load(&self, reply: Reply<Vec<HistoryEntry>>);

    /// Reply true if the referrer's site was visited before.
    fn visited_referrer_before(&self, referrer_url: &str, reply: Reply<bool>);

    /// Persist a new entry and reply with its handle.
    fn add_entry(&self, entry: &HistoryEntry, reply: Reply<DbHandle>);

    fn update_entry(&self, entry: &HistoryEntry);

    fn remove_entry(&self, handle: DbHandle);

    /// Remove terminal entries with `begin <= start_time < end`; a missing
    /// `end` is unbounded.
    fn remove_entries_between(&self, begin: DateTime<Utc>, end: Option<DateTime<Utc>>);

    /// A process-unique handle for records tracked only in memory.
    fn next_fake_handle(&self) -> DbHandle;
}

/// True if `entry` falls in a removal range and may be removed.
pub fn in_removal_range(
    entry: &HistoryEntry,
    begin: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> bool {
    entry.state.is_terminal()
        && entry.start_time >= begin
        && end.map_or(true, |end| entry.start_time < end)
}

// =============================================================================
// In-memory store
// =============================================================================

/// Serializable contents of a history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub next_handle: i64,
    pub entries: Vec<HistoryEntry>,
    /// Hosts the user has visited.
    #[serde(default)]
    pub visited: BTreeSet<String>,
}

impl Default for HistorySnapshot {
    fn default() -> Self {
        Self {
            next_handle: 1,
            entries: Vec::new(),
            visited: BTreeSet::new(),
        }
    }
}

/// History store kept entirely in memory.
///
/// Replies are delivered inline. [`MemoryHistoryStore::set_degraded`]
/// simulates a store that cannot allocate handles.
#[derive(Debug)]
pub struct MemoryHistoryStore {
    inner: Mutex<HistorySnapshot>,
    degraded: AtomicBool,
    next_fake: AtomicI64,
}

impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self::from_snapshot(HistorySnapshot::default())
    }
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(mut snapshot: HistorySnapshot) -> Self {
        snapshot.entries.sort_by_key(|e| e.start_time);
        let highest = snapshot.entries.iter().map(|e| e.handle.0).max().unwrap_or(0);
        snapshot.next_handle = snapshot.next_handle.max(highest + 1).max(1);

        Self {
            inner: Mutex::new(snapshot),
            degraded: AtomicBool::new(false),
            next_fake: AtomicI64::new(DbHandle::FIRST_FAKE.0),
        }
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        self.inner.lock().clone()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.inner.lock().entries.clone()
    }

    pub fn entry(&self, handle: DbHandle) -> Option<HistoryEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .find(|e| e.handle == handle)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// While degraded, `add_entry` cannot allocate handles.
    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::SeqCst);
    }

    /// Remember that the user visited `url`'s site.
    pub fn record_visit(&self, url: &str) {
        if let Some(host) = url_host(url) {
            self.inner.lock().visited.insert(host.to_ascii_lowercase());
        }
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn load(&self, reply: Reply<Vec<HistoryEntry>>) {
        let mut entries = self.entries();
        entries.sort_by_key(|e| e.start_time);
        reply.send(entries);
    }

    fn visited_referrer_before(&self, referrer_url: &str, reply: Reply<bool>) {
        let visited = url_host(referrer_url)
            .map(|host| self.inner.lock().visited.contains(&host.to_ascii_lowercase()))
            .unwrap_or(false);
        reply.send(visited);
    }

    fn add_entry(&self, entry: &HistoryEntry, reply: Reply<DbHandle>) {
        if self.degraded.load(Ordering::SeqCst) {
            warn!(url = %entry.url, "History store degraded, no handle allocated");
            reply.send(DbHandle::UNINITIALIZED);
            return;
        }

        let handle = {
            let mut inner = self.inner.lock();
            let handle = DbHandle(inner.next_handle);
            inner.next_handle += 1;
            inner.entries.push(HistoryEntry {
                handle,
                ..entry.clone()
            });
            handle
        };
        debug!(handle = %handle, url = %entry.url, "History entry added");
        reply.send(handle);
    }

    fn update_entry(&self, entry: &HistoryEntry) {
        let mut inner = self.inner.lock();
        match inner.entries.iter_mut().find(|e| e.handle == entry.handle) {
            Some(existing) => *existing = entry.clone(),
            None => debug!(handle = %entry.handle, "Update for unknown history entry"),
        }
    }

    fn remove_entry(&self, handle: DbHandle) {
        self.inner.lock().entries.retain(|e| e.handle != handle);
    }

    fn remove_entries_between(&self, begin: DateTime<Utc>, end: Option<DateTime<Utc>>) {
        self.inner
            .lock()
            .entries
            .retain(|e| !in_removal_range(e, begin, end));
    }

    fn next_fake_handle(&self) -> DbHandle {
        DbHandle(self.next_fake.fetch_sub(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::executor::{Mailbox, ManagerEvent};
    use crate::item::DownloadId;
    use chrono::TimeZone;

    pub(crate) fn entry(handle: i64, minute: u32, state: DownloadState) -> HistoryEntry {
        HistoryEntry {
            handle: DbHandle(handle),
            url: format!("https://example.com/{handle}.bin"),
            referrer_url: String::new(),
            path: PathBuf::from(format!("/dl/{handle}.bin")),
            start_time: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
            end_time: None,
            received_bytes: 10,
            total_bytes: Some(10),
            state,
            opened: false,
        }
    }

    fn add(store: &MemoryHistoryStore, e: &HistoryEntry) -> DbHandle {
        let (mailbox, mut rx) = Mailbox::new();
        store.add_entry(
            e,
            mailbox.reply(|handle| ManagerEvent::EntryCreated {
                id: DownloadId(0),
                handle,
            }),
        );
        match rx.try_recv().unwrap() {
            ManagerEvent::EntryCreated { handle, .. } => handle,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_add_allocates_increasing_handles() {
        let store = MemoryHistoryStore::new();
        let a = add(&store, &entry(-1, 0, DownloadState::InProgress));
        let b = add(&store, &entry(-1, 1, DownloadState::InProgress));
        assert_eq!(a, DbHandle(1));
        assert_eq!(b, DbHandle(2));
        assert_eq!(store.entry(a).unwrap().handle, a);
    }

    #[test]
    fn test_degraded_store_returns_sentinel() {
        let store = MemoryHistoryStore::new();
        store.set_degraded(true);
        assert_eq!(add(&store, &entry(-1, 0, DownloadState::InProgress)), DbHandle::UNINITIALIZED);
        assert!(store.is_empty());
    }

    #[test]
    fn test_fake_handles_count_down() {
        let store = MemoryHistoryStore::new();
        assert_eq!(store.next_fake_handle(), DbHandle(-2));
        assert_eq!(store.next_fake_handle(), DbHandle(-3));
    }

    #[test]
    fn test_remove_between_skips_in_progress_and_out_of_range() {
        let store = MemoryHistoryStore::from_snapshot(HistorySnapshot {
            next_handle: 1,
            entries: vec![
                entry(1, 0, DownloadState::Complete),
                entry(2, 10, DownloadState::Complete),
                entry(3, 10, DownloadState::InProgress),
                entry(4, 20, DownloadState::Cancelled),
            ],
            visited: BTreeSet::new(),
        });

        let begin = Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 20, 0).unwrap();
        store.remove_entries_between(begin, Some(end));

        let handles: Vec<i64> = store.entries().iter().map(|e| e.handle.0).collect();
        assert_eq!(handles, vec![1, 3, 4]);
    }

    #[test]
    fn test_from_snapshot_repairs_next_handle() {
        let store = MemoryHistoryStore::from_snapshot(HistorySnapshot {
            next_handle: 1,
            entries: vec![entry(7, 0, DownloadState::Complete)],
            visited: BTreeSet::new(),
        });
        assert_eq!(store.snapshot().next_handle, 8);
    }

    #[test]
    fn test_visited_referrer() {
        let store = MemoryHistoryStore::new();
        store.record_visit("https://Example.com/page");

        let (mailbox, mut rx) = Mailbox::new();
        let reply = |mailbox: &Mailbox| {
            mailbox.reply(|visited_before| ManagerEvent::ReferrerChecked {
                id: DownloadId(1),
                visited_before,
            })
        };
        store.visited_referrer_before("https://example.com/other", reply(&mailbox));
        store.visited_referrer_before("https://elsewhere.test/", reply(&mailbox));
        store.visited_referrer_before("", reply(&mailbox));

        let results: Vec<bool> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|event| match event {
                ManagerEvent::ReferrerChecked { visited_before, .. } => visited_before,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(results, vec![true, false, false]);
    }
}
