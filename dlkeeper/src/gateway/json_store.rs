//! Flat-file history store.
//!
//! The whole history is one JSON document:
//!
//! ```json
//! { "next_handle": 4, "entries": [ ... ], "visited": ["example.com"] }
//! ```
//!
//! Every mutation rewrites the document on the I/O context. Writes go to a
//! sibling temp file that is then renamed over the original, so a crash never
//! leaves a truncated history behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use super::history::{HistoryEntry, HistorySnapshot, HistoryStore, MemoryHistoryStore};
use crate::error::HistoryError;
use crate::executor::{IoContext, IoTask, Reply};
use crate::item::DbHandle;

/// [`MemoryHistoryStore`] persisted to a JSON file.
pub struct JsonHistoryStore {
    memory: MemoryHistoryStore,
    path: PathBuf,
    io: Arc<dyn IoContext>,
}

impl JsonHistoryStore {
    /// Open the history at `path`. A missing file is an empty history.
    pub fn open(path: impl Into<PathBuf>, io: Arc<dyn IoContext>) -> Result<Self, HistoryError> {
        let path = path.into();
        let snapshot = read_snapshot(&path)?;
        info!(
            path = %path.display(),
            entries = snapshot.entries.len(),
            "Opened download history"
        );
        Ok(Self {
            memory: MemoryHistoryStore::from_snapshot(snapshot),
            path,
            io,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.memory.entries()
    }

    pub fn record_visit(&self, url: &str) {
        self.memory.record_visit(url);
        self.schedule_save();
    }

    /// Write the current contents synchronously.
    pub fn save(&self) -> Result<(), HistoryError> {
        write_snapshot(&self.path, &self.memory.snapshot())
    }

    fn schedule_save(&self) {
        let snapshot = self.memory.snapshot();
        let path = self.path.clone();
        self.io.post(IoTask::new("save_history", move || {
            if let Err(e) = write_snapshot(&path, &snapshot) {
                error!(error = %e, "Failed to save download history");
            }
        }));
    }
}

impl HistoryStore for JsonHistoryStore {
    fn load(&self, reply: Reply<Vec<HistoryEntry>>) {
        self.memory.load(reply);
    }

    fn visited_referrer_before(&self, referrer_url: &str, reply: Reply<bool>) {
        self.memory.visited_referrer_before(referrer_url, reply);
    }

    fn add_entry(&self, entry: &HistoryEntry, reply: Reply<DbHandle>) {
        self.memory.add_entry(entry, reply);
        self.schedule_save();
    }

    fn update_entry(&self, entry: &HistoryEntry) {
        self.memory.update_entry(entry);
        self.schedule_save();
    }

    fn remove_entry(&self, handle: DbHandle) {
        self.memory.remove_entry(handle);
        self.schedule_save();
    }

    fn remove_entries_between(&self, begin: DateTime<Utc>, end: Option<DateTime<Utc>>) {
        self.memory.remove_entries_between(begin, end);
        self.schedule_save();
    }

    fn next_fake_handle(&self) -> DbHandle {
        self.memory.next_fake_handle()
    }
}

/// Read a history document; a missing file yields an empty snapshot.
pub fn read_snapshot(path: &Path) -> Result<HistorySnapshot, HistoryError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HistorySnapshot::default()),
        Err(source) => {
            return Err(HistoryError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&content).map_err(|source| HistoryError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Atomically replace the history document at `path`.
pub fn write_snapshot(path: &Path, snapshot: &HistorySnapshot) -> Result<(), HistoryError> {
    let write_err = |source: io::Error| HistoryError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let json = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| write_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    fs::write(&tmp, json).map_err(write_err)?;
    fs::rename(&tmp, path).map_err(write_err)?;

    debug!(path = %path.display(), entries = snapshot.entries.len(), "Saved download history");
    Ok(())
}
