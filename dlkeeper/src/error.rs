//! Error types for the download manager.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::item::{DbHandle, DownloadId};

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors returned by [`crate::manager::DownloadManager`] operations.
///
/// Most of these indicate misuse of the manager's contract rather than a
/// runtime condition. Stale callbacks for downloads that were cancelled or
/// removed in the meantime are not errors and never surface here.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// `initialize` was called on a manager that is already running.
    #[error("download manager already initialized")]
    AlreadyInitialized,

    /// A record with this id is already owned by the manager.
    #[error("download {0} already exists")]
    DuplicateId(DownloadId),

    /// No record with this id is owned by the manager.
    #[error("unknown download {0}")]
    UnknownDownload(DownloadId),

    /// The record's working path was already determined.
    #[error("download {id}: path already set to {}", existing.display())]
    PathAlreadySet { id: DownloadId, existing: PathBuf },

    /// The record is not in a state that allows the requested transition.
    #[error("download {id} cannot {operation} in its current state")]
    InvalidState {
        id: DownloadId,
        operation: &'static str,
    },

    /// Attempted to remove a record that is still active.
    #[error("download with handle {0} is still active")]
    StillActive(DbHandle),

    /// The manager has been shut down.
    #[error("download manager is shut down")]
    ShutDown,
}

/// Errors talking to a [`crate::service::DownloadService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service task has stopped and no longer accepts events.
    #[error("download service stopped")]
    Stopped,

    /// The service task panicked or was aborted.
    #[error("download service task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors raised by flat-file history persistence.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Failed to read the history file.
    #[error("failed to read history file {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    /// Failed to write the history file.
    #[error("failed to write history file {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    /// The history file is not valid JSON for the expected layout.
    #[error("failed to parse history file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}
