//! Download records.
//!
//! A [`DownloadItem`] is the mutable state of one download: identity,
//! progress, paths, safety classification and completion markers. Records are
//! owned exclusively by the [`crate::manager::DownloadManager`]; everything
//! outside the manager sees them by shared reference or through history
//! snapshots.

mod record;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use record::{CreateInfo, DownloadItem, SaveInfo};

/// Transport error code meaning the server closed the connection.
///
/// Many servers advertise a larger `Content-Length` than the body they send
/// and then close the connection; such transfers are treated as complete.
pub const NET_ERR_CONNECTION_CLOSED: i32 = -100;

/// Interrupt reason for a local file operation that failed.
pub const FILE_FAILED: i32 = 1;

// =============================================================================
// Identity
// =============================================================================

/// Process-local download identifier.
///
/// Allocated by the manager, stable for the record's in-memory lifetime and
/// never reused within one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(pub u32);

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted handle assigned by the history store.
///
/// - [`DbHandle::UNINITIALIZED`] (`-1`) means "not yet persisted".
/// - Fake handles (`<= -2`) are handed out when a record is tracked in memory
///   but not written to the store.
/// - Real handles are positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DbHandle(pub i64);

impl DbHandle {
    /// Sentinel for records the history store has not acknowledged yet.
    pub const UNINITIALIZED: DbHandle = DbHandle(-1);

    /// First handle of the fake (memory-only) range; subsequent fake handles
    /// count downwards from here.
    pub const FIRST_FAKE: DbHandle = DbHandle(-2);

    /// Returns true for any handle other than the sentinel.
    pub fn is_valid(self) -> bool {
        self != Self::UNINITIALIZED
    }

    /// Returns true if the handle refers to a durable store entry.
    pub fn is_persisted(self) -> bool {
        self.0 > 0
    }
}

impl Default for DbHandle {
    fn default() -> Self {
        Self::UNINITIALIZED
    }
}

impl fmt::Display for DbHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// States
// =============================================================================

/// Lifecycle state of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// Receiving bytes (or waiting for a save path).
    InProgress,
    /// All bytes saved and the file moved to its final name.
    Complete,
    /// Cancelled by the user or the network layer.
    Cancelled,
    /// Stopped by a transport error; partial bytes are kept.
    Interrupted,
    /// Being destroyed after explicit removal.
    Removing,
}

impl DownloadState {
    /// Returns true for states a record never leaves except by removal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Interrupted)
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InProgress => "in progress",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
            Self::Interrupted => "interrupted",
            Self::Removing => "removing",
        };
        f.write_str(name)
    }
}

/// Safety classification of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyState {
    /// Nothing suspicious was found.
    #[default]
    Safe,
    /// Dangerous and not yet accepted by the user; blocks completion.
    Dangerous,
    /// Dangerous but explicitly accepted by the user.
    Validated,
}

/// Why a download was classified as dangerous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DangerType {
    #[default]
    NotDangerous,
    /// The file type is risky to open.
    DangerousFile,
    /// The classifier flagged the URL.
    DangerousUrl,
}

/// Outcome reported by the network layer when a response finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Clean end of body.
    Ok,
    /// Connection closed early; treated as a clean end of body.
    ConnectionClosed,
    /// Any other transport error code.
    Failed(i32),
}

impl TransferStatus {
    /// Maps a raw transport error code (`0` for success).
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            NET_ERR_CONNECTION_CLOSED => Self::ConnectionClosed,
            other => Self::Failed(other),
        }
    }

    /// Returns true if the transfer counts as complete.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_handle_ranges() {
        assert!(!DbHandle::UNINITIALIZED.is_valid());
        assert!(!DbHandle::UNINITIALIZED.is_persisted());
        assert!(DbHandle::FIRST_FAKE.is_valid());
        assert!(!DbHandle::FIRST_FAKE.is_persisted());
        assert!(DbHandle(1).is_persisted());
        assert_eq!(DbHandle::default(), DbHandle::UNINITIALIZED);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!DownloadState::InProgress.is_terminal());
        assert!(!DownloadState::Removing.is_terminal());
        assert!(DownloadState::Complete.is_terminal());
        assert!(DownloadState::Cancelled.is_terminal());
        assert!(DownloadState::Interrupted.is_terminal());
    }

    #[test]
    fn test_transfer_status_from_code() {
        assert_eq!(TransferStatus::from_code(0), TransferStatus::Ok);
        assert_eq!(
            TransferStatus::from_code(NET_ERR_CONNECTION_CLOSED),
            TransferStatus::ConnectionClosed
        );
        assert_eq!(TransferStatus::from_code(-7), TransferStatus::Failed(-7));
        assert!(TransferStatus::ConnectionClosed.is_success());
        assert!(!TransferStatus::Failed(-2).is_success());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&DownloadState::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
