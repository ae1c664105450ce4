//! Read-only views over the manager's records.

use std::path::Path;

use super::DownloadManager;
use crate::item::{DbHandle, DownloadId, DownloadItem, SafetyState};

/// Aggregate progress of the downloads currently transferring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSummary {
    /// At least one transfer has an unknown size.
    Unknown { in_progress: usize },
    Known {
        in_progress: usize,
        received_bytes: u64,
        total_bytes: u64,
    },
}

impl ProgressSummary {
    pub fn in_progress(&self) -> usize {
        match *self {
            Self::Unknown { in_progress } | Self::Known { in_progress, .. } => in_progress,
        }
    }

    /// Percentage complete, if the total is known and non-zero.
    pub fn percent(&self) -> Option<u8> {
        match *self {
            Self::Known {
                received_bytes,
                total_bytes,
                ..
            } if total_bytes > 0 => {
                let pct = received_bytes.saturating_mul(100) / total_bytes;
                Some(pct.min(100) as u8)
            }
            _ => None,
        }
    }
}

fn in_dir(item: &DownloadItem, dir: &Path) -> bool {
    item.full_path().and_then(Path::parent) == Some(dir)
}

impl DownloadManager {
    pub fn get_download(&self, id: DownloadId) -> Option<&DownloadItem> {
        self.downloads.get(&id)
    }

    pub fn get_download_by_handle(&self, handle: DbHandle) -> Option<&DownloadItem> {
        let id = self.history_index.get(&handle)?;
        self.downloads.get(id)
    }

    /// Every owned record, in id order.
    pub fn downloads(&self) -> impl Iterator<Item = &DownloadItem> {
        self.downloads.values()
    }

    pub fn download_count(&self) -> usize {
        self.downloads.len()
    }

    pub fn is_active(&self, id: DownloadId) -> bool {
        self.active.contains(&id)
    }

    /// Downloads with a path that are still transferring.
    pub fn in_progress_count(&self) -> usize {
        self.in_progress.len()
    }

    fn history_items(&self) -> impl Iterator<Item = &DownloadItem> {
        self.history_index
            .values()
            .filter_map(|id| self.downloads.get(id))
    }

    /// Temporary downloads saved directly in `dir`.
    pub fn get_temporary_downloads(&self, dir: &Path) -> Vec<&DownloadItem> {
        self.history_items()
            .filter(|item| item.is_temporary() && in_dir(item, dir))
            .collect()
    }

    /// Every non-temporary download, optionally restricted to `dir`.
    pub fn get_all_downloads(&self, dir: Option<&Path>) -> Vec<&DownloadItem> {
        self.history_items()
            .filter(|item| !item.is_temporary())
            .filter(|item| dir.map_or(true, |dir| in_dir(item, dir)))
            .collect()
    }

    /// Non-temporary downloads still transferring or awaiting a safety
    /// decision, optionally restricted to `dir`.
    pub fn get_current_downloads(&self, dir: Option<&Path>) -> Vec<&DownloadItem> {
        self.history_items()
            .filter(|item| !item.is_temporary())
            .filter(|item| item.is_partial() || item.safety_state() == SafetyState::Dangerous)
            .filter(|item| dir.map_or(true, |dir| in_dir(item, dir)))
            .collect()
    }

    /// Case-insensitive search over URLs and file names.
    ///
    /// Temporary downloads and extension installs are never returned, nor are
    /// records from another session kind.
    pub fn search_downloads(&self, query: &str) -> Vec<&DownloadItem> {
        let query = query.to_lowercase();
        let otr = self.config.off_the_record;
        self.history_items()
            .filter(|item| !item.is_temporary() && !item.is_extension_install())
            .filter(|item| item.is_otr() == otr)
            .filter(|item| item.matches_query(&query))
            .collect()
    }

    /// Combined progress of the downloads in `in_progress`.
    pub fn progress_summary(&self) -> ProgressSummary {
        let items: Vec<&DownloadItem> = self
            .in_progress
            .iter()
            .filter_map(|id| self.downloads.get(id))
            .collect();
        let in_progress = items.len();

        let mut received_bytes = 0u64;
        let mut total_bytes = 0u64;
        for item in &items {
            match item.total_bytes() {
                Some(total) if total > 0 => {
                    received_bytes = received_bytes.saturating_add(item.received_bytes());
                    total_bytes = total_bytes.saturating_add(total);
                }
                _ => return ProgressSummary::Unknown { in_progress },
            }
        }
        ProgressSummary::Known {
            in_progress,
            received_bytes,
            total_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_requires_known_total() {
        let unknown = ProgressSummary::Unknown { in_progress: 2 };
        assert_eq!(unknown.percent(), None);
        assert_eq!(unknown.in_progress(), 2);

        let known = ProgressSummary::Known {
            in_progress: 1,
            received_bytes: 250,
            total_bytes: 1000,
        };
        assert_eq!(known.percent(), Some(25));

        let empty = ProgressSummary::Known {
            in_progress: 0,
            received_bytes: 0,
            total_bytes: 0,
        };
        assert_eq!(empty.percent(), None);
    }
}
