//! Save-location prompt.

use std::path::{Path, PathBuf};

use crate::executor::Reply;
use crate::item::DownloadId;

/// Asks the user where to save a download.
pub trait FileChooser: Send + Sync {
    /// Show a chooser seeded with `suggested`.
    ///
    /// Reply `Some(path)` when the user picked a location and `None` when
    /// they cancelled. `id` is opaque context for the implementation.
    fn choose_path(&self, id: DownloadId, suggested: &Path, reply: Reply<Option<PathBuf>>);
}

/// Non-interactive chooser that accepts every suggestion.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptSuggestedChooser;

impl FileChooser for AcceptSuggestedChooser {
    fn choose_path(&self, _id: DownloadId, suggested: &Path, reply: Reply<Option<PathBuf>>) {
        reply.send(Some(suggested.to_path_buf()));
    }
}
