use std::path::{Path, PathBuf};

/// Outcome of the uniqueness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Uniquifier {
    /// The suggested path was free (or was never probed).
    #[default]
    None,
    /// ` (n)` was appended to the file stem.
    Applied(u32),
    /// Every candidate up to the limit was taken.
    Exhausted,
}

/// Transient state carried between the stages of path resolution.
///
/// Built from the record when resolution starts, filled in by the owner and
/// I/O stages, and merged back into the record once the probe finishes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathDecision {
    /// The user must pick the location.
    pub prompt_user_for_save_location: bool,

    /// Where the download would be saved without user input.
    pub suggested_path: PathBuf,

    /// Caller-forced destination; disables generation and uniquification.
    pub force_path: Option<PathBuf>,

    pub is_dangerous_file: bool,
    pub is_dangerous_url: bool,

    pub uniquifier: Uniquifier,

    /// Extension or user-script install.
    pub is_extension_install: bool,

    pub has_user_gesture: bool,

    /// Real file name while the bytes sit under an obfuscated name.
    pub target_name: Option<PathBuf>,

    /// Empty reservation file created by the I/O probe.
    pub placeholder: Option<PathBuf>,
}

impl PathDecision {
    pub fn is_dangerous(&self) -> bool {
        self.is_dangerous_file || self.is_dangerous_url
    }

    pub fn forced_path(&self) -> Option<&Path> {
        self.force_path.as_deref()
    }
}
