//! File-system stage of path resolution.
//!
//! Everything here blocks on the file system and must run on the I/O
//! context, never on the manager's owner task.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use rand::Rng;
use tracing::{debug, warn};

use super::naming::{append_number_to_path, intermediate_path, unconfirmed_name, unique_path_number};
use super::{PathDecision, Uniquifier};

/// Upper bound (inclusive) of the random number in obfuscated names.
pub const UNCONFIRMED_MAX: u32 = 100_000;

const WRITE_PROBE_PREFIX: &str = ".dlkeeper-probe-";

/// Probe the file system for the suggested path and finish the decision.
///
/// - creates `default_dir` if missing;
/// - falls back to `documents_dir` and forces a prompt when the suggested
///   directory is not writable;
/// - parks dangerous downloads under an obfuscated `Unconfirmed <n>` name;
/// - otherwise appends a ` (n)` uniquifier when the name is taken, or forces
///   a prompt when no free name exists;
/// - reserves the chosen name with an empty placeholder file unless the user
///   will be prompted or the path was forced.
pub fn check_suggested_path(
    mut decision: PathDecision,
    default_dir: &Path,
    documents_dir: &Path,
) -> PathDecision {
    if let Err(e) = fs::create_dir_all(default_dir) {
        warn!(dir = %default_dir.display(), error = %e, "Failed to create download directory");
    }

    let file_name = decision
        .suggested_path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_default();

    let dir = parent_dir(&decision.suggested_path);
    if !is_writable(&dir) {
        warn!(
            dir = %dir.display(),
            fallback = %documents_dir.display(),
            "Download directory not writable, prompting"
        );
        decision.prompt_user_for_save_location = true;
        decision.suggested_path = documents_dir.join(&file_name);
    }

    let forced = decision.force_path.is_some();

    if decision.is_dangerous() && !decision.prompt_user_for_save_location {
        let dir = parent_dir(&decision.suggested_path);
        decision.target_name = Some(file_name);
        decision.suggested_path = obfuscated_path(&dir);
    } else if !forced {
        match unique_path_number(&decision.suggested_path) {
            Uniquifier::Applied(n) => {
                decision.suggested_path = append_number_to_path(&decision.suggested_path, n);
                decision.uniquifier = Uniquifier::Applied(n);
            }
            Uniquifier::Exhausted => {
                warn!(
                    path = %decision.suggested_path.display(),
                    "No unique name available, prompting"
                );
                decision.uniquifier = Uniquifier::Exhausted;
                decision.prompt_user_for_save_location = true;
            }
            Uniquifier::None => {}
        }
    }

    if !decision.prompt_user_for_save_location && !forced {
        let reservation = if decision.is_dangerous() {
            decision.suggested_path.clone()
        } else {
            intermediate_path(&decision.suggested_path)
        };
        match create_placeholder(&reservation) {
            Ok(()) => decision.placeholder = Some(reservation),
            Err(e) => {
                warn!(path = %reservation.display(), error = %e, "Failed to reserve download path")
            }
        }
    }

    decision
}

/// Remove a placeholder that was never claimed by a download.
///
/// Files that have received bytes in the meantime are left alone.
pub fn release_placeholder(path: &Path) {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() == 0 => {
            if let Err(e) = fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Failed to remove placeholder");
            } else {
                debug!(path = %path.display(), "Released placeholder");
            }
        }
        Ok(_) => debug!(path = %path.display(), "Placeholder in use, keeping it"),
        Err(_) => {}
    }
}

/// Delete a download's bytes. A missing file is not an error.
pub fn delete_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Deleted download file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete download file"),
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn is_writable(dir: &Path) -> bool {
    let probe = dir.join(format!("{WRITE_PROBE_PREFIX}{}", rand::rng().random::<u32>()));
    match OpenOptions::new().write(true).create_new(true).open(&probe) {
        Ok(_) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => true,
        Err(_) => false,
    }
}

fn obfuscated_path(dir: &Path) -> PathBuf {
    let mut rng = rand::rng();
    loop {
        let candidate = dir.join(unconfirmed_name(rng.random_range(0..=UNCONFIRMED_MAX)));
        if !candidate.exists() {
            return candidate;
        }
    }
}

/// Reserve `path` with an empty file. Fails if the file already exists, so a
/// recorded placeholder is always one this download created.
fn create_placeholder(path: &Path) -> io::Result<()> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn safe_decision(path: PathBuf) -> PathDecision {
        PathDecision {
            suggested_path: path,
            ..PathDecision::default()
        }
    }

    #[test]
    fn test_free_path_reserved_with_partial_placeholder() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("report.pdf");

        let decision = check_suggested_path(safe_decision(path.clone()), temp.path(), temp.path());

        assert_eq!(decision.suggested_path, path);
        assert_eq!(decision.uniquifier, Uniquifier::None);
        assert!(!decision.prompt_user_for_save_location);
        assert_eq!(decision.placeholder, Some(intermediate_path(&path)));
        assert!(intermediate_path(&path).exists());
    }

    #[test]
    fn test_second_resolution_gets_uniquified() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("report.pdf");

        let first = check_suggested_path(safe_decision(path.clone()), temp.path(), temp.path());
        let second = check_suggested_path(safe_decision(path.clone()), temp.path(), temp.path());

        assert_eq!(first.suggested_path, path);
        assert_eq!(second.suggested_path, temp.path().join("report (1).pdf"));
        assert_eq!(second.uniquifier, Uniquifier::Applied(1));
    }

    #[test]
    fn test_dangerous_download_gets_obfuscated_name() {
        let temp = TempDir::new().unwrap();
        let decision = PathDecision {
            suggested_path: temp.path().join("setup.exe"),
            is_dangerous_file: true,
            ..PathDecision::default()
        };

        let decision = check_suggested_path(decision, temp.path(), temp.path());

        let name = decision.suggested_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Unconfirmed "), "{name}");
        assert!(name.ends_with(".partial"), "{name}");
        assert_eq!(decision.target_name, Some(PathBuf::from("setup.exe")));
        assert_eq!(decision.placeholder.as_ref(), Some(&decision.suggested_path));
        assert!(decision.suggested_path.exists());
    }

    #[test]
    fn test_unwritable_directory_falls_back_to_documents() {
        let temp = TempDir::new().unwrap();
        let documents = temp.path().join("Documents");
        fs::create_dir(&documents).unwrap();
        let missing = temp.path().join("gone").join("report.pdf");

        let decision = check_suggested_path(safe_decision(missing), temp.path(), &documents);

        assert!(decision.prompt_user_for_save_location);
        assert_eq!(decision.suggested_path, documents.join("report.pdf"));
        assert!(decision.placeholder.is_none());
    }

    #[test]
    fn test_forced_path_is_not_uniquified_or_reserved() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("exact.bin");
        fs::write(&path, b"old").unwrap();

        let decision = PathDecision {
            suggested_path: path.clone(),
            force_path: Some(path.clone()),
            ..PathDecision::default()
        };
        let decision = check_suggested_path(decision, temp.path(), temp.path());

        assert_eq!(decision.suggested_path, path);
        assert!(decision.placeholder.is_none());
        assert!(!intermediate_path(&path).exists());
    }

    #[test]
    fn test_exhausted_uniquifier_forces_prompt() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        fs::write(&path, b"").unwrap();
        for n in 1..=crate::path::MAX_UNIQUE_FILES {
            fs::write(append_number_to_path(&path, n), b"").unwrap();
        }

        let decision = check_suggested_path(safe_decision(path), temp.path(), temp.path());

        assert!(decision.prompt_user_for_save_location);
        assert_eq!(decision.uniquifier, Uniquifier::Exhausted);
        assert!(decision.placeholder.is_none());
    }

    #[test]
    fn test_creates_default_directory() {
        let temp = TempDir::new().unwrap();
        let default_dir = temp.path().join("Downloads");
        let path = default_dir.join("x.txt");

        check_suggested_path(safe_decision(path), &default_dir, temp.path());

        assert!(default_dir.is_dir());
    }

    #[test]
    fn test_release_placeholder_only_removes_empty_files() {
        let temp = TempDir::new().unwrap();
        let empty = temp.path().join("empty.partial");
        let used = temp.path().join("used.partial");
        fs::write(&empty, b"").unwrap();
        fs::write(&used, b"bytes").unwrap();

        release_placeholder(&empty);
        release_placeholder(&used);
        release_placeholder(&temp.path().join("never-existed"));

        assert!(!empty.exists());
        assert!(used.exists());
    }

    #[test]
    fn test_placeholder_never_claims_existing_file() {
        let temp = TempDir::new().unwrap();
        let taken = temp.path().join("shared.txt.partial");
        fs::write(&taken, b"").unwrap();

        let err = create_placeholder(&taken).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        let fresh = temp.path().join("mine.txt.partial");
        create_placeholder(&fresh).unwrap();
        assert!(fresh.exists());
    }

    #[test]
    fn test_delete_file_tolerates_missing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bytes.partial");
        fs::write(&path, b"x").unwrap();
        delete_file(&path);
        delete_file(&path);
        assert!(!path.exists());
    }
}
