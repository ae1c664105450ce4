//! Ownership of a download's bytes on disk.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::executor::{IoContext, IoTask, Reply};
use crate::item::DownloadId;
use crate::path::naming::append_number_to_path;
use crate::path::{Uniquifier, MAX_UNIQUE_FILES};

/// Where a completed download ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalName {
    pub path: PathBuf,
    /// ` (n)` suffix applied during the final rename, 0 for none.
    pub uniquifier: u32,
}

/// Directives to the component that owns the bytes.
pub trait FilePlacement: Send + Sync {
    /// Move the in-progress bytes to `path`.
    fn rename_to_intermediate(&self, id: DownloadId, path: &Path);

    /// Move the finished bytes to `target`, finding a free name first when
    /// `uniquify` is set, and reply with where they landed.
    ///
    /// Every call must be answered; an error interrupts the download.
    fn rename_to_final(
        &self,
        id: DownloadId,
        target: &Path,
        uniquify: bool,
        reply: Reply<io::Result<FinalName>>,
    );

    /// Stop tracking a cancelled or interrupted download. Partial bytes stay.
    fn cancel(&self, id: DownloadId);

    /// Stop tracking a completed download.
    fn complete_and_release(&self, id: DownloadId);

    /// The manager is going away; release everything.
    fn manager_shutdown(&self) {}
}

// =============================================================================
// Local file placement
// =============================================================================

/// Writes download bytes to local files.
///
/// Bytes appended before the save path is known go to a staging file in
/// `staging_dir`. All file operations run on the I/O context so appends and
/// renames for one download never overtake each other.
pub struct LocalFilePlacement {
    staging_dir: PathBuf,
    io: Arc<dyn IoContext>,
    files: Arc<Mutex<HashMap<DownloadId, PathBuf>>>,
}

impl LocalFilePlacement {
    pub fn new(staging_dir: impl Into<PathBuf>, io: Arc<dyn IoContext>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            io,
            files: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Current on-disk location of a tracked download.
    pub fn current_path(&self, id: DownloadId) -> Option<PathBuf> {
        self.files.lock().get(&id).cloned()
    }

    /// Append bytes to a download's current file.
    pub fn append(&self, id: DownloadId, data: Vec<u8>) {
        let files = Arc::clone(&self.files);
        let staging = self.staging_path(id);
        self.io.post(IoTask::new("append", move || {
            let path = files.lock().entry(id).or_insert(staging).clone();
            if let Err(e) = append_to(&path, &data) {
                warn!(download_id = %id, path = %path.display(), error = %e, "Failed to write download bytes");
            }
        }));
    }

    fn staging_path(&self, id: DownloadId) -> PathBuf {
        self.staging_dir.join(format!(".dlkeeper-{id}.tmp"))
    }
}

impl FilePlacement for LocalFilePlacement {
    fn rename_to_intermediate(&self, id: DownloadId, path: &Path) {
        let files = Arc::clone(&self.files);
        let staging = self.staging_path(id);
        let target = path.to_path_buf();
        self.io.post(IoTask::new("rename_to_intermediate", move || {
            let current = files.lock().get(&id).cloned().unwrap_or(staging);
            if current != target {
                match move_file(&current, &target) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        // Nothing written yet; start fresh at the target.
                    }
                    Err(e) => {
                        warn!(download_id = %id, error = %e, "Intermediate rename failed");
                        return;
                    }
                }
            }
            debug!(download_id = %id, path = %target.display(), "Renamed to intermediate name");
            files.lock().insert(id, target);
        }));
    }

    fn rename_to_final(
        &self,
        id: DownloadId,
        target: &Path,
        uniquify: bool,
        reply: Reply<io::Result<FinalName>>,
    ) {
        let files = Arc::clone(&self.files);
        let target = target.to_path_buf();
        self.io.post(IoTask::new("rename_to_final", move || {
            let result = finalize(&files, id, target, uniquify);
            match &result {
                Ok(name) => {
                    debug!(download_id = %id, path = %name.path.display(), "Renamed to final name")
                }
                Err(e) => warn!(download_id = %id, error = %e, "Final rename failed"),
            }
            reply.send(result);
        }));
    }

    fn cancel(&self, id: DownloadId) {
        let files = Arc::clone(&self.files);
        self.io.post(IoTask::new("cancel", move || {
            files.lock().remove(&id);
        }));
    }

    fn complete_and_release(&self, id: DownloadId) {
        let files = Arc::clone(&self.files);
        self.io.post(IoTask::new("complete_and_release", move || {
            files.lock().remove(&id);
        }));
    }

    fn manager_shutdown(&self) {
        let files = Arc::clone(&self.files);
        self.io.post(IoTask::new("placement_shutdown", move || {
            files.lock().clear();
        }));
    }
}

fn finalize(
    files: &Mutex<HashMap<DownloadId, PathBuf>>,
    id: DownloadId,
    target: PathBuf,
    uniquify: bool,
) -> io::Result<FinalName> {
    let current = files.lock().get(&id).cloned().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("download {id} has no file"))
    })?;

    let (destination, uniquifier) = if uniquify && current != target {
        match free_name(&target) {
            Uniquifier::Applied(n) => (append_number_to_path(&target, n), n),
            _ => (target, 0),
        }
    } else {
        (target, 0)
    };

    if current != destination {
        match move_file(&current, &destination) {
            Ok(()) => {}
            // Nothing was ever written: the download is empty.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                File::create(&destination)?;
            }
            Err(e) => return Err(e),
        }
    } else if !destination.exists() {
        File::create(&destination)?;
    }
    files.lock().insert(id, destination.clone());
    Ok(FinalName {
        path: destination,
        uniquifier,
    })
}

/// Like `unique_path_number`, but only the final name itself has to be free.
fn free_name(target: &Path) -> Uniquifier {
    if !target.exists() {
        return Uniquifier::None;
    }
    (1..=MAX_UNIQUE_FILES)
        .find(|n| !append_number_to_path(target, *n).exists())
        .map_or(Uniquifier::Exhausted, Uniquifier::Applied)
}

fn append_to(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(data)
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        // Cross-device moves cannot be renamed.
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{DeferredIoContext, Mailbox, ManagerEvent};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<DeferredIoContext>, LocalFilePlacement) {
        let temp = TempDir::new().unwrap();
        let io = Arc::new(DeferredIoContext::new());
        let placement = LocalFilePlacement::new(temp.path(), io.clone());
        (temp, io, placement)
    }

    fn final_reply(mailbox: &Mailbox) -> Reply<io::Result<FinalName>> {
        mailbox.reply(|result| match result {
            Ok(name) => ManagerEvent::RenamedToFinal {
                id: DownloadId(1),
                name,
            },
            Err(error) => ManagerEvent::FinalRenameFailed {
                id: DownloadId(1),
                error,
            },
        })
    }

    #[test]
    fn test_staged_bytes_follow_renames() {
        let (temp, io, placement) = setup();
        let id = DownloadId(1);
        let intermediate = temp.path().join("report.pdf.partial");
        let target = temp.path().join("report.pdf");

        placement.append(id, b"hello ".to_vec());
        placement.rename_to_intermediate(id, &intermediate);
        placement.append(id, b"world".to_vec());

        let (mailbox, mut rx) = Mailbox::new();
        placement.rename_to_final(id, &target, false, final_reply(&mailbox));
        io.run_pending();

        assert_eq!(fs::read(&target).unwrap(), b"hello world");
        assert!(!intermediate.exists());
        match rx.try_recv().unwrap() {
            ManagerEvent::RenamedToFinal { name, .. } => {
                assert_eq!(name, FinalName { path: target, uniquifier: 0 });
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_intermediate_rename_replaces_placeholder() {
        let (temp, io, placement) = setup();
        let id = DownloadId(2);
        let intermediate = temp.path().join("a.txt.partial");
        fs::write(&intermediate, b"").unwrap();

        placement.append(id, b"data".to_vec());
        placement.rename_to_intermediate(id, &intermediate);
        io.run_pending();

        assert_eq!(fs::read(&intermediate).unwrap(), b"data");
        assert_eq!(placement.current_path(id), Some(intermediate));
    }

    #[test]
    fn test_uniquify_on_final_rename() {
        let (temp, io, placement) = setup();
        let id = DownloadId(3);
        let parked = temp.path().join("Unconfirmed 7.partial");
        let target = temp.path().join("setup.exe");
        fs::write(&target, b"older").unwrap();

        placement.append(id, b"new".to_vec());
        placement.rename_to_intermediate(id, &parked);
        let (mailbox, mut rx) = Mailbox::new();
        placement.rename_to_final(id, &target, true, final_reply(&mailbox));
        io.run_pending();

        let expected = temp.path().join("setup (1).exe");
        assert_eq!(fs::read(&expected).unwrap(), b"new");
        assert_eq!(fs::read(&target).unwrap(), b"older");
        assert!(matches!(
            rx.try_recv().unwrap(),
            ManagerEvent::RenamedToFinal { name: FinalName { uniquifier: 1, .. }, .. }
        ));
    }

    #[test]
    fn test_cancel_keeps_partial_bytes() {
        let (temp, io, placement) = setup();
        let id = DownloadId(4);
        let intermediate = temp.path().join("big.iso.partial");

        placement.append(id, b"part".to_vec());
        placement.rename_to_intermediate(id, &intermediate);
        placement.cancel(id);
        io.run_pending();

        assert!(intermediate.exists());
        assert!(placement.current_path(id).is_none());
    }

    #[test]
    fn test_empty_download_gets_empty_final_file() {
        let (temp, io, placement) = setup();
        let id = DownloadId(5);
        let intermediate = temp.path().join("empty.txt.partial");
        let target = temp.path().join("empty.txt");

        placement.rename_to_intermediate(id, &intermediate);
        let (mailbox, mut rx) = Mailbox::new();
        placement.rename_to_final(id, &target, false, final_reply(&mailbox));
        io.run_pending();

        assert_eq!(fs::read(&target).unwrap(), b"");
        assert!(!intermediate.exists());
        assert!(matches!(
            rx.try_recv().unwrap(),
            ManagerEvent::RenamedToFinal { name: FinalName { uniquifier: 0, .. }, .. }
        ));
    }

    #[test]
    fn test_final_rename_failure_is_reported() {
        let (temp, io, placement) = setup();
        let id = DownloadId(6);
        let intermediate = temp.path().join("gone").join("a.bin.partial");
        let target = temp.path().join("gone").join("a.bin");

        // The directory never existed, so neither the move nor the empty
        // file can happen.
        placement.rename_to_intermediate(id, &intermediate);
        let (mailbox, mut rx) = Mailbox::new();
        placement.rename_to_final(id, &target, false, final_reply(&mailbox));
        io.run_pending();

        assert!(!target.exists());
        assert!(matches!(
            rx.try_recv().unwrap(),
            ManagerEvent::FinalRenameFailed { .. }
        ));
    }

    #[test]
    fn test_final_rename_of_untracked_download_is_reported() {
        let (temp, io, placement) = setup();
        let (mailbox, mut rx) = Mailbox::new();
        placement.rename_to_final(DownloadId(7), &temp.path().join("x"), false, final_reply(&mailbox));
        io.run_pending();

        match rx.try_recv().unwrap() {
            ManagerEvent::FinalRenameFailed { error, .. } => {
                assert_eq!(error.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
