//! Fetch command - run a local file through the full download lifecycle.
//!
//! The file plays the part of a network response: it is read in chunks that
//! are appended through the file placement, progress is reported to the
//! manager and the SHA-256 of the content is handed over with the final
//! response. Everything else (safety checks, the save prompt, intermediate
//! and final names, history) is the manager's normal path.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use dlkeeper::executor::EventSender;
use dlkeeper::gateway::LocalFilePlacement;
use dlkeeper::{
    CreateInfo, DownloadId, DownloadItem, DownloadState, ManagerEvent, SafetyState, TransferStatus,
};

use super::common::format_size;
use crate::error::CliError;
use crate::prompt::{confirm_dangerous, TerminalChooser};
use crate::runner::{CliRunner, RunningManager};

const CHUNK_SIZE: usize = 64 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const PROGRESS_TEMPLATE: &str = "{spinner} [{elapsed_precise}] [{bar:40}] {bytes}/{total_bytes} ({eta})";

/// Arguments for the fetch command.
pub struct FetchArgs {
    pub source: PathBuf,
    pub name: Option<String>,
    pub save_as: bool,
    pub url: Option<String>,
}

/// Run the fetch command.
pub async fn run(runner: &CliRunner, args: FetchArgs) -> Result<(), CliError> {
    runner.log_startup("fetch");

    let source_err = |source| CliError::Source {
        path: args.source.clone(),
        source,
    };
    let source = args.source.canonicalize().map_err(source_err)?;
    let size = fs::metadata(&source).map_err(source_err)?.len();

    debug!(
        source = %source.display(),
        download_dir = %runner.config().prefs.download_dir.display(),
        "Fetching local file"
    );

    let running = runner.start(Arc::new(TerminalChooser)).await?;
    let result = fetch(&running, &args, &source, size).await;
    let finished = running.finish().await;

    let outcome = result?;
    finished?;
    report(&outcome)
}

/// How a fetch ended.
enum Outcome {
    Finished(DownloadItem),
    /// The record was discarded (prompt cancelled or rejected as dangerous).
    Discarded,
}

async fn fetch(
    running: &RunningManager,
    args: &FetchArgs,
    source: &Path,
    size: u64,
) -> Result<Outcome, CliError> {
    let service = running.service();
    let id = running.with_manager(|manager| manager.next_download_id()).await?;

    let url = args
        .url
        .clone()
        .unwrap_or_else(|| format!("file://{}", source.display()));
    let name = args.name.clone().or_else(|| {
        source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    });

    let mut info = CreateInfo::new(id, url)
        .with_total_bytes(size)
        .with_user_gesture(true);
    if let Some(name) = name {
        info = info.with_suggested_filename(name);
    }
    if args.save_as {
        info = info.with_save_as();
    }
    service.create_download(info)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        let sender = service.sender();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
            let _ = sender.send(ManagerEvent::Cancelled(id));
        })?;
    }

    service.start_download(id)?;

    // Settle the save location before any bytes flow so the prompt does not
    // fight with the progress bar.
    let Some(item) = wait_until(running, id, |item| {
        item.full_path().is_some() || item.is_terminal()
    })
    .await?
    else {
        return Ok(Outcome::Discarded);
    };
    if item.is_terminal() {
        return Ok(Outcome::Finished(item));
    }
    debug!(download_id = %id, path = ?item.full_path(), "Save location settled");

    let placement = running.placement();
    let sender = service.sender();
    let reader = Arc::clone(&interrupted);
    let source = source.to_path_buf();
    let streamed =
        tokio::task::spawn_blocking(move || stream_file(&source, id, size, &placement, &sender, &reader))
            .await??;

    let Some((received, hash)) = streamed else {
        // Ctrl+C already queued the cancel.
        return finished_or_discarded(running, id).await;
    };
    service.response_completed(id, received, TransferStatus::Ok, Some(hash))?;
    running.settle().await?;

    let item = running
        .with_manager(move |manager| manager.get_download(id).cloned())
        .await?;
    if let Some(item) = item.filter(|i| i.is_in_progress() && i.safety_state() == SafetyState::Dangerous) {
        let file_name = item
            .target_path()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| item.url().to_string());
        let keep = tokio::task::spawn_blocking(move || confirm_dangerous(&file_name)).await??;

        if keep {
            running
                .with_manager(move |manager| manager.validate_dangerous_download(id))
                .await??;
        } else {
            running
                .with_manager(move |manager| manager.discard_download(id))
                .await??;
            return Ok(Outcome::Discarded);
        }
    }

    finished_or_discarded(running, id).await
}

async fn finished_or_discarded(running: &RunningManager, id: DownloadId) -> Result<Outcome, CliError> {
    Ok(wait_until(running, id, DownloadItem::is_terminal)
        .await?
        .map_or(Outcome::Discarded, Outcome::Finished))
}

/// Poll until `done` holds for the record. `None` if the record went away.
async fn wait_until<F>(
    running: &RunningManager,
    id: DownloadId,
    done: F,
) -> Result<Option<DownloadItem>, CliError>
where
    F: Fn(&DownloadItem) -> bool,
{
    loop {
        let item = running
            .with_manager(move |manager| manager.get_download(id).cloned())
            .await?;
        match item {
            None => return Ok(None),
            Some(item) if done(&item) => return Ok(Some(item)),
            Some(_) => tokio::time::sleep(POLL_INTERVAL).await,
        }
    }
}

/// Feed `source` to the placement in chunks. Returns the byte count and the
/// hex SHA-256, or `None` if interrupted.
fn stream_file(
    source: &Path,
    id: DownloadId,
    size: u64,
    placement: &LocalFilePlacement,
    sender: &EventSender,
    interrupted: &AtomicBool,
) -> Result<Option<(u64, String)>, CliError> {
    let source_err = |e| CliError::Source {
        path: source.to_path_buf(),
        source: e,
    };
    let mut file = File::open(source).map_err(source_err)?;

    let progress = ProgressBar::new(size);
    progress.set_style(
        ProgressStyle::default_bar()
            .template(PROGRESS_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut received = 0u64;

    loop {
        if interrupted.load(Ordering::SeqCst) {
            progress.abandon_with_message("interrupted");
            return Ok(None);
        }
        let n = file.read(&mut buffer).map_err(source_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        placement.append(id, buffer[..n].to_vec());
        received += n as u64;
        let _ = sender.send(ManagerEvent::Progress {
            id,
            received_bytes: received,
        });
        progress.set_position(received);
    }

    progress.finish_and_clear();
    let hash = hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();
    Ok(Some((received, hash)))
}

fn report(outcome: &Outcome) -> Result<(), CliError> {
    let item = match outcome {
        Outcome::Discarded => {
            println!("Download discarded.");
            return Ok(());
        }
        Outcome::Finished(item) => item,
    };

    match item.state() {
        DownloadState::Complete => {
            let path = item
                .full_path()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            info!(download_id = %item.id(), path = %path, "Fetch complete");
            println!("Saved {} ({})", path, format_size(item.received_bytes()));
            if let Some(hash) = item.hash() {
                println!("SHA-256: {hash}");
            }
            Ok(())
        }
        DownloadState::Cancelled => Err(CliError::Incomplete("cancelled".to_string())),
        DownloadState::Interrupted => Err(CliError::Incomplete(format!(
            "interrupted with code {}",
            item.interrupt_reason().unwrap_or_default()
        ))),
        state => Err(CliError::Incomplete(format!("ended in state {state}"))),
    }
}
