//! History inspection and maintenance commands.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dlkeeper::gateway::AcceptSuggestedChooser;
use dlkeeper::{DbHandle, DownloadItem, ManagerError};

use super::common::print_downloads;
use crate::error::CliError;
use crate::runner::{CliRunner, RunningManager};

/// Filters for the list command.
pub struct ListArgs {
    pub dir: Option<PathBuf>,
    pub current: bool,
    pub temporary: Option<PathBuf>,
}

async fn open(runner: &CliRunner, command: &str) -> Result<RunningManager, CliError> {
    runner.log_startup(command);
    runner.start(Arc::new(AcceptSuggestedChooser)).await
}

/// Shut the manager down, then hand back `result`. Its error wins.
async fn finish<T>(running: RunningManager, result: Result<T, CliError>) -> Result<T, CliError> {
    let finished = running.finish().await;
    let value = result?;
    finished?;
    Ok(value)
}

pub async fn list(runner: &CliRunner, args: ListArgs) -> Result<(), CliError> {
    let running = open(runner, "list").await?;
    let items = running
        .with_manager(move |manager| {
            let found = match (&args.temporary, args.current) {
                (Some(dir), _) => manager.get_temporary_downloads(dir),
                (None, true) => manager.get_current_downloads(args.dir.as_deref()),
                (None, false) => manager.get_all_downloads(args.dir.as_deref()),
            };
            found.into_iter().cloned().collect::<Vec<DownloadItem>>()
        })
        .await;
    let items = finish(running, items).await?;

    print_downloads(&items);
    Ok(())
}

pub async fn search(runner: &CliRunner, query: String) -> Result<(), CliError> {
    let running = open(runner, "search").await?;
    let items = running
        .with_manager(move |manager| {
            manager
                .search_downloads(&query)
                .into_iter()
                .cloned()
                .collect::<Vec<DownloadItem>>()
        })
        .await;
    let items = finish(running, items).await?;

    print_downloads(&items);
    Ok(())
}

pub async fn remove(runner: &CliRunner, handle: i64) -> Result<(), CliError> {
    let running = open(runner, "remove").await?;
    let removed = running
        .with_manager(move |manager| manager.remove_download(DbHandle(handle)))
        .await
        .and_then(|result| result.map_err(CliError::from));

    match finish(running, removed).await {
        Ok(true) => {
            println!("Removed download {handle}.");
            Ok(())
        }
        Ok(false) => Err(CliError::NotFound(handle)),
        Err(CliError::Manager(ManagerError::StillActive(_))) => Err(CliError::Incomplete(format!(
            "{handle} is still in progress and cannot be removed"
        ))),
        Err(e) => Err(e),
    }
}

pub async fn prune(
    runner: &CliRunner,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> Result<(), CliError> {
    let running = open(runner, "prune").await?;
    let begin = since.unwrap_or(DateTime::<Utc>::MIN_UTC);
    let removed = running
        .with_manager(move |manager| manager.remove_downloads_between(begin, until))
        .await;
    let removed = finish(running, removed).await?;

    println!("Removed {removed} download(s).");
    Ok(())
}

pub async fn check_files(runner: &CliRunner) -> Result<(), CliError> {
    let running = open(runner, "check-files").await?;
    // `start` has already waited for every file probe.
    let missing = running
        .with_manager(|manager| {
            manager
                .downloads()
                .filter(|item| item.file_externally_removed())
                .cloned()
                .collect::<Vec<DownloadItem>>()
        })
        .await;
    let missing = finish(running, missing).await?;

    if missing.is_empty() {
        println!("All downloaded files are present.");
    } else {
        println!("{} downloaded file(s) are missing:", missing.len());
        println!();
        print_downloads(&missing);
    }
    Ok(())
}
