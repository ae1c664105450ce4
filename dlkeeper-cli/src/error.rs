//! CLI error type.

use std::io;
use std::path::PathBuf;

use dlkeeper::config::ConfigError;
use dlkeeper::error::{HistoryError, ServiceError};
use dlkeeper::ManagerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("failed to set up logging: {0}")]
    Logging(#[source] io::Error),

    #[error("failed to start I/O thread: {0}")]
    IoThread(#[source] io::Error),

    #[error("cannot read {}: {source}", path.display())]
    Source { path: PathBuf, source: io::Error },

    #[error("no download with handle {0}")]
    NotFound(i64),

    #[error("download {0}")]
    Incomplete(String),

    #[error("failed to install Ctrl+C handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
