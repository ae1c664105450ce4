//! Shared command setup: configuration, logging and a running manager.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::info;

use dlkeeper::config::ConfigFile;
use dlkeeper::error::ServiceError;
use dlkeeper::executor::{IoContext, IoTask, IoThread};
use dlkeeper::gateway::{FileChooser, JsonHistoryStore, ListClassifier, LocalFilePlacement};
use dlkeeper::logging::{init_logging, WorkerGuard};
use dlkeeper::{Collaborators, DownloadManager, DownloadService, ServiceHandle};

use crate::error::CliError;

/// Options shared by every subcommand.
pub struct GlobalArgs {
    pub config: Option<PathBuf>,
    pub history: Option<PathBuf>,
    pub verbose: bool,
}

/// Loaded configuration plus the logging guard.
pub struct CliRunner {
    config: ConfigFile,
    config_path: PathBuf,
    _log_guard: Option<WorkerGuard>,
}

impl CliRunner {
    pub fn new(args: GlobalArgs) -> Result<Self, CliError> {
        let config_path = args.config.unwrap_or_else(ConfigFile::default_path);
        let mut config = ConfigFile::load(&config_path)?;
        if let Some(history) = args.history {
            config.history_file = history;
        }

        let log_guard =
            init_logging(args.verbose, config.log_dir.as_deref()).map_err(CliError::Logging)?;

        Ok(Self {
            config,
            config_path,
            _log_guard: log_guard,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            command,
            version = env!("CARGO_PKG_VERSION"),
            config = %self.config_path.display(),
            history = %self.config.history_file.display(),
            "dlkeeper starting"
        );
    }

    /// Open the configured history and run a manager over it.
    ///
    /// Returns once the history is loaded and every completed download's
    /// file has been checked.
    pub async fn start(&self, chooser: Arc<dyn FileChooser>) -> Result<RunningManager, CliError> {
        let io = Arc::new(IoThread::spawn("dlkeeper-io").map_err(CliError::IoThread)?);
        let history = Arc::new(JsonHistoryStore::open(&self.config.history_file, io.clone())?);
        let placement = Arc::new(LocalFilePlacement::new(env::temp_dir(), io.clone()));
        let classifier = Arc::new(ListClassifier::new(
            self.config.classifier.blocked_hosts.clone(),
            self.config.classifier.blocked_hashes.clone(),
        ));

        let collaborators = Collaborators {
            classifier,
            history,
            placement: placement.clone(),
            chooser,
            io: io.clone(),
        };
        let (mut manager, receiver) = DownloadManager::new(self.config.manager_config(), collaborators);
        // Queue the history load ahead of anything the command sends.
        manager.initialize()?;

        let running = RunningManager {
            service: DownloadService::spawn(manager, receiver),
            io,
            placement,
        };
        running.settle().await?;
        Ok(running)
    }
}

/// A manager running on its own task, plus the I/O thread it uses.
pub struct RunningManager {
    service: ServiceHandle,
    io: Arc<IoThread>,
    placement: Arc<LocalFilePlacement>,
}

impl RunningManager {
    pub fn service(&self) -> &ServiceHandle {
        &self.service
    }

    pub fn placement(&self) -> Arc<LocalFilePlacement> {
        Arc::clone(&self.placement)
    }

    pub async fn with_manager<R, F>(&self, f: F) -> Result<R, CliError>
    where
        R: Send + 'static,
        F: FnOnce(&mut DownloadManager) -> R + Send + 'static,
    {
        Ok(self.service.with_manager(f).await?)
    }

    /// Wait until the manager has handled everything queued so far,
    /// including replies from I/O work it has already posted.
    pub async fn settle(&self) -> Result<(), CliError> {
        self.with_manager(|_| ()).await?;
        io_barrier(self.io.as_ref()).await?;
        self.with_manager(|_| ()).await
    }

    /// Shut the manager down and wait for pending history writes.
    pub async fn finish(self) -> Result<(), CliError> {
        let manager = self.service.shutdown().await?;
        drop(manager);
        io_barrier(self.io.as_ref()).await
    }
}

/// Resolve once every task posted to `io` before the call has run.
async fn io_barrier(io: &dyn IoContext) -> Result<(), CliError> {
    let (tx, rx) = oneshot::channel();
    io.post(IoTask::new("barrier", move || {
        let _ = tx.send(());
    }));
    rx.await.map_err(|_| CliError::Service(ServiceError::Stopped))
}
