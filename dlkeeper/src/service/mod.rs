//! Running a manager on its own tokio task.
//!
//! [`DownloadService::spawn`] moves a [`DownloadManager`] onto a task that
//! drains its inbox until cancelled. Everything else talks to it through the
//! returned [`ServiceHandle`]: network-layer events are sent as-is, and
//! arbitrary owner-side work runs through [`ServiceHandle::with_manager`].

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ServiceError;
use crate::executor::{EventReceiver, EventSender, ManagerEvent, OwnerTask};
use crate::item::{CreateInfo, DownloadId, TransferStatus};
use crate::manager::DownloadManager;

/// Spawns the owner task.
pub struct DownloadService;

impl DownloadService {
    /// Run `manager` on the current tokio runtime.
    ///
    /// The manager is initialized on the task if it has not been already.
    /// When the handle is shut down the manager is shut down as well and
    /// handed back.
    pub fn spawn(manager: DownloadManager, receiver: EventReceiver) -> ServiceHandle {
        let cancellation = CancellationToken::new();
        let sender = manager.event_sender();
        let task = tokio::spawn(run(manager, receiver, cancellation.clone()));
        ServiceHandle {
            sender,
            cancellation,
            task,
        }
    }
}

async fn run(
    mut manager: DownloadManager,
    mut receiver: EventReceiver,
    cancellation: CancellationToken,
) -> DownloadManager {
    if let Err(e) = manager.initialize() {
        debug!(error = %e, "Manager already initialized");
    }
    info!("Download service started");

    loop {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            event = receiver.recv() => match event {
                Some(event) => manager.handle_event(event),
                None => break,
            },
        }
    }

    // Work queued before the stop request still runs.
    manager.drain(&mut receiver);
    manager.shutdown();
    info!("Download service stopped");
    manager
}

/// Client side of a running [`DownloadService`].
pub struct ServiceHandle {
    sender: EventSender,
    cancellation: CancellationToken,
    task: JoinHandle<DownloadManager>,
}

impl ServiceHandle {
    /// A sender other tasks can use to feed the manager.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn send(&self, event: ManagerEvent) -> Result<(), ServiceError> {
        if self.cancellation.is_cancelled() {
            return Err(ServiceError::Stopped);
        }
        self.sender.send(event).map_err(|_| ServiceError::Stopped)
    }

    pub fn create_download(&self, info: CreateInfo) -> Result<(), ServiceError> {
        self.send(ManagerEvent::DownloadCreated(info))
    }

    pub fn start_download(&self, id: DownloadId) -> Result<(), ServiceError> {
        self.send(ManagerEvent::StartDownload(id))
    }

    pub fn update_download(&self, id: DownloadId, received_bytes: u64) -> Result<(), ServiceError> {
        self.send(ManagerEvent::Progress { id, received_bytes })
    }

    pub fn response_completed(
        &self,
        id: DownloadId,
        size: u64,
        status: TransferStatus,
        hash: Option<String>,
    ) -> Result<(), ServiceError> {
        self.send(ManagerEvent::ResponseCompleted {
            id,
            size,
            status,
            hash,
        })
    }

    pub fn cancel_download(&self, id: DownloadId) -> Result<(), ServiceError> {
        self.send(ManagerEvent::Cancelled(id))
    }

    /// Run `f` on the owner task and wait for its result.
    ///
    /// `f` runs after every event sent before this call.
    pub async fn with_manager<R, F>(&self, f: F) -> Result<R, ServiceError>
    where
        R: Send + 'static,
        F: FnOnce(&mut DownloadManager) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send(ManagerEvent::Run(OwnerTask::new("with_manager", move |manager| {
            let _ = tx.send(f(manager));
        })))?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }

    /// Stop the service and return the shut-down manager.
    pub async fn shutdown(self) -> Result<DownloadManager, ServiceError> {
        self.cancellation.cancel();
        Ok(self.task.await?)
    }
}
