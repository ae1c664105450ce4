//! dlkeeper - download lifecycle management
//!
//! This library tracks every in-flight and historical download of a browsing
//! session. A single [`manager::DownloadManager`] owns all download records and
//! drives each one through its state machine in response to events from the
//! network layer, the safety classifier, the history store, the file chooser
//! and the file-placement subsystem.
//!
//! # Architecture
//!
//! ```text
//!   network ──► DownloadManager ──► SafetyClassifier ──┐
//!                    ▲  │                               │ Reply<bool>
//!                    │  ├──► IoContext (path probes) ───┤ Reply<PathDecision>
//!    ManagerEvent    │  ├──► FileChooser ───────────────┤ Reply<Option<PathBuf>>
//!    (owner inbox)   │  ├──► HistoryStore ──────────────┤ Reply<DbHandle>
//!                    │  └──► FilePlacement ─────────────┤ Reply<io::Result<FinalName>>
//!                    └──────────────────────────────────┘
//! ```
//!
//! Every collaborator reports back through a [`executor::Reply`], which turns
//! the result into a [`executor::ManagerEvent`] on the manager's inbox. The
//! manager drains its inbox on one owner task, so no record is ever touched
//! from two threads. File-system work is posted to an [`executor::IoContext`].

pub mod config;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod item;
pub mod logging;
pub mod manager;
pub mod observer;
pub mod path;
pub mod service;
pub mod session;

pub use config::{ConfigFile, DownloadPrefs, GalleryConfig, ManagerConfig};
pub use error::{ManagerError, ManagerResult};
pub use executor::{EventReceiver, IoContext, ManagerEvent, Reply};
pub use item::{
    CreateInfo, DangerType, DbHandle, DownloadId, DownloadItem, DownloadState, SafetyState,
    TransferStatus,
};
pub use manager::{Collaborators, ConsistencyError, DownloadManager, ProgressSummary};
pub use observer::{DownloadObserver, ObserverId};
pub use service::{DownloadService, ServiceHandle};
pub use session::{DownloadSession, SessionKind};
