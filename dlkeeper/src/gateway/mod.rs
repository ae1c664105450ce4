//! Contracts for the manager's external collaborators.
//!
//! Each collaborator is a `Send + Sync` trait object injected through
//! [`crate::manager::Collaborators`]. Asynchronous results come back through
//! a [`crate::executor::Reply`]; a collaborator may fulfil it inline, from
//! another thread, or never.
//!
//! Concrete implementations live next to their trait so the CLI and tests
//! can run the full lifecycle without a browser around them.

pub mod chooser;
pub mod classifier;
pub mod history;
pub mod json_store;
pub mod placement;

pub use chooser::{AcceptSuggestedChooser, FileChooser};
pub use classifier::{ListClassifier, PassThroughClassifier, SafetyClassifier};
pub use history::{HistoryEntry, HistorySnapshot, HistoryStore, MemoryHistoryStore};
pub use json_store::JsonHistoryStore;
pub use placement::{FilePlacement, FinalName, LocalFilePlacement};
