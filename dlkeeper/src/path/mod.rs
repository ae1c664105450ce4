//! Save-path resolution.
//!
//! Resolution runs in two halves:
//!
//! - an owner-side half (in [`crate::manager`]) that generates a file name,
//!   applies the prompt policy and classifies danger using
//!   [`naming`] and [`danger`];
//! - an I/O half ([`resolver::check_suggested_path`]) that probes the file
//!   system, picks an obfuscated or uniquified name and reserves it with a
//!   placeholder file.
//!
//! The state handed between the halves is a [`PathDecision`].

pub mod danger;
mod decision;
pub mod naming;
pub mod resolver;

pub use danger::{file_danger_level, DangerLevel};
pub use decision::{PathDecision, Uniquifier};
pub use naming::{intermediate_path, MAX_UNIQUE_FILES, PARTIAL_SUFFIX};
