//! Subcommand implementations.

pub mod common;
pub mod fetch;
pub mod history;
