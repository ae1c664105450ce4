//! Logging setup for binaries embedding the manager.
//!
//! The library itself only emits `tracing` events. Binaries call
//! [`init_logging`] once at startup to print to stderr and, optionally, to a
//! daily rolling file.

use std::fs;
use std::io;
use std::path::Path;

pub use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// File name prefix of rolling log files.
pub const LOG_FILE_PREFIX: &str = "dlkeeper.log";

/// Default filter: `RUST_LOG` if set, else `info` (or `debug` when verbose).
pub fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "info" })
    })
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be kept alive
/// for as long as logging is needed. Installing twice is harmless; the second
/// subscriber is ignored.
pub fn init_logging(verbose: bool, log_dir: Option<&Path>) -> io::Result<Option<WorkerGuard>> {
    let stderr_layer = fmt::layer().with_writer(io::stderr).with_target(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    Ok(guard)
}
