//! dlkeeper CLI - Command-line interface
//!
//! Inspects and maintains the download history, and runs local files through
//! the full download lifecycle.

mod commands;
mod error;
mod prompt;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use commands::common::parse_timestamp;
use commands::fetch::FetchArgs;
use commands::history::ListArgs;
use error::CliError;
use runner::{CliRunner, GlobalArgs};

#[derive(Debug, Parser)]
#[command(name = "dlkeeper", version, about = "Download lifecycle manager")]
struct Cli {
    /// Configuration file (default: <config dir>/dlkeeper/config.ini)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// History file, overriding [history] file from the configuration
    #[arg(long, global = true, value_name = "FILE")]
    history: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List downloads recorded in history
    List {
        /// Only downloads saved under this directory
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Only downloads still in progress
        #[arg(long)]
        current: bool,

        /// Only temporary downloads saved under this directory
        #[arg(long, value_name = "DIR", conflicts_with_all = ["dir", "current"])]
        temporary: Option<PathBuf>,
    },

    /// Search downloads by URL or path (case-insensitive)
    Search {
        /// Text to look for
        query: String,
    },

    /// Remove one finished download from history
    Remove {
        /// History handle, as shown by `list`
        handle: i64,
    },

    /// Remove finished downloads started in a time range
    ///
    /// Without bounds every finished download is removed.
    Prune {
        /// Start of the range (RFC 3339 or YYYY-MM-DD), inclusive
        #[arg(long, value_parser = parse_timestamp)]
        since: Option<DateTime<Utc>>,

        /// End of the range (RFC 3339 or YYYY-MM-DD), exclusive
        #[arg(long, value_parser = parse_timestamp)]
        until: Option<DateTime<Utc>>,
    },

    /// Report finished downloads whose files no longer exist
    CheckFiles,

    /// Copy a local file through the download manager
    Fetch {
        /// File to download
        source: PathBuf,

        /// File name to suggest instead of the source's name
        #[arg(long)]
        name: Option<String>,

        /// Always ask where to save
        #[arg(long)]
        save_as: bool,

        /// URL to record instead of the source's file:// URL
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let runner = CliRunner::new(GlobalArgs {
        config: cli.config,
        history: cli.history,
        verbose: cli.verbose,
    })?;

    match cli.command {
        Commands::List {
            dir,
            current,
            temporary,
        } => {
            commands::history::list(
                &runner,
                ListArgs {
                    dir,
                    current,
                    temporary,
                },
            )
            .await
        }
        Commands::Search { query } => commands::history::search(&runner, query).await,
        Commands::Remove { handle } => commands::history::remove(&runner, handle).await,
        Commands::Prune { since, until } => commands::history::prune(&runner, since, until).await,
        Commands::CheckFiles => commands::history::check_files(&runner).await,
        Commands::Fetch {
            source,
            name,
            save_as,
            url,
        } => {
            commands::fetch::run(
                &runner,
                FetchArgs {
                    source,
                    name,
                    save_as,
                    url,
                },
            )
            .await
        }
    }
}
