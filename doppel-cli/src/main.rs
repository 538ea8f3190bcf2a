// SPDX-License-Identifier: AGPL-3.0-or-later
//! doppel CLI
//!
//! Compares and synchronizes the folder pairs of a TOML job file.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::SortBy;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "doppel")]
#[command(author, version, about = "doppel - compare and synchronize folder pairs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write warnings, errors and the final summary as JSON lines
    #[arg(long, global = true, value_name = "FILE")]
    log_json: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show how the folders of each pair differ
    #[command(alias = "cmp")]
    Compare {
        /// Job file (defaults to job.toml in the config folder)
        job: Option<PathBuf>,

        /// Include items that are equal on both sides
        #[arg(short, long)]
        all: bool,

        /// Row order
        #[arg(short, long, value_enum, default_value_t = SortBy::Path)]
        sort: SortBy,

        /// Reverse the row order
        #[arg(long)]
        desc: bool,
    },

    /// Show the operations a sync would run
    Preview {
        /// Job file (defaults to job.toml in the config folder)
        job: Option<PathBuf>,
    },

    /// Compare and synchronize
    Sync {
        /// Job file (defaults to job.toml in the config folder)
        job: Option<PathBuf>,

        /// Do not draw a progress bar
        #[arg(long)]
        no_progress: bool,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let log_json = cli.log_json.as_deref();

    let result = match cli.command {
        Commands::Compare { job, all, sort, desc } => {
            commands::compare(job.as_deref(), all, sort, desc, log_json).await
        }
        Commands::Preview { job } => commands::preview(job.as_deref(), log_json).await,
        Commands::Sync { job, no_progress } => commands::sync(job.as_deref(), !no_progress, log_json).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
