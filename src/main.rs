//! CLI entry point for the history archiver.

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

mod cli;
mod commands;
mod config;

use cli::{Args, Command};
use commands::{run_archive_command, run_check_command, run_search_command};
use config::load_settings;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let loaded = load_settings(args.config.as_deref())?;
    if let Some(path) = loaded.path.as_deref().filter(|_| loaded.loaded_from_file) {
        debug!(path = %path.display(), "config loaded");
    }

    match &args.command {
        Command::Archive(archive) => {
            info!(file = %archive.file.display(), "Archiver starting");
            run_archive_command(archive, &loaded.settings).await
        }
        Command::Check => run_check_command(&loaded),
        Command::Search(search) => run_search_command(search, &loaded.settings).await,
    }
}
