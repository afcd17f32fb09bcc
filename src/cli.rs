//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Gate, fetch, and index pages from your browsing history.
///
/// Only URLs permitted by the allow/deny policy are fetched; their readable
/// text is stored in a full-text search index.
#[derive(Parser, Debug)]
#[command(name = "archiver")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import a URL list through the allow/deny policy and archive what passes
    Archive(ArchiveArgs),
    /// Validate the configuration and list the registered plugins
    Check,
    /// Query the page index
    Search(SearchArgs),
}

#[derive(clap::Args, Debug)]
pub struct ArchiveArgs {
    /// Text file with one `URL[<TAB>title]` per line
    pub file: PathBuf,

    /// Maximum number of workers (overrides `import_workers`)
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u16).range(1..=256))]
    pub workers: Option<u16>,

    /// Index into memory instead of Elasticsearch; nothing is kept
    #[arg(long)]
    pub dry_index: bool,

    /// Stop on the first malformed line instead of skipping it
    #[arg(long)]
    pub strict: bool,
}

#[derive(clap::Args, Debug)]
pub struct SearchArgs {
    /// Search terms
    pub query: String,

    /// Maximum number of hits (1-100)
    #[arg(
        short = 'n',
        long,
        default_value_t = 10,
        value_parser = clap::value_parser!(u16).range(1..=100)
    )]
    pub size: u16,
}
