//! Worker pool that downloads, extracts and indexes a backlog of history items.
//!
//! # Architecture
//!
//! - [`WorkQueue`] - shared FIFO preloaded with the whole backlog
//! - [`Archiver`] - sizes and spawns the workers, tracks completion, handles cancellation
//! - [`process_item`] - one item through the pipeline plus its index and history writes
//! - [`ArchiveStats`] - counters updated by the workers

mod orchestrator;
mod process;
mod queue;

pub use orchestrator::{ArchiveOptions, Archiver, CancelToken};
pub use process::{IndexDuplicateCheck, ItemOutcome, process_item};
pub use queue::{Pop, WorkQueue};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use thiserror::Error;

use crate::error::StoreError;
use crate::index::IndexError;
use crate::pipeline::PipelineError;
use crate::plugin::PluginError;

/// Errors raised while archiving.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to index page: {0}")]
    Index(#[from] IndexError),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ArchiveError {
    /// Returns true when the worker hitting this error cannot process further items.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Store(err) => err.is_fatal(),
            Self::Pipeline(PipelineError::NotEntered) | Self::Plugin(_) => true,
            _ => false,
        }
    }

    /// Returns true when the item may succeed if processed again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_transient())
    }
}

/// Number of workers for a backlog: half the backlog, capped at `max`, at least one.
#[must_use]
pub fn worker_count(backlog: usize, max: usize) -> usize {
    (backlog / 2).min(max).max(1)
}

/// Default worker cap: half the available CPUs, at least one.
#[must_use]
pub fn default_import_workers() -> usize {
    std::thread::available_parallelism()
        .map_or(1, |cpus| cpus.get() / 2)
        .max(1)
}

/// Counters shared by the archive workers.
#[derive(Debug, Default)]
pub struct ArchiveStats {
    archived: AtomicUsize,
    duplicates: AtomicUsize,
    failed: AtomicUsize,
    worker_errors: AtomicUsize,
    canceled: AtomicBool,
}

impl ArchiveStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages newly written to the index.
    #[must_use]
    pub fn archived(&self) -> usize {
        self.archived.load(Ordering::SeqCst)
    }

    /// Pages whose content was already in the index.
    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.duplicates.load(Ordering::SeqCst)
    }

    /// Items that produced nothing to index, including per-item errors.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Workers that stopped early on a fatal error or a panic.
    #[must_use]
    pub fn worker_errors(&self) -> usize {
        self.worker_errors.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Items handled, whatever the outcome.
    #[must_use]
    pub fn total(&self) -> usize {
        self.archived() + self.duplicates() + self.failed()
    }

    fn record(&self, outcome: ItemOutcome) {
        let counter = match outcome {
            ItemOutcome::Archived => &self.archived,
            ItemOutcome::Duplicate => &self.duplicates,
            ItemOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_worker_errors(&self) {
        self.worker_errors.fetch_add(1, Ordering::SeqCst);
    }

    fn mark_canceled(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    fn snapshot(&self) -> Self {
        Self {
            archived: AtomicUsize::new(self.archived()),
            duplicates: AtomicUsize::new(self.duplicates()),
            failed: AtomicUsize::new(self.failed()),
            worker_errors: AtomicUsize::new(self.worker_errors()),
            canceled: AtomicBool::new(self.canceled()),
        }
    }
}
