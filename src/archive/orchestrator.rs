use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use super::{
    ArchiveError, ArchiveStats, ItemOutcome, Pop, WorkQueue, default_import_workers, process_item,
    worker_count,
};
use crate::history::{HistoryItem, HistoryStore};
use crate::index::SearchIndex;
use crate::pipeline::Pipeline;
use crate::plugin::{PipelineConfig, PluginContext, PluginRegistry};

/// Default interval between completion checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time a worker waits on an empty, still open queue.
pub const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(250);

/// Default wait for each shutdown phase.
pub const GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Tuning for an archive run.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub max_workers: usize,
    pub poll_interval: Duration,
    pub dequeue_timeout: Duration,
    pub grace_period: Duration,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            max_workers: default_import_workers(),
            poll_interval: POLL_INTERVAL,
            dequeue_timeout: DEQUEUE_TIMEOUT,
            grace_period: GRACE_PERIOD,
        }
    }
}

/// Cooperative cancellation flag shared with the workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a worker stopped.
#[derive(Debug)]
enum WorkerExit {
    Drained,
    Canceled,
    Fatal(ArchiveError),
}

/// Runs a backlog through a pool of workers, each with its own pipeline.
pub struct Archiver {
    registry: Arc<PluginRegistry>,
    pipeline: PipelineConfig,
    context: PluginContext,
    index: Arc<dyn SearchIndex>,
    history: HistoryStore,
    options: ArchiveOptions,
    cancel: CancelToken,
}

impl std::fmt::Debug for Archiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archiver")
            .field("pipeline", &self.pipeline)
            .field("options", &self.options)
            .field("canceled", &self.cancel.is_canceled())
            .finish_non_exhaustive()
    }
}

impl Archiver {
    /// Creates an archiver after validating the configured pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Plugin`] if the pipeline configuration is invalid.
    pub fn new(
        registry: Arc<PluginRegistry>,
        pipeline: PipelineConfig,
        context: PluginContext,
        index: Arc<dyn SearchIndex>,
        history: HistoryStore,
        options: ArchiveOptions,
    ) -> Result<Self, ArchiveError> {
        registry
            .validate(&pipeline)
            .map_err(|err| ArchiveError::Plugin(err.into()))?;
        Ok(Self {
            registry,
            pipeline,
            context,
            index,
            history,
            options,
            cancel: CancelToken::new(),
        })
    }

    /// Token that stops the run when canceled.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Archives `backlog` and returns the final counters.
    ///
    /// The queue is filled and closed before any worker starts. Per-item
    /// failures are counted, not returned; a worker hitting a fatal error
    /// stops and is counted in [`ArchiveStats::worker_errors`].
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Plugin`] if a worker pipeline cannot be built.
    #[instrument(skip_all, fields(backlog = backlog.len()))]
    pub async fn run(&self, backlog: Vec<HistoryItem>) -> Result<ArchiveStats, ArchiveError> {
        let total = backlog.len();
        if total == 0 {
            info!("nothing to archive");
            return Ok(ArchiveStats::new());
        }

        let workers = worker_count(total, self.options.max_workers);
        let pipelines = (0..workers)
            .map(|_| self.registry.build_pipeline(&self.pipeline, &self.context))
            .collect::<Result<Vec<Pipeline>, _>>()?;
        info!(urls = total, workers, "archiving backlog");

        let queue = Arc::new(WorkQueue::new());
        queue.extend(backlog);
        queue.close();
        debug!("queue filled; starting workers");

        let stats = Arc::new(ArchiveStats::new());
        let mut tasks = JoinSet::new();
        for (position, pipeline) in pipelines.into_iter().enumerate() {
            let worker = Worker {
                pipeline,
                queue: Arc::clone(&queue),
                index: Arc::clone(&self.index),
                history: self.history.clone(),
                stats: Arc::clone(&stats),
                cancel: self.cancel.clone(),
                dequeue_timeout: self.options.dequeue_timeout,
            };
            tasks.spawn(worker.run().instrument(info_span!("worker", worker = position + 1)));
        }

        let mut ticker = tokio::time::interval(self.options.poll_interval);
        let mut last_remaining = total;
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(result) => worker_done(result, &stats),
                    None => break,
                },
                _ = ticker.tick() => {
                    let remaining = queue.len();
                    if remaining != last_remaining {
                        last_remaining = remaining;
                        info!(
                            remaining,
                            total,
                            workers = tasks.len(),
                            percent = %percent(remaining, total),
                            "items remaining"
                        );
                    }
                    if self.cancel.is_canceled() {
                        self.shutdown(&mut tasks, &stats).await;
                        break;
                    }
                }
            }
        }
        if self.cancel.is_canceled() {
            stats.mark_canceled();
        }

        info!(
            archived = stats.archived(),
            duplicates = stats.duplicates(),
            failed = stats.failed(),
            worker_errors = stats.worker_errors(),
            canceled = stats.canceled(),
            "archive run complete"
        );

        Ok(Arc::try_unwrap(stats).unwrap_or_else(|shared| shared.snapshot()))
    }

    /// Two-phase stop: wait for voluntary exits, abort the rest, wait again.
    async fn shutdown(&self, tasks: &mut JoinSet<WorkerExit>, stats: &ArchiveStats) {
        stats.mark_canceled();
        warn!(workers = tasks.len(), "canceled; waiting for workers to stop");
        drain(tasks, self.options.grace_period, stats).await;
        if tasks.is_empty() {
            return;
        }

        warn!(workers = tasks.len(), "aborting workers");
        tasks.abort_all();
        drain(tasks, self.options.grace_period, stats).await;
        if !tasks.is_empty() {
            error!(workers = tasks.len(), "workers still running after abort");
            tasks.detach_all();
        }
    }
}

async fn drain(tasks: &mut JoinSet<WorkerExit>, grace: Duration, stats: &ArchiveStats) {
    let deadline = Instant::now() + grace;
    while !tasks.is_empty() {
        match tokio::time::timeout_at(deadline, tasks.join_next()).await {
            Ok(Some(result)) => worker_done(result, stats),
            Ok(None) | Err(_) => break,
        }
    }
}

fn worker_done(result: Result<WorkerExit, JoinError>, stats: &ArchiveStats) {
    match result {
        Ok(WorkerExit::Drained) => debug!("worker finished"),
        Ok(WorkerExit::Canceled) => debug!("worker stopped on cancellation"),
        Ok(WorkerExit::Fatal(err)) => {
            error!(error = %err, "worker stopped on fatal error");
            stats.increment_worker_errors();
        }
        Err(err) if err.is_cancelled() => warn!("worker was aborted"),
        Err(err) => {
            error!(error = %err, "worker panicked");
            stats.increment_worker_errors();
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: usize, total: usize) -> String {
    format!("{:.2}", part as f64 / total as f64 * 100.0)
}

struct Worker {
    pipeline: Pipeline,
    queue: Arc<WorkQueue<HistoryItem>>,
    index: Arc<dyn SearchIndex>,
    history: HistoryStore,
    stats: Arc<ArchiveStats>,
    cancel: CancelToken,
    dequeue_timeout: Duration,
}

impl Worker {
    async fn process(&mut self, item: &HistoryItem) -> Result<ItemOutcome, ArchiveError> {
        process_item(&mut self.pipeline, item, self.index.as_ref(), &self.history).await
    }

    async fn run(mut self) -> WorkerExit {
        if let Err(err) = self.pipeline.enter().await {
            return WorkerExit::Fatal(err.into());
        }
        let exit = self.work().await;
        if let Err(err) = self.pipeline.exit().await {
            warn!(error = %err, "pipeline exit failed");
        }
        exit
    }

    async fn work(&mut self) -> WorkerExit {
        loop {
            if self.cancel.is_canceled() {
                return WorkerExit::Canceled;
            }
            let item = match self.queue.pop(self.dequeue_timeout).await {
                Pop::Item(item) => item,
                Pop::Empty => continue,
                Pop::Drained => return WorkerExit::Drained,
            };

            let mut result = self.process(&item).await;
            if let Err(err) = &result
                && err.is_transient()
            {
                debug!(url = %item.url, error = %err, "retrying item once");
                result = self.process(&item).await;
            }
            match result {
                Ok(outcome) => self.stats.record(outcome),
                Err(err) if err.is_fatal() => return WorkerExit::Fatal(err),
                Err(err) => {
                    warn!(url = %item.url, error = %err, "failed to archive item");
                    self.stats.increment_failed();
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::db::Database;
    use crate::index::MemoryIndex;

    async fn archiver(index: Arc<MemoryIndex>, db: &Database) -> Archiver {
        let registry = Arc::new(PluginRegistry::load(Vec::new()).unwrap());
        Archiver::new(
            registry,
            PipelineConfig::default(),
            PluginContext::default(),
            index,
            HistoryStore::new(db.clone()),
            ArchiveOptions {
                max_workers: 2,
                poll_interval: Duration::from_millis(20),
                dequeue_timeout: Duration::from_millis(10),
                grace_period: Duration::from_millis(100),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_backlog_returns_zero_stats() {
        let db = Database::new_in_memory().await.unwrap();
        let stats = archiver(Arc::new(MemoryIndex::new()), &db)
            .await
            .run(Vec::new())
            .await
            .unwrap();
        assert_eq!(stats.total(), 0);
    }

    #[tokio::test]
    async fn test_invalid_urls_are_counted_and_recorded() {
        let db = Database::new_in_memory().await.unwrap();
        let archiver = archiver(Arc::new(MemoryIndex::new()), &db).await;
        let backlog = vec![
            HistoryItem::new("not a url", None, Utc::now()),
            HistoryItem::new("also not a url", None, Utc::now()),
        ];

        let stats = archiver.run(backlog).await.unwrap();

        assert_eq!(stats.failed(), 2);
        assert_eq!(stats.worker_errors(), 0);
        let history = HistoryStore::new(db);
        assert_eq!(history.count().await.unwrap(), 2);
        assert!(history.find("not a url").await.unwrap().unwrap().last_scrape.is_none());
    }

    #[tokio::test]
    async fn test_canceled_run_reports_cancellation() {
        let db = Database::new_in_memory().await.unwrap();
        let archiver = archiver(Arc::new(MemoryIndex::new()), &db).await;
        archiver.cancel_token().cancel();

        let backlog = (0..4)
            .map(|n| HistoryItem::new(format!("bad {n}"), None, Utc::now()))
            .collect();
        let stats = archiver.run(backlog).await.unwrap();

        assert!(stats.canceled());
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_pipeline() {
        let registry = Arc::new(PluginRegistry::load(Vec::new()).unwrap());
        let config = PipelineConfig {
            extractor: "Nope".to_string(),
            ..PipelineConfig::default()
        };
        let db = Database::new_in_memory().await.unwrap();

        let err = Archiver::new(
            registry,
            config,
            PluginContext::default(),
            Arc::new(MemoryIndex::new()),
            HistoryStore::new(db),
            ArchiveOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::Plugin(_)));
    }
}
