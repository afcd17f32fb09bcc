//! Gate between a history source and the archive backlog.
//!
//! Every item is classified without touching the network: unparseable URLs,
//! denylisted hosts, URLs no allow rule matches, and URLs scraped within the
//! recency window are counted and dropped. Everything else joins the backlog.

use chrono::{Duration, Utc};
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::allowlist::{AllowListError, DecisionEngine};
use crate::error::StoreError;
use crate::history::{HistoryItem, HistoryStore};
use crate::source::SourceError;

/// Default recency window in hours.
pub const RESCRAPE_AFTER_HOURS: u32 = 24;

/// Errors that stop ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    AllowList(#[from] AllowListError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Items scraped more recently than this are skipped.
    pub rescrape_after: Duration,
    /// Stop at the first malformed source entry instead of skipping it.
    pub strict: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            rescrape_after: Duration::hours(i64::from(RESCRAPE_AFTER_HOURS)),
            strict: false,
        }
    }
}

/// Classification counts and the resulting backlog.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub backlog: Vec<HistoryItem>,
    pub total: usize,
    pub invalid: usize,
    pub blocked: usize,
    pub filtered: usize,
    pub too_soon: usize,
}

/// Classifies every item of `items`, returning the backlog to archive.
///
/// `engine` must be entered.
///
/// # Errors
///
/// Returns [`IngestError`] when the policy or history database cannot be
/// queried, or, in strict mode, on the first source error.
#[instrument(skip_all)]
pub async fn ingest<S>(
    items: S,
    engine: &mut DecisionEngine,
    history: &HistoryStore,
    options: &IngestOptions,
) -> Result<IngestReport, IngestError>
where
    S: Stream<Item = Result<HistoryItem, SourceError>>,
{
    let mut report = IngestReport::default();
    let since = Utc::now() - options.rescrape_after;
    let mut items = std::pin::pin!(items);

    while let Some(item) = items.next().await {
        report.total += 1;
        let item = match item {
            Ok(item) => item,
            Err(err) if options.strict => return Err(err.into()),
            Err(err) => {
                warn!(error = %err, "skipping malformed history entry");
                report.invalid += 1;
                continue;
            }
        };

        let Ok(url) = Url::parse(&item.url) else {
            debug!(url = %item.url, "invalid URL");
            report.invalid += 1;
            continue;
        };
        if engine.is_blocked(&url).await? {
            report.blocked += 1;
            continue;
        }
        if !engine.is_allowed(&url).await? {
            report.filtered += 1;
            continue;
        }
        if history.scraped_since(&item.url, since).await? {
            debug!(url = %item.url, "scraped recently");
            report.too_soon += 1;
            continue;
        }
        report.backlog.push(item);
    }

    info!(
        total = report.total,
        backlog = report.backlog.len(),
        invalid = report.invalid,
        blocked = report.blocked,
        filtered = report.filtered,
        too_soon = report.too_soon,
        "history ingested"
    );
    Ok(report)
}
