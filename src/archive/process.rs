//! One history item through the pipeline, with its index and history side effects.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::ArchiveError;
use crate::history::{HistoryItem, HistoryStore};
use crate::index::{IndexError, PAGES, SearchIndex, fingerprint};
use crate::pipeline::{ContentResult, DuplicateCheck, Pipeline, ProcessOutcome};

/// What happened to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Archived,
    Duplicate,
    /// Nothing usable was downloaded or kept by the filters.
    Failed,
}

/// Duplicate check against the pages collection, keyed by content fingerprint.
pub struct IndexDuplicateCheck<'a> {
    index: &'a dyn SearchIndex,
}

impl<'a> IndexDuplicateCheck<'a> {
    #[must_use]
    pub fn new(index: &'a dyn SearchIndex) -> Self {
        Self { index }
    }
}

#[async_trait]
impl DuplicateCheck for IndexDuplicateCheck<'_> {
    async fn is_duplicate(&self, content: &ContentResult) -> Result<bool, IndexError> {
        self.index
            .exists(PAGES, &fingerprint(content.content.as_bytes()))
            .await
    }
}

/// Runs `item` through `pipeline` and records the result.
///
/// - already archived content refreshes the history record
/// - download failures and dropped pages are recorded without a scrape time,
///   keeping any earlier one
/// - extracted pages are indexed under the fingerprint of the downloaded
///   bytes, then recorded as scraped now
///
/// # Errors
///
/// Returns [`ArchiveError`] for stage, index and history failures. The history
/// record is still written for stage and index failures.
#[instrument(skip_all, fields(url = %item.url))]
pub async fn process_item(
    pipeline: &mut Pipeline,
    item: &HistoryItem,
    index: &dyn SearchIndex,
    history: &HistoryStore,
) -> Result<ItemOutcome, ArchiveError> {
    debug!("attempting to download");

    let url = match Url::parse(&item.url) {
        Ok(url) => url,
        Err(err) => {
            history.record_visit(item, None).await?;
            return Err(ArchiveError::InvalidUrl {
                url: item.url.clone(),
                reason: err.to_string(),
            });
        }
    };

    let check = IndexDuplicateCheck::new(index);
    let outcome = match pipeline.process_one(&url, &check).await {
        Ok(outcome) => outcome,
        Err(err) => {
            history.record_visit(item, None).await?;
            return Err(err.into());
        }
    };

    match outcome {
        ProcessOutcome::AlreadyArchived => {
            debug!("content was archived before");
            history.record_visit(item, Some(Utc::now())).await?;
            Ok(ItemOutcome::Duplicate)
        }
        ProcessOutcome::DownloadFailed => {
            warn!("content could not be downloaded");
            history.record_visit(item, None).await?;
            Ok(ItemOutcome::Failed)
        }
        ProcessOutcome::Dropped { stage } => {
            debug!(stage = %stage, "nothing worth keeping");
            history.record_visit(item, None).await?;
            Ok(ItemOutcome::Failed)
        }
        ProcessOutcome::Extracted(result) => {
            let id = fingerprint(result.origin().content.as_bytes());
            if let Err(err) = index.index(PAGES, &id, &page_document(item, &result)).await {
                history.record_visit(item, None).await?;
                return Err(err.into());
            }
            info!(fingerprint = %id, "archived");
            history.record_visit(item, Some(Utc::now())).await?;
            Ok(ItemOutcome::Archived)
        }
    }
}

/// The indexed document: url, timestamp, text and title, then the metadata
/// collected by the stages.
fn page_document(item: &HistoryItem, result: &ContentResult) -> Value {
    let mut document = Map::new();
    document.insert("url".to_string(), Value::from(item.url.as_str()));
    document.insert("timestamp".to_string(), Value::from(Utc::now().to_rfc3339()));
    document.insert(
        "text".to_string(),
        Value::from(result.content.as_text().unwrap_or_default()),
    );
    if let Some(title) = &item.title {
        document.insert("title".to_string(), Value::from(title.as_str()));
    }
    for (key, value) in &result.meta {
        document.insert(key.clone(), Value::from(value.as_str()));
    }
    Value::Object(document)
}
