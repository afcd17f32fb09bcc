//! Content-type negotiating processing pipeline.
//!
//! A [`Pipeline`] chains one [`Downloader`], zero or more [`Filter`]s and one
//! [`Extractor`]. When it is built, the types each stage may hand to the next
//! are computed once (`produces(stage_i) ∩ accepts(stage_i+1)`); a chain
//! where any pair has nothing in common is rejected with every broken link
//! listed.
//!
//! Per item, [`Pipeline::process_one`] downloads, asks the caller whether the
//! downloaded content is already archived, then runs the filters and the
//! extractor. The duplicate check happens before any filter so a known page
//! costs one fetch and nothing more.

mod content;
mod stage;

pub use content::{
    Content, ContentResult, ContentTypes, HTML_FRAGMENT, TEXT_HTML, TEXT_PLAIN, content_types,
};
pub use stage::{Downloader, Extractor, Filter, StageError};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::index::IndexError;

/// Errors raised while building or running a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Adjacent stages share no content type.
    #[error("incompatible pipeline stages:\n  {}", .0.join("\n  "))]
    Negotiation(Vec<String>),

    #[error("pipeline used before enter")]
    NotEntered,

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("duplicate check failed: {0}")]
    DuplicateCheck(#[from] IndexError),
}

/// Decides whether freshly downloaded content was archived before.
#[async_trait]
pub trait DuplicateCheck: Send + Sync {
    async fn is_duplicate(&self, content: &ContentResult) -> Result<bool, IndexError>;
}

/// How a single item left the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Every stage ran; the extracted result is ready to index.
    Extracted(ContentResult),
    /// The downloaded content is already in the index.
    AlreadyArchived,
    /// The downloader returned nothing.
    DownloadFailed,
    /// A filter decided the item holds nothing worth keeping.
    Dropped { stage: String },
}

/// A downloader, a filter stack and an extractor with precomputed negotiation.
pub struct Pipeline {
    downloader: Box<dyn Downloader>,
    filters: Vec<Box<dyn Filter>>,
    extractor: Box<dyn Extractor>,
    /// `wanted[i]` is what stage `i` may produce for stage `i + 1`.
    wanted: Vec<ContentTypes>,
    entered: bool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("wanted", &self.wanted)
            .field("entered", &self.entered)
            .finish()
    }
}

impl Pipeline {
    /// Builds a pipeline, validating every adjacent pair of stages.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Negotiation`] listing every pair of adjacent
    /// stages whose produced and accepted types do not intersect.
    pub fn new(
        downloader: Box<dyn Downloader>,
        filters: Vec<Box<dyn Filter>>,
        extractor: Box<dyn Extractor>,
    ) -> Result<Self, PipelineError> {
        let mut producers = vec![(downloader.name().to_string(), downloader.content_types())];
        producers.extend(
            filters
                .iter()
                .map(|filter| (filter.name().to_string(), filter.content_types())),
        );

        let mut consumers: Vec<(String, ContentTypes)> = filters
            .iter()
            .map(|filter| (filter.name().to_string(), filter.accept()))
            .collect();
        consumers.push((extractor.name().to_string(), extractor.accept()));

        let mut wanted = Vec::with_capacity(consumers.len());
        let mut errors = Vec::new();
        for ((producer, produces), (consumer, accepts)) in producers.iter().zip(&consumers) {
            let common: ContentTypes = produces.intersection(accepts).cloned().collect();
            if common.is_empty() {
                errors.push(format!(
                    "{consumer} accepts none of the types {producer} produces ({})",
                    join_types(produces)
                ));
            }
            wanted.push(common);
        }

        if !errors.is_empty() {
            return Err(PipelineError::Negotiation(errors));
        }

        debug!(
            stages = ?producers.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            extractor = extractor.name(),
            "pipeline built"
        );

        Ok(Self {
            downloader,
            filters,
            extractor,
            wanted,
            entered: false,
        })
    }

    /// Stage names in processing order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        let mut names = vec![self.downloader.name()];
        names.extend(self.filters.iter().map(|filter| filter.name()));
        names.push(self.extractor.name());
        names
    }

    /// Negotiated type sets between adjacent stages.
    #[must_use]
    pub fn wanted(&self) -> &[ContentTypes] {
        &self.wanted
    }

    #[must_use]
    pub fn is_entered(&self) -> bool {
        self.entered
    }

    /// Enters the downloader, the filters and the extractor, in that order.
    ///
    /// If a stage fails to enter, the stages already entered are exited in
    /// reverse order before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the [`StageError`] of the first stage that failed to enter.
    pub async fn enter(&mut self) -> Result<(), PipelineError> {
        if self.entered {
            return Ok(());
        }

        self.downloader.enter().await?;

        for index in 0..self.filters.len() {
            if let Err(err) = self.filters[index].enter().await {
                for filter in self.filters[..index].iter_mut().rev() {
                    keep_first(filter.exit().await, &mut None);
                }
                keep_first(self.downloader.exit().await, &mut None);
                return Err(err.into());
            }
        }

        if let Err(err) = self.extractor.enter().await {
            for filter in self.filters.iter_mut().rev() {
                keep_first(filter.exit().await, &mut None);
            }
            keep_first(self.downloader.exit().await, &mut None);
            return Err(err.into());
        }

        self.entered = true;
        Ok(())
    }

    /// Exits every stage in reverse order of entry.
    ///
    /// All stages are exited even when one fails; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first [`StageError`] raised while exiting.
    pub async fn exit(&mut self) -> Result<(), PipelineError> {
        if !self.entered {
            return Ok(());
        }
        self.entered = false;

        let mut first_error = None;
        keep_first(self.extractor.exit().await, &mut first_error);
        for filter in self.filters.iter_mut().rev() {
            keep_first(filter.exit().await, &mut first_error);
        }
        keep_first(self.downloader.exit().await, &mut first_error);

        first_error.map_or(Ok(()), |err| Err(err.into()))
    }

    /// Runs one URL through download, duplicate check, filters and extraction.
    ///
    /// Download failures and filters that drop the item are reported as
    /// outcomes, not errors.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NotEntered`] outside enter/exit,
    /// [`PipelineError::Stage`] when a stage refuses its input or fails, and
    /// [`PipelineError::DuplicateCheck`] when the index cannot be queried.
    #[instrument(skip(self, duplicates), fields(url = %url))]
    pub async fn process_one(
        &mut self,
        url: &Url,
        duplicates: &dyn DuplicateCheck,
    ) -> Result<ProcessOutcome, PipelineError> {
        if !self.entered {
            return Err(PipelineError::NotEntered);
        }

        let Some(mut content) = self.downloader.download(url, &self.wanted[0]).await? else {
            error!(downloader = self.downloader.name(), "failed to download content");
            return Ok(ProcessOutcome::DownloadFailed);
        };
        ensure_declared(
            self.downloader.name(),
            &self.downloader.content_types(),
            &content,
        )?;

        if duplicates.is_duplicate(&content).await? {
            debug!("content already archived");
            return Ok(ProcessOutcome::AlreadyArchived);
        }

        for (index, filter) in self.filters.iter_mut().enumerate() {
            if !filter.accept().contains(&content.content_type) {
                return Err(StageError::unsupported(filter.name(), &content.content_type).into());
            }
            match filter.transform(content, &self.wanted[index + 1]).await? {
                Some(next) => {
                    ensure_declared(filter.name(), &filter.content_types(), &next)?;
                    content = next;
                }
                None => {
                    debug!(filter = filter.name(), "filter dropped item");
                    return Ok(ProcessOutcome::Dropped {
                        stage: filter.name().to_string(),
                    });
                }
            }
        }

        if !self.extractor.accept().contains(&content.content_type) {
            return Err(
                StageError::unsupported(self.extractor.name(), &content.content_type).into(),
            );
        }
        let extracted = self.extractor.extract(content).await?;
        ensure_declared(
            self.extractor.name(),
            &self.extractor.content_types(),
            &extracted,
        )?;

        Ok(ProcessOutcome::Extracted(extracted))
    }
}

fn ensure_declared(
    stage: &str,
    declared: &ContentTypes,
    result: &ContentResult,
) -> Result<(), StageError> {
    if declared.contains(&result.content_type) {
        Ok(())
    } else {
        Err(StageError::UndeclaredContentType {
            stage: stage.to_string(),
            content_type: result.content_type.clone(),
        })
    }
}

fn keep_first(result: Result<(), StageError>, first: &mut Option<StageError>) {
    if let Err(err) = result {
        warn!(error = %err, "stage exit failed");
        first.get_or_insert(err);
    }
}

fn join_types(types: &ContentTypes) -> String {
    types.iter().cloned().collect::<Vec<_>>().join(", ")
}
