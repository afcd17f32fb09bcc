//! Stage traits implemented by downloader, filter and extractor plugins.
//!
//! Every stage is a scoped resource: [`enter`](Downloader::enter) acquires
//! whatever the stage needs (HTTP sessions, caches) and `exit` releases it.
//! A stage instance is owned by exactly one pipeline and used by one task at
//! a time, which is why the processing methods take `&mut self`.

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use super::content::{ContentResult, ContentTypes};

/// Errors raised by an individual stage or allowlist matcher.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// The stage was handed a result whose type it does not accept.
    #[error("{stage} does not accept content type '{content_type}'")]
    UnsupportedContentType { stage: String, content_type: String },

    /// The stage produced a type outside of the set it declares.
    #[error("{stage} produced undeclared content type '{content_type}'")]
    UndeclaredContentType { stage: String, content_type: String },

    /// None of the requested types can be produced.
    #[error("{stage} cannot produce any of the requested types: {wanted}")]
    NoWantedType { stage: String, wanted: String },

    /// A processing method was called outside enter/exit.
    #[error("{stage} used before enter")]
    NotEntered { stage: String },

    /// Acquiring or releasing stage resources failed.
    #[error("{stage} lifecycle failure: {message}")]
    Lifecycle { stage: String, message: String },

    /// The payload could not be processed.
    #[error("{stage} failed to process content: {message}")]
    Content { stage: String, message: String },
}

impl StageError {
    #[must_use]
    pub fn unsupported(stage: &str, content_type: &str) -> Self {
        Self::UnsupportedContentType {
            stage: stage.to_string(),
            content_type: content_type.to_string(),
        }
    }

    #[must_use]
    pub fn no_wanted_type(stage: &str, wanted: &ContentTypes) -> Self {
        Self::NoWantedType {
            stage: stage.to_string(),
            wanted: wanted.iter().cloned().collect::<Vec<_>>().join(", "),
        }
    }

    #[must_use]
    pub fn not_entered(stage: &str) -> Self {
        Self::NotEntered {
            stage: stage.to_string(),
        }
    }

    #[must_use]
    pub fn lifecycle(stage: &str, message: impl Into<String>) -> Self {
        Self::Lifecycle {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn content(stage: &str, message: impl Into<String>) -> Self {
        Self::Content {
            stage: stage.to_string(),
            message: message.into(),
        }
    }
}

/// Fetches a URL and produces the first result of a chain.
#[async_trait]
pub trait Downloader: Send + Sync {
    fn name(&self) -> &str;

    /// Types this downloader can produce.
    fn content_types(&self) -> ContentTypes;

    async fn enter(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    async fn exit(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    /// Fetches `url`, returning `Ok(None)` for ordinary fetch failures
    /// (bad status, wrong content type, transport error).
    async fn download(
        &mut self,
        url: &Url,
        wanted: &ContentTypes,
    ) -> Result<Option<ContentResult>, StageError>;
}

/// Transforms one result into another, keeping the input as provenance.
#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    /// Types this filter accepts as input.
    fn accept(&self) -> ContentTypes;

    /// Types this filter can produce.
    fn content_types(&self) -> ContentTypes;

    async fn enter(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    async fn exit(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    /// Returns `Ok(None)` when the input holds nothing worth keeping.
    async fn transform(
        &mut self,
        input: ContentResult,
        wanted: &ContentTypes,
    ) -> Result<Option<ContentResult>, StageError>;
}

/// Produces the final indexable result.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    /// Types this extractor accepts as input.
    fn accept(&self) -> ContentTypes;

    /// Types of the extracted result.
    fn content_types(&self) -> ContentTypes;

    async fn enter(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    async fn exit(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    async fn extract(&mut self, input: ContentResult) -> Result<ContentResult, StageError>;
}
