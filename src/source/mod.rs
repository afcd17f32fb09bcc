//! History sources feeding the ingestion gate.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::history::HistoryItem;

/// Errors raised by history sources.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read history from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed history entry at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("invalid source configuration: {0}")]
    Config(String),

    #[error("history source '{0}' used before enter")]
    NotEntered(String),
}

impl SourceError {
    #[must_use]
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Lazily produced history items.
pub type HistoryStream<'a> = BoxStream<'a, Result<HistoryItem, SourceError>>;

/// Produces visited pages, typically from a browser profile or an export file.
#[async_trait]
pub trait HistorySource: Send {
    fn name(&self) -> &str;

    async fn enter(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn exit(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Streams the items. Only valid between [`enter`](Self::enter) and
    /// [`exit`](Self::exit).
    fn items(&mut self) -> HistoryStream<'_>;
}
