//! Searchable document store for archived pages.
//!
//! Pages live in the [`PAGES`] collection keyed by their content
//! [`fingerprint`], so the same bytes fetched from two URLs are stored once.
//!
//! - [`ElasticsearchIndex`] talks to an Elasticsearch cluster over REST
//! - [`MemoryIndex`] keeps documents in process (tests, dry runs)

mod elasticsearch;
mod memory;

pub use elasticsearch::{ElasticsearchIndex, pages_index_definition};
pub use memory::MemoryIndex;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Collection holding one document per distinct page content.
pub const PAGES: &str = "pages";

/// Source fields returned with search hits.
pub const SEARCH_FIELDS: [&str; 6] =
    ["title", "url", "timestamp", "author", "favicon", "description"];

/// Errors raised by index backends.
#[derive(Debug, Clone, Error)]
pub enum IndexError {
    /// The request never produced a response.
    #[error("search index request failed during {operation}: {message}")]
    Transport { operation: String, message: String },

    /// The index answered with an unexpected status.
    #[error("search index returned HTTP {status} during {operation}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    /// The response body could not be understood.
    #[error("invalid search index response during {operation}: {message}")]
    InvalidResponse { operation: String, message: String },

    /// The configured endpoint is unusable.
    #[error("invalid search index URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl IndexError {
    #[must_use]
    pub fn transport(operation: &str, error: &reqwest::Error) -> Self {
        Self::Transport {
            operation: operation.to_string(),
            message: error.to_string(),
        }
    }

    #[must_use]
    pub fn invalid_response(operation: &str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    /// The stored document fields listed in [`SEARCH_FIELDS`].
    pub source: Value,
    /// Score contribution per query term.
    pub explanation: BTreeMap<String, f64>,
}

impl SearchHit {
    /// Returns a string field of the stored document.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.source.get(name).and_then(Value::as_str)
    }
}

/// Document store contract used by the archive workers and the CLI.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Returns true when document `id` is stored in `collection`.
    async fn exists(&self, collection: &str, id: &str) -> Result<bool, IndexError>;

    /// Fetches the stored source of document `id`, or `None` when it is absent.
    ///
    /// A non-empty `fields` limits the returned source to those fields.
    async fn get(
        &self,
        collection: &str,
        id: &str,
        fields: &[&str],
    ) -> Result<Option<Value>, IndexError>;

    /// Creates or replaces the document `id`.
    async fn index(&self, collection: &str, id: &str, document: &Value) -> Result<(), IndexError>;

    /// Full-text search over the `text` field.
    async fn search(
        &self,
        collection: &str,
        query: &str,
        size: usize,
    ) -> Result<Vec<SearchHit>, IndexError>;
}

/// Lower-case hex SHA-256 of `content`.
#[must_use]
pub fn fingerprint(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}
