//! History Archiver Core Library
//!
//! This library gates URLs from a browsing history through a per-hostname
//! allow/deny policy, fetches the pages that pass, reduces them to readable
//! text, and stores the result in a full-text search index.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - Database connection and schema management
//! - [`allowlist`] - Hostname chains, rule matchers, and the allow/deny decision engine
//! - [`history`] - Visit history and recency checks
//! - [`pipeline`] - Typed content, stage traits, and content-type negotiation
//! - [`plugin`] - Plugin factories and the registry that builds pipelines
//! - [`plugins`] - Built-in downloader, filter, extractor, rule, and source plugins
//! - [`source`] - History sources streamed into ingestion
//! - [`ingest`] - Policy gating of a history source into an archive backlog
//! - [`index`] - Search index abstraction with Elasticsearch and in-memory backends
//! - [`archive`] - Per-item processing and the worker-pool orchestrator
//! - [`http`] - Shared HTTP client construction

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod allowlist;
pub mod archive;
pub mod db;
pub mod error;
pub mod history;
pub mod http;
pub mod index;
pub mod ingest;
pub mod pipeline;
pub mod plugin;
pub mod plugins;
pub mod source;

// Re-export commonly used types
pub use allowlist::{AllowListError, AllowListStore, DecisionEngine, Hostname};
pub use archive::{ArchiveError, ArchiveOptions, ArchiveStats, Archiver, CancelToken};
pub use db::Database;
pub use history::{HistoryItem, HistoryStore};
pub use index::{ElasticsearchIndex, MemoryIndex, SearchHit, SearchIndex};
pub use ingest::{IngestOptions, IngestReport, ingest};
pub use pipeline::{Content, ContentResult, Pipeline, PipelineError, ProcessOutcome};
pub use plugin::{Capability, PipelineConfig, PluginContext, PluginError, PluginRegistry};
pub use source::{HistorySource, SourceError};
