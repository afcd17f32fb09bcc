//! Plugin capabilities, factories and the registry.
//!
//! A plugin is a [`PluginFactory`]: static metadata (name, capabilities,
//! declared content types) plus constructors for the capability instances it
//! provides. Instances are created per consumer; every archive worker builds
//! its own pipeline from the same factories.
//!
//! # Architecture
//!
//! - [`Capability`] - what a plugin can be used as
//! - [`PluginFactory`] - trait implemented by built-in and extension plugins
//! - [`PluginDefinition`] - a registered factory with its id and short name
//! - [`PluginRegistry`] - discovery, lookup, validation and construction

mod registry;

pub use registry::PluginRegistry;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::allowlist::AllowRuleMatcher;
use crate::http::ClientOptions;
use crate::pipeline::{ContentTypes, Downloader, Extractor, Filter, PipelineError};
use crate::source::HistorySource;

/// Roles a plugin can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    Downloader,
    Extractor,
    Filter,
    AllowRule,
    Source,
}

impl Capability {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Downloader => "downloader",
            Self::Extractor => "extractor",
            Self::Filter => "filter",
            Self::AllowRule => "allow rule",
            Self::Source => "source",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Runtime settings handed to plugin constructors.
#[derive(Debug, Clone, Default)]
pub struct PluginContext {
    pub http: ClientOptions,
}

/// The configured processing stack, by plugin short name or id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub downloader: String,
    pub filter_stack: Vec<String>,
    pub extractor: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            downloader: "HttpDownloader".to_string(),
            filter_stack: vec!["HtmlContentFinder".to_string()],
            extractor: "HtmlExtractor".to_string(),
        }
    }
}

/// Aggregated configuration violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration:\n  {}", .0.join("\n  "))]
pub struct ConfigError(pub Vec<String>);

impl ConfigError {
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.0
    }
}

/// Errors raised while loading plugins or creating plugin instances.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Two plugins could not be given distinct short names.
    #[error("plugin name '{name}' still collides after qualifying it as '{id}'")]
    NameCollision { name: String, id: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no plugin named '{0}'")]
    NotFound(String),

    #[error("plugin '{plugin}' does not provide the {capability} capability")]
    Unsupported {
        plugin: String,
        capability: Capability,
    },

    #[error("failed to create plugin '{plugin}': {message}")]
    Create { plugin: String, message: String },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl PluginError {
    #[must_use]
    pub fn unsupported(plugin: &str, capability: Capability) -> Self {
        Self::Unsupported {
            plugin: plugin.to_string(),
            capability,
        }
    }

    #[must_use]
    pub fn create(plugin: &str, message: impl Into<String>) -> Self {
        Self::Create {
            plugin: plugin.to_string(),
            message: message.into(),
        }
    }
}

/// A plugin: metadata plus constructors for each capability it provides.
///
/// Only the constructors matching [`capabilities`](Self::capabilities) need
/// to be overridden; the defaults report the capability as unsupported.
pub trait PluginFactory: Send + Sync {
    /// Short name used in configuration, e.g. `HttpDownloader`.
    fn name(&self) -> &str;

    /// Module path of the implementation, used to build the plugin id.
    fn module(&self) -> &str;

    fn capabilities(&self) -> Vec<Capability>;

    /// Content types produced by downloader and filter instances.
    fn produces(&self) -> ContentTypes {
        ContentTypes::new()
    }

    /// Content types accepted by filter and extractor instances.
    fn accepts(&self) -> ContentTypes {
        ContentTypes::new()
    }

    /// Rule identifier for allow rule matchers.
    fn identifier(&self) -> Option<&str> {
        None
    }

    fn create_downloader(&self, _ctx: &PluginContext) -> Result<Box<dyn Downloader>, PluginError> {
        Err(PluginError::unsupported(self.name(), Capability::Downloader))
    }

    fn create_filter(&self, _ctx: &PluginContext) -> Result<Box<dyn Filter>, PluginError> {
        Err(PluginError::unsupported(self.name(), Capability::Filter))
    }

    fn create_extractor(&self, _ctx: &PluginContext) -> Result<Box<dyn Extractor>, PluginError> {
        Err(PluginError::unsupported(self.name(), Capability::Extractor))
    }

    fn create_matcher(&self) -> Result<Box<dyn AllowRuleMatcher>, PluginError> {
        Err(PluginError::unsupported(self.name(), Capability::AllowRule))
    }

    fn create_source(&self, _config: &Value) -> Result<Box<dyn HistorySource>, PluginError> {
        Err(PluginError::unsupported(self.name(), Capability::Source))
    }
}

/// A registered plugin.
#[derive(Clone)]
pub struct PluginDefinition {
    /// Globally unique `module:Name` id.
    pub id: String,
    /// Name used for configuration lookups; qualified with the id on collision.
    pub short_name: String,
    pub capabilities: Vec<Capability>,
    pub factory: Arc<dyn PluginFactory>,
}

impl PluginDefinition {
    #[must_use]
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

impl fmt::Debug for PluginDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDefinition")
            .field("id", &self.id)
            .field("short_name", &self.short_name)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Builds the `module:Name` id of a factory.
#[must_use]
pub fn plugin_id(factory: &dyn PluginFactory) -> String {
    format!("{}:{}", factory.module(), factory.name())
}
