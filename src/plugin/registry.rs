use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use super::{
    Capability, ConfigError, PipelineConfig, PluginContext, PluginDefinition, PluginError,
    PluginFactory, plugin_id,
};
use crate::allowlist::AllowRuleMatcher;
use crate::pipeline::{ContentTypes, Filter, Pipeline};
use crate::plugins::builtin_factories;
use crate::source::HistorySource;

/// Registered plugins in registration order, indexed by id and short name.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<PluginDefinition>,
    by_id: HashMap<String, usize>,
    by_short_name: HashMap<String, usize>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field(
                "plugins",
                &self.plugins.iter().map(|p| &p.short_name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the built-in plugins followed by `extensions`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NameCollision`] if a plugin's short name
    /// collides even after being qualified with its id.
    #[instrument(skip(extensions))]
    pub fn load(
        extensions: impl IntoIterator<Item = Arc<dyn PluginFactory>>,
    ) -> Result<Self, PluginError> {
        let mut registry = Self::new();
        for factory in builtin_factories().into_iter().chain(extensions) {
            registry.register(factory)?;
        }
        info!(
            plugins = ?registry.plugins.iter().map(|p| p.short_name.as_str()).collect::<Vec<_>>(),
            "loaded plugins"
        );
        Ok(registry)
    }

    /// Registers one plugin.
    ///
    /// Returns `Ok(false)` when the plugin was skipped: it declares no
    /// capability, declares one without the metadata it needs, or its id is
    /// already registered. A short name already in use is replaced by the
    /// plugin id.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NameCollision`] if the qualified name is taken too.
    #[tracing::instrument(skip(self, factory), fields(plugin_name))]
    pub fn register(&mut self, factory: Arc<dyn PluginFactory>) -> Result<bool, PluginError> {
        tracing::Span::current().record("plugin_name", factory.name());
        let id = plugin_id(factory.as_ref());

        let mut capabilities = factory.capabilities();
        capabilities.sort();
        capabilities.dedup();
        if capabilities.is_empty() {
            error!(id = %id, "plugin declares no capability; skipping");
            return Ok(false);
        }
        if let Some(problem) = protocol_violation(factory.as_ref(), &capabilities) {
            error!(
                id = %id,
                problem,
                "plugin does not adhere to its declared capabilities; skipping"
            );
            return Ok(false);
        }

        if self.by_id.contains_key(&id) {
            warn!(id = %id, "same plugin registered twice; skipping");
            return Ok(false);
        }

        let mut short_name = factory.name().to_string();
        if let Some(existing) = self.by_short_name.get(&short_name) {
            warn!(
                name = %short_name,
                first = %self.plugins[*existing].id,
                now = %id,
                "plugin name reused; qualifying with id"
            );
            short_name.clone_from(&id);
            if self.by_short_name.contains_key(&short_name) {
                return Err(PluginError::NameCollision {
                    name: factory.name().to_string(),
                    id,
                });
            }
        }

        debug!(id = %id, short_name = %short_name, ?capabilities, "registering plugin");
        let index = self.plugins.len();
        self.by_id.insert(id.clone(), index);
        self.by_short_name.insert(short_name.clone(), index);
        self.plugins.push(PluginDefinition {
            id,
            short_name,
            capabilities,
            factory,
        });
        Ok(true)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// All plugins in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &PluginDefinition> {
        self.plugins.iter()
    }

    /// Plugins providing `capability`, in registration order.
    pub fn get_by_type(&self, capability: Capability) -> impl Iterator<Item = &PluginDefinition> {
        self.plugins.iter().filter(move |p| p.has(capability))
    }

    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<&PluginDefinition> {
        self.by_id.get(id).map(|index| &self.plugins[*index])
    }

    #[must_use]
    pub fn get_by_short_name(&self, name: &str) -> Option<&PluginDefinition> {
        self.by_short_name.get(name).map(|index| &self.plugins[*index])
    }

    /// Looks a configured name up as a short name, then as an id.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&PluginDefinition> {
        self.get_by_short_name(name).or_else(|| self.get_by_id(name))
    }

    /// Checks the configured stack, reporting every problem at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] listing unknown plugins, plugins lacking the
    /// needed capability, and adjacent stages with no content type in common.
    pub fn validate(&self, config: &PipelineConfig) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        let downloader =
            self.expect_capability(&config.downloader, Capability::Downloader, &mut errors);
        let mut previous: Option<(String, ContentTypes)> =
            downloader.map(|d| (d.short_name.clone(), d.factory.produces()));

        for name in &config.filter_stack {
            let filter = self.expect_capability(name, Capability::Filter, &mut errors);
            previous = match (filter, previous) {
                (Some(filter), Some((producer, produced))) => {
                    check_link(
                        &producer,
                        &produced,
                        &filter.short_name,
                        &filter.factory.accepts(),
                        &mut errors,
                    );
                    Some((filter.short_name.clone(), filter.factory.produces()))
                }
                (Some(filter), None) => {
                    Some((filter.short_name.clone(), filter.factory.produces()))
                }
                (None, _) => None,
            };
        }

        let extractor =
            self.expect_capability(&config.extractor, Capability::Extractor, &mut errors);
        if let (Some(extractor), Some((producer, produced))) = (extractor, previous) {
            check_link(
                &producer,
                &produced,
                &extractor.short_name,
                &extractor.factory.accepts(),
                &mut errors,
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError(errors))
        }
    }

    fn expect_capability(
        &self,
        name: &str,
        capability: Capability,
        errors: &mut Vec<String>,
    ) -> Option<&PluginDefinition> {
        match self.resolve(name) {
            Some(plugin) if plugin.has(capability) => Some(plugin),
            _ => {
                let available: Vec<&str> = self
                    .get_by_type(capability)
                    .map(|p| p.short_name.as_str())
                    .collect();
                errors.push(format!(
                    "no {capability} plugin named '{name}'; available: [{}]",
                    available.join(", ")
                ));
                None
            }
        }
    }

    /// Validates `config` and creates a fresh pipeline from it.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Config`] for an invalid stack, or the
    /// construction error of the first plugin that fails to build.
    pub fn build_pipeline(
        &self,
        config: &PipelineConfig,
        ctx: &PluginContext,
    ) -> Result<Pipeline, PluginError> {
        self.validate(config)?;

        let downloader = self.find(&config.downloader)?.factory.create_downloader(ctx)?;
        let filters = config
            .filter_stack
            .iter()
            .map(|name| self.find(name)?.factory.create_filter(ctx))
            .collect::<Result<Vec<Box<dyn Filter>>, PluginError>>()?;
        let extractor = self.find(&config.extractor)?.factory.create_extractor(ctx)?;

        Ok(Pipeline::new(downloader, filters, extractor)?)
    }

    /// Creates one instance of every allow rule matcher plugin.
    ///
    /// # Errors
    ///
    /// Returns the construction error of the first matcher that fails to build.
    pub fn build_matchers(&self) -> Result<Vec<Box<dyn AllowRuleMatcher>>, PluginError> {
        self.get_by_type(Capability::AllowRule)
            .map(|plugin| plugin.factory.create_matcher())
            .collect()
    }

    /// Creates a source plugin instance with its JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`] for an unknown name,
    /// [`PluginError::Unsupported`] if it is not a source, or the plugin's
    /// own configuration error.
    pub fn create_source(
        &self,
        name: &str,
        config: &Value,
    ) -> Result<Box<dyn HistorySource>, PluginError> {
        let plugin = self.find(name)?;
        if !plugin.has(Capability::Source) {
            return Err(PluginError::unsupported(&plugin.short_name, Capability::Source));
        }
        plugin.factory.create_source(config)
    }

    fn find(&self, name: &str) -> Result<&PluginDefinition, PluginError> {
        self.resolve(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }
}

fn check_link(
    producer: &str,
    produced: &ContentTypes,
    consumer: &str,
    accepted: &ContentTypes,
    errors: &mut Vec<String>,
) {
    if produced.is_disjoint(accepted) {
        errors.push(format!(
            "{consumer} accepts none of the types {producer} produces ([{}])",
            produced.iter().cloned().collect::<Vec<_>>().join(", ")
        ));
    }
}

fn protocol_violation(
    factory: &dyn PluginFactory,
    capabilities: &[Capability],
) -> Option<&'static str> {
    for capability in capabilities {
        let missing = match capability {
            Capability::Downloader => factory.produces().is_empty(),
            Capability::Filter => factory.produces().is_empty() || factory.accepts().is_empty(),
            Capability::Extractor => factory.accepts().is_empty(),
            Capability::AllowRule => factory.identifier().is_none_or(str::is_empty),
            Capability::Source => false,
        };
        if missing {
            return Some(match capability {
                Capability::Downloader => "downloader without produced content types",
                Capability::Filter => "filter without accepted or produced content types",
                Capability::Extractor => "extractor without accepted content types",
                Capability::AllowRule => "allow rule matcher without an identifier",
                Capability::Source => "source",
            });
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pipeline::{HTML_FRAGMENT, TEXT_HTML, content_types};

    struct Dummy {
        name: &'static str,
        module: &'static str,
        capabilities: Vec<Capability>,
        produces: ContentTypes,
        accepts: ContentTypes,
    }

    impl PluginFactory for Dummy {
        fn name(&self) -> &str {
            self.name
        }
        fn module(&self) -> &str {
            self.module
        }
        fn capabilities(&self) -> Vec<Capability> {
            self.capabilities.clone()
        }
        fn produces(&self) -> ContentTypes {
            self.produces.clone()
        }
        fn accepts(&self) -> ContentTypes {
            self.accepts.clone()
        }
    }

    fn filter(
        name: &'static str,
        module: &'static str,
        accepts: &str,
        produces: &str,
    ) -> Arc<dyn PluginFactory> {
        Arc::new(Dummy {
            name,
            module,
            capabilities: vec![Capability::Filter],
            produces: content_types([produces]),
            accepts: content_types([accepts]),
        })
    }

    #[test]
    fn test_load_registers_builtins() {
        let registry = PluginRegistry::load(Vec::new()).unwrap();

        assert!(registry.get_by_short_name("HttpDownloader").unwrap().has(Capability::Downloader));
        assert!(registry.get_by_short_name("HtmlContentFinder").unwrap().has(Capability::Filter));
        assert!(registry.get_by_short_name("HtmlExtractor").unwrap().has(Capability::Extractor));
        assert_eq!(registry.get_by_type(Capability::AllowRule).count(), 2);
        assert_eq!(registry.get_by_type(Capability::Source).count(), 1);
        assert!(registry.validate(&PipelineConfig::default()).is_ok());
    }

    #[test]
    fn test_lookup_by_id_and_short_name() {
        let registry = PluginRegistry::load(Vec::new()).unwrap();
        let by_name = registry.get_by_short_name("HtmlExtractor").unwrap();
        let by_id = registry.get_by_id(&by_name.id).unwrap();

        assert_eq!(by_name.id, by_id.id);
        assert!(by_name.id.ends_with(":HtmlExtractor"));
        assert!(registry.get_by_short_name("Nope").is_none());
        assert!(registry.get_by_id("nope:Nope").is_none());
    }

    #[test]
    fn test_name_collision_is_qualified_then_fatal() {
        let mut registry = PluginRegistry::new();
        assert!(registry.register(filter("Cleaner", "ext::a", TEXT_HTML, HTML_FRAGMENT)).unwrap());
        assert!(registry.register(filter("Cleaner", "ext::b", TEXT_HTML, HTML_FRAGMENT)).unwrap());

        assert!(registry.get_by_short_name("Cleaner").unwrap().id == "ext::a:Cleaner");
        assert!(registry.get_by_short_name("ext::b:Cleaner").is_some());

        let mut registry = PluginRegistry::new();
        registry.register(filter("ext::b:Cleaner", "ext::z", TEXT_HTML, HTML_FRAGMENT)).unwrap();
        registry.register(filter("Cleaner", "ext::a", TEXT_HTML, HTML_FRAGMENT)).unwrap();
        let err = registry
            .register(filter("Cleaner", "ext::b", TEXT_HTML, HTML_FRAGMENT))
            .unwrap_err();
        assert!(matches!(err, PluginError::NameCollision { .. }));
    }

    #[test]
    fn test_duplicate_id_is_skipped() {
        let mut registry = PluginRegistry::new();
        assert!(registry.register(filter("Cleaner", "ext::a", TEXT_HTML, HTML_FRAGMENT)).unwrap());
        assert!(!registry.register(filter("Cleaner", "ext::a", TEXT_HTML, HTML_FRAGMENT)).unwrap());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_plugins_without_capability_or_protocol_are_skipped() {
        let mut registry = PluginRegistry::new();
        let empty = Arc::new(Dummy {
            name: "Empty",
            module: "ext",
            capabilities: Vec::new(),
            produces: ContentTypes::new(),
            accepts: ContentTypes::new(),
        });
        let broken = Arc::new(Dummy {
            name: "Broken",
            module: "ext",
            capabilities: vec![Capability::Downloader],
            produces: ContentTypes::new(),
            accepts: ContentTypes::new(),
        });

        assert!(!registry.register(empty).unwrap());
        assert!(!registry.register(broken).unwrap());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let registry = PluginRegistry::load(Vec::new()).unwrap();
        let config = PipelineConfig {
            downloader: "HtmlExtractor".to_string(),
            filter_stack: vec!["Missing".to_string(), "HtmlContentFinder".to_string()],
            extractor: "Unknown".to_string(),
        };

        let err = registry.validate(&config).unwrap_err();
        assert_eq!(err.errors().len(), 3);
        assert!(err.errors()[0].contains("no downloader plugin named 'HtmlExtractor'"));
        assert!(err.errors()[0].contains("HttpDownloader"));
        assert!(err.errors()[1].contains("'Missing'"));
        assert!(err.errors()[2].contains("'Unknown'"));
    }

    #[test]
    fn test_validate_rejects_incompatible_filter() {
        let registry =
            PluginRegistry::load(vec![filter("PdfOnly", "ext", "application/pdf", "text/plain")])
                .unwrap();
        let config = PipelineConfig {
            filter_stack: vec!["PdfOnly".to_string()],
            ..PipelineConfig::default()
        };

        let err = registry.validate(&config).unwrap_err();
        assert!(err.errors().iter().any(|e| e.contains("PdfOnly accepts none")));
        assert!(err.errors().iter().any(|e| e.contains("HtmlExtractor accepts none")));
    }

    #[test]
    fn test_build_pipeline_from_default_config() {
        let registry = PluginRegistry::load(Vec::new()).unwrap();
        let pipeline = registry
            .build_pipeline(&PipelineConfig::default(), &PluginContext::default())
            .unwrap();

        assert_eq!(
            pipeline.stage_names(),
            vec!["HttpDownloader", "HtmlContentFinder", "HtmlExtractor"]
        );
    }

    #[test]
    fn test_create_source_rejects_non_source() {
        let registry = PluginRegistry::load(Vec::new()).unwrap();
        let err = registry
            .create_source("HtmlExtractor", &Value::Null)
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::Unsupported { .. }));
        assert!(matches!(
            registry.create_source("Nope", &Value::Null).err().unwrap(),
            PluginError::NotFound(_)
        ));
    }
}
