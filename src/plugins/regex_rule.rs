//! `Regex` allow rules: a regular expression found anywhere in the full URL.
//!
//! A leading `i` makes the expression case-insensitive, so `ihttps?://[^/]+/$`
//! matches the root page of a site in any case.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use tracing::warn;
use url::Url;

use crate::allowlist::{AllowRuleMatcher, Hostname};
use crate::pipeline::StageError;
use crate::plugin::{Capability, PluginError, PluginFactory};

const IDENTIFIER: &str = "Regex";

#[derive(Debug, Default)]
pub struct RegexMatcher {
    compiled: HashMap<Hostname, Vec<Regex>>,
}

impl RegexMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(hostname: &Hostname, values: &BTreeSet<String>) -> Vec<Regex> {
        values
            .iter()
            .filter_map(|value| {
                let (pattern, insensitive) = match value.strip_prefix('i') {
                    Some(rest) => (rest, true),
                    None => (value.as_str(), false),
                };
                RegexBuilder::new(pattern)
                    .case_insensitive(insensitive)
                    .build()
                    .inspect_err(|err| {
                        warn!(
                            hostname = %hostname,
                            value = %value,
                            error = %err,
                            "invalid regex rule; ignoring"
                        );
                    })
                    .ok()
            })
            .collect()
    }
}

#[async_trait]
impl AllowRuleMatcher for RegexMatcher {
    fn identifier(&self) -> &str {
        IDENTIFIER
    }

    async fn enter(&mut self) -> Result<(), StageError> {
        self.compiled.clear();
        Ok(())
    }

    async fn exit(&mut self) -> Result<(), StageError> {
        self.compiled.clear();
        Ok(())
    }

    async fn matches(
        &mut self,
        hostname: &Hostname,
        url: &str,
        _parsed: &Url,
        values: &BTreeSet<String>,
    ) -> bool {
        let rules = self
            .compiled
            .entry(hostname.clone())
            .or_insert_with(|| Self::compile(hostname, values));
        rules.iter().any(|rule| rule.is_match(url))
    }
}

/// Factory for [`RegexMatcher`].
#[derive(Debug, Default)]
pub struct RegexPlugin;

impl PluginFactory for RegexPlugin {
    fn name(&self) -> &str {
        "RegexAllowRule"
    }

    fn module(&self) -> &str {
        module_path!()
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::AllowRule]
    }

    fn identifier(&self) -> Option<&str> {
        Some(IDENTIFIER)
    }

    fn create_matcher(&self) -> Result<Box<dyn AllowRuleMatcher>, PluginError> {
        Ok(Box::new(RegexMatcher::new()))
    }
}
