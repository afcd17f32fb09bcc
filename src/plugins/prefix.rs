//! `Prefix` allow rules: the URL path starts with a given value.
//!
//! `/blog` allows `/blog`, `/blog/post` and `/blogroll`. A leading `i`
//! (`i/Blog`) makes the comparison case-insensitive. Values not starting with
//! `/` or `i/` are ignored.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use regex::Regex;
use tracing::warn;
use url::Url;

use crate::allowlist::{AllowRuleMatcher, Hostname};
use crate::pipeline::StageError;
use crate::plugin::{Capability, PluginError, PluginFactory};

const IDENTIFIER: &str = "Prefix";

#[derive(Debug, Default)]
pub struct PrefixMatcher {
    compiled: HashMap<Hostname, Vec<Regex>>,
}

impl PrefixMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(values: &BTreeSet<String>) -> Vec<Regex> {
        values
            .iter()
            .filter_map(|value| {
                let insensitive = value.strip_prefix('i').filter(|rest| rest.starts_with('/'));
                let pattern = if let Some(rest) = insensitive {
                    format!("(?i)^{}", regex::escape(rest))
                } else if value.starts_with('/') {
                    format!("^{}", regex::escape(value))
                } else {
                    warn!(value = %value, "prefix rule must start with `/` or `i/`; ignoring");
                    return None;
                };
                Regex::new(&pattern).ok()
            })
            .collect()
    }
}

#[async_trait]
impl AllowRuleMatcher for PrefixMatcher {
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
        _url: &str,
        parsed: &Url,
        values: &BTreeSet<String>,
    ) -> bool {
        let rules = self
            .compiled
            .entry(hostname.clone())
            .or_insert_with(|| Self::compile(values));
        rules.iter().any(|rule| rule.is_match(parsed.path()))
    }
}

/// Factory for [`PrefixMatcher`].
#[derive(Debug, Default)]
pub struct PrefixPlugin;

impl PluginFactory for PrefixPlugin {
    fn name(&self) -> &str {
        "PrefixAllowRule"
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
        Ok(Box::new(PrefixMatcher::new()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn check(values: &[&str], url: &str) -> bool {
        let mut matcher = PrefixMatcher::new();
        matcher.enter().await.unwrap();
        let parsed = Url::parse(url).unwrap();
        let hostname = Hostname::new(parsed.host_str().unwrap());
        let values = values.iter().map(ToString::to_string).collect();
        matcher.matches(&hostname, url, &parsed, &values).await
    }

    #[tokio::test]
    async fn test_prefix_matches_path_start() {
        assert!(check(&["/blog"], "https://example.com/blog/post").await);
        assert!(check(&["/blog"], "https://example.com/blogroll").await);
        assert!(!check(&["/blog"], "https://example.com/about/blog").await);
        assert!(!check(&["/blog"], "https://example.com/Blog").await);
    }

    #[tokio::test]
    async fn test_case_insensitive_prefix() {
        assert!(check(&["i/blog"], "https://example.com/BLOG/x").await);
    }

    #[tokio::test]
    async fn test_regex_metacharacters_are_literal() {
        assert!(check(&["/a.b"], "https://example.com/a.b/c").await);
        assert!(!check(&["/a.b"], "https://example.com/axb").await);
    }

    #[tokio::test]
    async fn test_malformed_values_never_match() {
        assert!(!check(&["blog"], "https://example.com/blog").await);
    }
}
