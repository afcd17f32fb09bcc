use std::collections::HashMap;

use tracing::{debug, instrument, warn};
use url::Url;

use super::{AllowListError, AllowListStore, AllowRuleMatcher, Hostname, RuleSet, hostname_chain};
use crate::pipeline::StageError;

/// Decides, per URL, whether the allow/deny policy permits fetching it.
///
/// Lookups are cached per hostname for the lifetime of one enter/exit
/// session, so a backlog dominated by a few sites costs a handful of queries.
pub struct DecisionEngine {
    store: AllowListStore,
    matchers: HashMap<String, Box<dyn AllowRuleMatcher>>,
    blocked_cache: HashMap<Hostname, bool>,
    rule_cache: HashMap<Hostname, Option<RuleSet>>,
    entered: bool,
}

impl std::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut identifiers: Vec<&String> = self.matchers.keys().collect();
        identifiers.sort();
        f.debug_struct("DecisionEngine")
            .field("matchers", &identifiers)
            .field("cached_hosts", &self.rule_cache.len())
            .field("entered", &self.entered)
            .finish_non_exhaustive()
    }
}

impl DecisionEngine {
    /// Creates an engine over `store` using `matchers`, keyed by identifier.
    ///
    /// A later matcher with an identifier already seen replaces the earlier one.
    #[must_use]
    pub fn new(store: AllowListStore, matchers: Vec<Box<dyn AllowRuleMatcher>>) -> Self {
        let mut by_identifier = HashMap::new();
        for matcher in matchers {
            let identifier = matcher.identifier().to_string();
            if by_identifier.insert(identifier.clone(), matcher).is_some() {
                warn!(identifier, "duplicate allow rule matcher identifier; keeping the last one");
            }
        }
        debug!(matchers = by_identifier.len(), "allow/deny engine created");

        Self {
            store,
            matchers: by_identifier,
            blocked_cache: HashMap::new(),
            rule_cache: HashMap::new(),
            entered: false,
        }
    }

    /// Clears the caches and enters every matcher.
    ///
    /// # Errors
    ///
    /// Returns [`AllowListError::Matcher`] if a matcher fails to enter; the
    /// matchers already entered are exited again.
    pub async fn enter(&mut self) -> Result<(), AllowListError> {
        if self.entered {
            return Ok(());
        }
        self.blocked_cache.clear();
        self.rule_cache.clear();

        let mut identifiers: Vec<String> = self.matchers.keys().cloned().collect();
        identifiers.sort();
        for (position, identifier) in identifiers.iter().enumerate() {
            let Some(matcher) = self.matchers.get_mut(identifier) else {
                continue;
            };
            if let Err(err) = matcher.enter().await {
                for done in &identifiers[..position] {
                    if let Some(matcher) = self.matchers.get_mut(done)
                        && let Err(exit_err) = matcher.exit().await
                    {
                        warn!(identifier = %done, error = %exit_err, "matcher exit failed");
                    }
                }
                return Err(err.into());
            }
        }

        self.entered = true;
        Ok(())
    }

    /// Exits every matcher and drops the session caches.
    ///
    /// # Errors
    ///
    /// Returns the first matcher exit failure after all matchers were exited.
    pub async fn exit(&mut self) -> Result<(), AllowListError> {
        if !self.entered {
            return Ok(());
        }
        self.entered = false;
        self.blocked_cache.clear();
        self.rule_cache.clear();

        let mut first_error: Option<StageError> = None;
        for (identifier, matcher) in &mut self.matchers {
            if let Err(err) = matcher.exit().await {
                warn!(identifier = %identifier, error = %err, "matcher exit failed");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), |err| Err(err.into()))
    }

    /// Returns true if the host of `url` or any ancestor domain is denylisted.
    ///
    /// # Errors
    ///
    /// Returns [`AllowListError::NotEntered`] outside enter/exit and
    /// [`AllowListError::Store`] if a lookup fails.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn is_blocked(&mut self, url: &Url) -> Result<bool, AllowListError> {
        self.ensure_entered()?;

        for hostname in hostname_chain(url).into_iter().rev() {
            let blocked = match self.blocked_cache.get(&hostname) {
                Some(blocked) => *blocked,
                None => {
                    let blocked = self.store.is_denylisted(&hostname).await?;
                    self.blocked_cache.insert(hostname.clone(), blocked);
                    blocked
                }
            };
            if blocked {
                debug!(hostname = %hostname, "denylisted");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns true if the most specific allowlisted level with a matching rule exists.
    ///
    /// Levels without an allowlisted host, or whose rules do not match, fall
    /// through to the next more general domain. No match anywhere means the
    /// URL is not allowed.
    ///
    /// # Errors
    ///
    /// Returns [`AllowListError::NotEntered`] outside enter/exit and
    /// [`AllowListError::Store`] if a lookup fails.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn is_allowed(&mut self, url: &Url) -> Result<bool, AllowListError> {
        self.ensure_entered()?;
        let raw = url.as_str();

        for hostname in hostname_chain(url) {
            if !self.rule_cache.contains_key(&hostname) {
                let rules = self.store.allowed_rules(&hostname).await?;
                self.rule_cache.insert(hostname.clone(), rules);
            }
            let Some(Some(rules)) = self.rule_cache.get(&hostname) else {
                continue;
            };

            for (identifier, values) in rules {
                let Some(matcher) = self.matchers.get_mut(identifier) else {
                    warn!(
                        identifier = %identifier,
                        hostname = %hostname,
                        "no matcher for allow rules; skipping"
                    );
                    continue;
                };
                if matcher.matches(&hostname, raw, url, values).await {
                    debug!(hostname = %hostname, matcher = %identifier, "allowed");
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn ensure_entered(&self) -> Result<(), AllowListError> {
        if self.entered {
            Ok(())
        } else {
            Err(AllowListError::NotEntered)
        }
    }
}
