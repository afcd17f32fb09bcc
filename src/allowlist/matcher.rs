use std::collections::BTreeSet;

use async_trait::async_trait;
use url::Url;

use super::Hostname;
use crate::pipeline::StageError;

/// Interprets the rule values stored for one matcher identifier.
///
/// Values are opaque to everything but the matcher named by the rule's
/// `plugin_id`. Matchers may cache compiled rules per hostname between
/// [`enter`](Self::enter) and [`exit`](Self::exit).
#[async_trait]
pub trait AllowRuleMatcher: Send + Sync {
    /// Value stored in `allow_rules.plugin_id` for this matcher's rules.
    fn identifier(&self) -> &str;

    async fn enter(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    async fn exit(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    /// Returns true if any of `values` (the rules of `hostname`) matches the URL.
    async fn matches(
        &mut self,
        hostname: &Hostname,
        url: &str,
        parsed: &Url,
        values: &BTreeSet<String>,
    ) -> bool;
}
