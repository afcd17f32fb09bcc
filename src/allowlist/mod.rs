//! Hostname-hierarchical allow/deny policy.
//!
//! The policy lives in two tables: `allow_hosts` marks a hostname either
//! allowlisted or denylisted, and `allow_rules` attaches matcher rules to
//! allowlisted hosts.
//!
//! For a URL on `a.b.example.com` the engine considers the chain
//! `a.b.example.com`, `b.example.com`, `example.com`:
//! - [`DecisionEngine::is_blocked`] walks it general to specific; any
//!   denylisted level blocks the URL
//! - [`DecisionEngine::is_allowed`] walks it specific to general; the first
//!   allowlisted level with a matching rule allows the URL, and nothing
//!   matching means not allowed

mod engine;
mod hostname;
mod matcher;
mod store;

pub use engine::DecisionEngine;
pub use hostname::{Hostname, hostname_chain};
pub use matcher::AllowRuleMatcher;
pub use store::{AllowListStore, RuleSet};

use thiserror::Error;

use crate::error::StoreError;
use crate::pipeline::StageError;

/// Errors raised by the decision engine.
#[derive(Debug, Clone, Error)]
pub enum AllowListError {
    #[error("allow/deny engine used before enter")]
    NotEntered,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("allow rule matcher failed: {0}")]
    Matcher(#[from] StageError),
}

impl AllowListError {
    /// Returns true when the policy database can no longer be queried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_fatal())
    }
}
