//! Read-only access to the `allow_hosts` / `allow_rules` tables.

use std::collections::{BTreeMap, BTreeSet};

use sqlx::Row;
use tracing::instrument;

use super::Hostname;
use crate::db::Database;
use crate::error::StoreError;

/// Rule values of one allowlisted host, grouped by matcher identifier.
pub type RuleSet = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone)]
pub struct AllowListStore {
    db: Database,
}

impl AllowListStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns true when `hostname` has a denylisted row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(level = "debug", skip(self), fields(hostname = %hostname))]
    pub async fn is_denylisted(&self, hostname: &Hostname) -> Result<bool, StoreError> {
        let (denied,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM allow_hosts WHERE hostname = ? AND allowed = 0)",
        )
        .bind(hostname.as_str())
        .fetch_one(self.db.pool())
        .await?;

        Ok(denied)
    }

    /// Loads the rules of `hostname` if it is an allowlisted host.
    ///
    /// Returns `None` when the host has no allowlisted row. An allowlisted
    /// host without rules yields an empty set, which never matches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a query fails.
    #[instrument(level = "debug", skip(self), fields(hostname = %hostname))]
    pub async fn allowed_rules(&self, hostname: &Hostname) -> Result<Option<RuleSet>, StoreError> {
        let host_id: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM allow_hosts WHERE hostname = ? AND allowed = 1")
                .bind(hostname.as_str())
                .fetch_optional(self.db.pool())
                .await?;

        let Some((host_id,)) = host_id else {
            return Ok(None);
        };

        let rows = sqlx::query("SELECT plugin_id, value FROM allow_rules WHERE host_id = ?")
            .bind(host_id)
            .fetch_all(self.db.pool())
            .await?;

        let mut rules = RuleSet::new();
        for row in rows {
            let plugin_id: String = row.try_get("plugin_id")?;
            let value: String = row.try_get("value")?;
            rules.entry(plugin_id).or_default().insert(value);
        }

        Ok(Some(rules))
    }
}
