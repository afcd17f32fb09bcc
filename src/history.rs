//! Browsing history records.
//!
//! A [`HistoryItem`] is what a source yields: a visited URL, an optional page
//! title and the visit time. The `history` table keeps one [`HistoryRecord`]
//! per URL, remembering when the page was last fetched (`last_scrape`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::instrument;

use crate::db::Database;
use crate::error::StoreError;

/// Result type for history store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// One visit produced by a history source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub url: String,
    pub title: Option<String>,
    pub last_visit: DateTime<Utc>,
}

impl HistoryItem {
    #[must_use]
    pub fn new(url: impl Into<String>, title: Option<String>, last_visit: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            title,
            last_visit,
        }
    }
}

/// A persisted `history` row.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct HistoryRecord {
    pub url: String,
    pub title: Option<String>,
    pub last_visit: DateTime<Utc>,
    /// `None` until a fetch of the page produced indexable content.
    pub last_scrape: Option<DateTime<Utc>>,
}

/// `SQLite`-backed access to the `history` table.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    db: Database,
}

impl HistoryStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts or updates the record for `item.url`.
    ///
    /// `last_visit` is always overwritten. A `None` `last_scrape` keeps
    /// whatever value the row already had, and a missing title keeps the
    /// stored one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    #[instrument(skip(self, item), fields(url = %item.url, scraped = last_scrape.is_some()))]
    pub async fn record_visit(
        &self,
        item: &HistoryItem,
        last_scrape: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r"INSERT INTO history (url, title, last_visit, last_scrape)
              VALUES (?, ?, ?, ?)
              ON CONFLICT(url) DO UPDATE SET
                  title = COALESCE(excluded.title, history.title),
                  last_visit = excluded.last_visit,
                  last_scrape = COALESCE(excluded.last_scrape, history.last_scrape)",
        )
        .bind(&item.url)
        .bind(item.title.as_deref())
        .bind(item.last_visit)
        .bind(last_scrape)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Looks up the record for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn find(&self, url: &str) -> Result<Option<HistoryRecord>> {
        let record = sqlx::query_as::<_, HistoryRecord>(
            "SELECT url, title, last_visit, last_scrape FROM history WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(record)
    }

    /// Returns true when `url` was successfully fetched at or after `since`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn scraped_since(&self, url: &str, since: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .find(url)
            .await?
            .and_then(|record| record.last_scrape)
            .is_some_and(|scraped| scraped >= since))
    }

    /// Returns the number of rows in the history table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM history")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }
}
