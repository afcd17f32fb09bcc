//! Error types shared by the `SQLite`-backed stores.

use std::fmt;

use thiserror::Error;

/// Structured classification for database failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Any other database failure.
    Other,
}

impl DbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::Database(database_error) if is_busy_or_locked(database_error.as_ref()) => {
                Self::BusyOrLocked
            }
            _ => Self::Other,
        }
    }

    /// Returns true when no further query on the same pool can succeed.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::PoolClosed)
    }

    /// Returns true when the same query may succeed once contention clears.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::BusyOrLocked | Self::PoolTimeout)
    }
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn is_busy_or_locked(database_error: &(dyn sqlx::error::DatabaseError + 'static)) -> bool {
    if matches!(
        database_error.code().as_deref(),
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
    ) {
        return true;
    }

    let message = database_error.message().to_ascii_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("database is busy")
}

/// Errors raised by the history and allowlist stores.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error ({kind}): {message}")]
    Database {
        /// Typed classification used to tell fatal from per-item failures.
        kind: DbErrorKind,
        /// Human-readable database error text.
        message: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: DbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl StoreError {
    /// Returns the typed database error kind.
    #[must_use]
    pub fn database_kind(&self) -> DbErrorKind {
        match self {
            Self::Database { kind, .. } => *kind,
        }
    }

    /// Returns true when the underlying pool can no longer serve queries.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.database_kind().is_fatal()
    }

    /// Returns true when retrying the operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.database_kind().is_transient()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::{Database, DatabaseOptions};

    #[test]
    fn test_store_error_database_message() {
        let err = StoreError::Database {
            kind: DbErrorKind::Other,
            message: "connection failed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("database error"));
        assert!(msg.contains("other"));
        assert!(msg.contains("connection failed"));
    }

    #[test]
    fn test_pool_closed_is_fatal() {
        let err = StoreError::from(sqlx::Error::PoolClosed);
        assert_eq!(err.database_kind(), DbErrorKind::PoolClosed);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_pool_timeout_is_transient_not_fatal() {
        let err = StoreError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(err.database_kind(), DbErrorKind::PoolTimeout);
        assert!(!err.is_fatal());
        assert!(err.is_transient());
    }

    #[test]
    fn test_row_not_found_is_neither_fatal_nor_transient() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.database_kind(), DbErrorKind::Other);
        assert!(!err.is_fatal());
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_write_against_held_lock_is_busy() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = Database::new_with_options(
            &temp_dir.path().join("busy.db"),
            DatabaseOptions {
                max_connections: 2,
                busy_timeout_ms: 0,
            },
        )
        .await
        .unwrap();

        let mut holder = db.pool().acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *holder)
            .await
            .unwrap();

        let err = sqlx::query("INSERT INTO allow_hosts (hostname, allowed) VALUES ('a.example', 1)")
            .execute(db.pool())
            .await
            .unwrap_err();
        let err = StoreError::from(err);

        assert_eq!(err.database_kind(), DbErrorKind::BusyOrLocked);
        assert!(err.is_transient());
        assert!(err.to_string().contains("busy_or_locked"));
    }
}
