//! SQLite cache store implementation.
//!
//! Implements `CacheStore` from `waypoint-core` on a single `cache_entries`
//! table. Values are JSON text; expiry is an optional timestamp column that
//! is checked on read, so expired keys behave as absent before they are purged.

use std::time::Duration;

use chrono::Utc;
use sqlx::Row;
use waypoint_core::storage::cache_store::CacheStore;
use waypoint_types::error::RepositoryError;

use super::pool::DatabasePool;
use crate::timestamp::format_timestamp;

/// SQLite-backed implementation of `CacheStore`.
pub struct SqliteCacheStore {
    pool: DatabasePool,
}

impl SqliteCacheStore {
    /// Create a cache store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS cache_entries (
                   key        TEXT PRIMARY KEY NOT NULL,
                   value      TEXT NOT NULL,
                   expires_at TEXT
               )"#,
        )
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cache_entries_expires_at ON cache_entries (expires_at)",
        )
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    /// Physically remove expired rows. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        let now = format_timestamp(&Utc::now());
        let result =
            sqlx::query("DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?")
                .bind(&now)
                .execute(&self.pool.writer)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        let now = format_timestamp(&Utc::now());
        let row = sqlx::query(
            "SELECT value FROM cache_entries WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(&now)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let value_str: String = row
                    .try_get("value")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                let value: serde_json::Value = serde_json::from_str(&value_str)
                    .map_err(|e| RepositoryError::Query(format!("invalid JSON value: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<(), RepositoryError> {
        let value_str = serde_json::to_string(value)?;
        let expires_at = match ttl {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|e| RepositoryError::Query(format!("invalid ttl: {e}")))?;
                Some(format_timestamp(&(Utc::now() + ttl)))
            }
            None => None,
        };

        sqlx::query(
            r#"INSERT INTO cache_entries (key, value, expires_at)
               VALUES (?, ?, ?)
               ON CONFLICT (key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at"#,
        )
        .bind(key)
        .bind(&value_str)
        .bind(&expires_at)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<bool, RepositoryError> {
        let now = format_timestamp(&Utc::now());
        // An expired row still counts as absent, but is removed all the same.
        let result = sqlx::query(
            "DELETE FROM cache_entries WHERE key = ? RETURNING (expires_at IS NULL OR expires_at > ?) AS live",
        )
        .bind(key)
        .bind(&now)
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match result {
            Some(row) => {
                let live: i64 = row
                    .try_get("live")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(live != 0)
            }
            None => Ok(false),
        }
    }
}
