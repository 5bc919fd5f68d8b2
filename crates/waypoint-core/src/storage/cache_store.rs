//! Cache store trait.
//!
//! A minimal expiring key-value interface: the cache backend of
//! `StateRepository` is written against it, so any store offering get / put
//! with TTL / forget can hold workflow state. Implementations live in
//! waypoint-infra.

use std::future::Future;
use std::time::Duration;

use waypoint_types::error::RepositoryError;

/// Trait for an expiring key-value store.
///
/// Stores arbitrary JSON values keyed by string. The store is not queryable
/// by value; anything beyond point lookups must be indexed by the caller.
pub trait CacheStore: Send + Sync {
    /// Get a value by key. Returns None if the key is absent or expired.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<serde_json::Value>, RepositoryError>> + Send;

    /// Set a value (upsert). `ttl = None` stores the key without expiry.
    fn put(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Remove a key. Returns `true` if a live entry was removed.
    fn forget(&self, key: &str) -> impl Future<Output = Result<bool, RepositoryError>> + Send;
}
