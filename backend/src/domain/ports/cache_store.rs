//! Port for the shared key-value cache.
//!
//! The cache only ever holds derived views and short-lived counters, so
//! every caller must tolerate misses, stale reads within a TTL, and backend
//! failures.

use std::time::Duration;

use async_trait::async_trait;

use super::{CacheKey, define_port_error};

define_port_error! {
    /// Errors surfaced by cache adapters.
    pub enum CacheStoreError {
        /// Cache backend is unavailable or timing out.
        Backend { message: String } => "cache backend failure: {message}",
        /// Serialisation or deserialisation of cached content failed.
        Serialization { message: String } => "cache serialisation failed: {message}",
    }
}

/// Outcome of a prefix deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixDeletion {
    /// Matching keys were removed.
    Deleted(u64),
    /// The backend cannot enumerate keys; nothing was removed.
    Unsupported,
}

/// Key-value cache with per-entry TTLs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a live entry.
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheStoreError>;

    /// Write an entry expiring after `ttl`.
    async fn set(&self, key: &CacheKey, value: String, ttl: Duration)
    -> Result<(), CacheStoreError>;

    /// Remove an entry; removing a missing entry succeeds.
    async fn delete(&self, key: &CacheKey) -> Result<(), CacheStoreError>;

    /// Best-effort removal of every key starting with `prefix`.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<PrefixDeletion, CacheStoreError>;

    /// Atomically increment a counter, returning the new value.
    ///
    /// A counter created by this call expires after `ttl`; incrementing an
    /// existing counter leaves its expiry untouched.
    async fn increment(&self, key: &CacheKey, ttl: Duration) -> Result<i64, CacheStoreError>;

    /// Remaining lifetime of an entry, `None` when missing or unbounded.
    async fn time_to_live(&self, key: &CacheKey) -> Result<Option<Duration>, CacheStoreError>;
}

/// Fixture cache that stores nothing: every read misses, counters never
/// accumulate, and prefix deletion is unsupported.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixtureCacheStore;

#[async_trait]
impl CacheStore for FixtureCacheStore {
    async fn get(&self, _key: &CacheKey) -> Result<Option<String>, CacheStoreError> {
        Ok(None)
    }

    async fn set(
        &self,
        _key: &CacheKey,
        _value: String,
        _ttl: Duration,
    ) -> Result<(), CacheStoreError> {
        Ok(())
    }

    async fn delete(&self, _key: &CacheKey) -> Result<(), CacheStoreError> {
        Ok(())
    }

    async fn delete_by_prefix(&self, _prefix: &str) -> Result<PrefixDeletion, CacheStoreError> {
        Ok(PrefixDeletion::Unsupported)
    }

    async fn increment(&self, _key: &CacheKey, _ttl: Duration) -> Result<i64, CacheStoreError> {
        Ok(1)
    }

    async fn time_to_live(&self, _key: &CacheKey) -> Result<Option<Duration>, CacheStoreError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    //! Regression coverage for this module.

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[tokio::test]
    async fn fixture_cache_always_misses() {
        let cache = FixtureCacheStore;
        let key = CacheKey::new("chat:rooms").expect("valid key");
        cache
            .set(&key, "[]".to_owned(), Duration::from_secs(60))
            .await
            .expect("set succeeds");

        assert!(cache.get(&key).await.expect("get succeeds").is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn fixture_cache_cannot_delete_by_prefix() {
        let outcome = FixtureCacheStore
            .delete_by_prefix("chat:")
            .await
            .expect("call succeeds");
        assert_eq!(outcome, PrefixDeletion::Unsupported);
    }

    #[rstest]
    fn backend_error_formats_message() {
        let err = CacheStoreError::backend("connection refused");
        assert!(err.to_string().contains("connection refused"));
    }
}
