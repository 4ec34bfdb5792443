//! Cache adapters implementing the [`CacheStore`] port.
//!
//! - [`RedisCacheStore`]: `bb8-redis` pool; counters use a Lua script so the
//!   increment and its first expiry are one atomic step.
//! - [`InMemoryCacheStore`]: process-local map driven by the injected clock,
//!   used for single-node runs and tests.

mod memory;

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::RedisConnectionManager;
use bb8_redis::bb8::{self, Pool};
use bb8_redis::redis::{self, RedisError};

pub use self::memory::InMemoryCacheStore;
use crate::domain::ports::{CacheKey, CacheStore, CacheStoreError, PrefixDeletion};

/// Keys examined per `SCAN` round trip during prefix deletion.
const SCAN_BATCH_SIZE: usize = 200;

const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Redis-backed cache.
#[derive(Clone)]
pub struct RedisCacheStore {
    pool: Pool<RedisConnectionManager>,
}

impl RedisCacheStore {
    /// Build a pooled store for `url` (`redis://host:port/db`).
    pub async fn connect(url: &str) -> Result<Self, CacheStoreError> {
        let manager = RedisConnectionManager::new(url).map_err(backend_error)?;
        let pool = Pool::builder().build(manager).await.map_err(backend_error)?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: Pool<RedisConnectionManager>) -> Self {
        Self { pool }
    }

    async fn connection(
        &self,
    ) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>, CacheStoreError> {
        self.pool.get().await.map_err(|err| {
            CacheStoreError::backend(format!("failed to get redis connection: {err}"))
        })
    }
}

fn backend_error(err: RedisError) -> CacheStoreError {
    CacheStoreError::backend(err.to_string())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Escape glob metacharacters so `prefix` matches literally in `SCAN MATCH`.
fn scan_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheStoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("GET")
            .arg(key.as_str())
            .query_async(&mut *conn)
            .await
            .map_err(backend_error)
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheStoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(key.as_str())
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query_async::<()>(&mut *conn)
            .await
            .map_err(backend_error)
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheStoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(key.as_str())
            .query_async::<()>(&mut *conn)
            .await
            .map_err(backend_error)
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<PrefixDeletion, CacheStoreError> {
        let mut conn = self.connection().await?;
        let pattern = scan_pattern(prefix);
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH_SIZE)
                .query_async(&mut *conn)
                .await
                .map_err(backend_error)?;
            if !keys.is_empty() {
                let removed: u64 = redis::cmd("UNLINK")
                    .arg(&keys)
                    .query_async(&mut *conn)
                    .await
                    .map_err(backend_error)?;
                deleted += removed;
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(PrefixDeletion::Deleted(deleted))
    }

    async fn increment(&self, key: &CacheKey, ttl: Duration) -> Result<i64, CacheStoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("EVAL")
            .arg(INCREMENT_SCRIPT)
            .arg(1)
            .arg(key.as_str())
            .arg(millis(ttl))
            .query_async(&mut *conn)
            .await
            .map_err(backend_error)
    }

    async fn time_to_live(&self, key: &CacheKey) -> Result<Option<Duration>, CacheStoreError> {
        let mut conn = self.connection().await?;
        let remaining: i64 = redis::cmd("PTTL")
            .arg(key.as_str())
            .query_async(&mut *conn)
            .await
            .map_err(backend_error)?;
        // -2: missing, -1: no expiry
        Ok(u64::try_from(remaining).ok().map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("chat:room:3:history:page:", "chat:room:3:history:page:*")]
    #[case("odd*key?[x]", r"odd\*key\?\[x\]*")]
    fn scan_patterns_match_prefixes_literally(#[case] prefix: &str, #[case] expected: &str) {
        assert_eq!(scan_pattern(prefix), expected);
    }

    #[rstest]
    #[case(Duration::from_secs(60), 60_000)]
    #[case(Duration::ZERO, 1)]
    fn ttls_are_sent_in_whole_milliseconds(#[case] ttl: Duration, #[case] expected: u64) {
        assert_eq!(millis(ttl), expected);
    }
}
