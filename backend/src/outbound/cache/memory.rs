//! Process-local cache with clock-driven expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;

use crate::domain::ports::{CacheKey, CacheStore, CacheStoreError, PrefixDeletion};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-memory [`CacheStore`]. Expiry is evaluated lazily against the
/// injected clock, so tests can move time forward deterministically.
pub struct InMemoryCacheStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Live entries right now.
    pub fn len(&self) -> usize {
        let now = self.clock.utc();
        self.lock()
            .map(|entries| entries.values().filter(|e| e.expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, CacheStoreError> {
        self.entries
            .lock()
            .map_err(|_| CacheStoreError::backend("cache lock poisoned"))
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        let now = self.clock.utc();
        TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn live(entries: &mut HashMap<String, Entry>, key: &str, now: DateTime<Utc>) -> Option<Entry> {
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheStoreError> {
        let now = self.clock.utc();
        let mut entries = self.lock()?;
        Ok(Self::live(&mut entries, key.as_str(), now).map(|entry| entry.value))
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheStoreError> {
        let expires_at = self.expiry(ttl);
        self.lock()?
            .insert(key.as_str().to_owned(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheStoreError> {
        self.lock()?.remove(key.as_str());
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<PrefixDeletion, CacheStoreError> {
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(PrefixDeletion::Deleted((before - entries.len()) as u64))
    }

    async fn increment(&self, key: &CacheKey, ttl: Duration) -> Result<i64, CacheStoreError> {
        let now = self.clock.utc();
        let fresh_expiry = self.expiry(ttl);
        let mut entries = self.lock()?;
        let (count, expires_at) = match Self::live(&mut entries, key.as_str(), now) {
            Some(entry) => {
                let current: i64 = entry.value.parse().map_err(|_| {
                    CacheStoreError::serialization(format!("{key} does not hold a counter"))
                })?;
                (current + 1, entry.expires_at)
            }
            None => (1, fresh_expiry),
        };
        entries.insert(
            key.as_str().to_owned(),
            Entry {
                value: count.to_string(),
                expires_at,
            },
        );
        Ok(count)
    }

    async fn time_to_live(&self, key: &CacheKey) -> Result<Option<Duration>, CacheStoreError> {
        let now = self.clock.utc();
        let mut entries = self.lock()?;
        Ok(Self::live(&mut entries, key.as_str(), now)
            .and_then(|entry| (entry.expires_at - now).to_std().ok()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::test_support::MutableClock;

    #[fixture]
    fn clock() -> Arc<MutableClock> {
        Arc::new(MutableClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0)
                .single()
                .expect("valid timestamp"),
        ))
    }

    fn key(raw: &str) -> CacheKey {
        CacheKey::new(raw).expect("valid key")
    }

    #[rstest]
    #[tokio::test]
    async fn entries_expire_with_the_clock(clock: Arc<MutableClock>) {
        let cache = InMemoryCacheStore::new(clock.clone());
        cache
            .set(&key("a"), "1".to_owned(), Duration::from_secs(10))
            .await
            .expect("set");

        clock.advance_seconds(9);
        assert_eq!(cache.get(&key("a")).await.expect("get"), Some("1".to_owned()));
        clock.advance_seconds(1);
        assert_eq!(cache.get(&key("a")).await.expect("get"), None);
    }

    #[rstest]
    #[tokio::test]
    async fn increments_keep_the_first_expiry(clock: Arc<MutableClock>) {
        let cache = InMemoryCacheStore::new(clock.clone());
        let counter = key("counter");

        assert_eq!(cache.increment(&counter, Duration::from_secs(60)).await.expect("inc"), 1);
        clock.advance_seconds(30);
        assert_eq!(cache.increment(&counter, Duration::from_secs(60)).await.expect("inc"), 2);

        let ttl = cache.time_to_live(&counter).await.expect("ttl");
        assert_eq!(ttl, Some(Duration::from_secs(30)));
    }

    #[rstest]
    #[tokio::test]
    async fn prefix_deletion_counts_removed_keys(clock: Arc<MutableClock>) {
        let cache = InMemoryCacheStore::new(clock);
        for raw in ["chat:room:1:a", "chat:room:1:b", "chat:room:2:a"] {
            cache
                .set(&key(raw), "x".to_owned(), Duration::from_secs(60))
                .await
                .expect("set");
        }

        let outcome = cache.delete_by_prefix("chat:room:1:").await.expect("delete");

        assert_eq!(outcome, PrefixDeletion::Deleted(2));
        assert_eq!(cache.len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn non_numeric_counters_are_rejected(clock: Arc<MutableClock>) {
        let cache = InMemoryCacheStore::new(clock);
        cache
            .set(&key("word"), "hello".to_owned(), Duration::from_secs(60))
            .await
            .expect("set");

        let err = cache
            .increment(&key("word"), Duration::from_secs(60))
            .await
            .expect_err("not a counter");
        assert!(matches!(err, CacheStoreError::Serialization { .. }));
    }
}
