//! Read-through cache of derived views.
//!
//! Writers always commit to the durable store first and invalidate second.
//! Invalidating before the write would let a concurrent reader repopulate
//! the old value in the gap.
//!
//! Cache failures never fail the caller: reads fall through to the compute
//! function and failed writes or deletions are logged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mockable::Clock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::domain::ports::{CacheKey, CacheStore, PrefixDeletion};
use crate::domain::{CacheTtls, Error, RoomId, UserId};

/// Key builders for every cached view.
pub mod keys {
    use pagination::Direction;

    use super::CacheKey;
    use crate::domain::{RoomId, UserId};

    pub fn room_list() -> CacheKey {
        CacheKey::from_segments(&["chat", "rooms", "active"])
    }

    pub fn room_stats(room_id: RoomId) -> CacheKey {
        CacheKey::from_segments(&["chat", "room", &room_id.to_string(), "stats"])
    }

    pub fn online_users(room_id: RoomId) -> CacheKey {
        CacheKey::from_segments(&["chat", "room", &room_id.to_string(), "online"])
    }

    pub fn presence(room_id: RoomId, user_id: UserId) -> CacheKey {
        CacheKey::from_segments(&[
            "chat",
            "room",
            &room_id.to_string(),
            "presence",
            &user_id.to_string(),
        ])
    }

    pub fn history_generation(room_id: RoomId) -> CacheKey {
        CacheKey::from_segments(&["chat", "room", &room_id.to_string(), "history", "gen"])
    }

    /// Prefix shared by every cached history page of a room.
    pub fn history_page_prefix(room_id: RoomId) -> String {
        format!("chat:room:{room_id}:history:page:")
    }

    /// Page key; `anchor` is an encoded cursor or `None` for the newest page.
    pub fn history_page(
        room_id: RoomId,
        generation: i64,
        direction: Direction,
        anchor: Option<&str>,
        limit: usize,
    ) -> CacheKey {
        CacheKey::from_segments(&[
            history_page_prefix(room_id).trim_end_matches(':'),
            &generation.to_string(),
            direction.as_str(),
            anchor.unwrap_or("latest"),
            &limit.to_string(),
        ])
    }

    pub fn message_rate(user_id: UserId, room_id: RoomId) -> CacheKey {
        CacheKey::from_segments(&[
            "chat",
            "ratelimit",
            "message",
            &user_id.to_string(),
            &room_id.to_string(),
        ])
    }

    pub fn spam_frequency(room_id: RoomId, user_id: UserId) -> CacheKey {
        CacheKey::from_segments(&[
            "chat",
            "spam",
            "freq",
            &room_id.to_string(),
            &user_id.to_string(),
        ])
    }

    pub fn spam_duplicates(room_id: RoomId, user_id: UserId) -> CacheKey {
        CacheKey::from_segments(&[
            "chat",
            "spam",
            "dup",
            &room_id.to_string(),
            &user_id.to_string(),
        ])
    }
}

/// Read-through cache facade shared by the services.
#[derive(Clone)]
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    ttls: CacheTtls,
}

impl CacheLayer {
    /// Wrap `store`; `clock` seeds history generations.
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, ttls: CacheTtls) -> Self {
        Self { store, clock, ttls }
    }

    /// Underlying store, for counters that bypass the view helpers.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn ttls(&self) -> &CacheTtls {
        &self.ttls
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// Errors from `compute` propagate; cache errors do not.
    pub async fn remember<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        compute: F,
    ) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!(key = %key, "cache hit");
                    return Ok(value);
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "discarding undecodable cache entry");
                }
            },
            Ok(None) => debug!(key = %key, "cache miss"),
            Err(err) => warn!(key = %key, error = %err, "cache read failed; computing"),
        }

        let value = compute().await?;
        match serde_json::to_string(&value) {
            Ok(raw) => {
                if let Err(err) = self.store.set(key, raw, ttl).await {
                    warn!(key = %key, error = %err, "cache write failed");
                }
            }
            Err(err) => warn!(key = %key, error = %err, "cache value not serialisable"),
        }
        Ok(value)
    }

    /// Drop a single entry.
    pub async fn forget(&self, key: &CacheKey) {
        if let Err(err) = self.store.delete(key).await {
            warn!(key = %key, error = %err, "cache invalidation failed");
        }
    }

    /// Drop every entry under `prefix` where the backend allows it.
    pub async fn forget_by_prefix(&self, prefix: &str) {
        match self.store.delete_by_prefix(prefix).await {
            Ok(PrefixDeletion::Deleted(count)) => {
                debug!(prefix, count, "cache prefix invalidated");
            }
            Ok(PrefixDeletion::Unsupported) => {
                warn!(prefix, "cache backend cannot delete by prefix; entries expire by TTL");
            }
            Err(err) => warn!(prefix, error = %err, "cache prefix invalidation failed"),
        }
    }

    /// Current history generation for a room; `None` when the cache cannot
    /// be read, in which case pages must not be cached.
    pub async fn history_generation(&self, room_id: RoomId) -> Option<i64> {
        let key = keys::history_generation(room_id);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match raw.trim().parse() {
                Ok(generation) => Some(generation),
                Err(err) => {
                    warn!(key = %key, error = %err, "history generation is not a number");
                    None
                }
            },
            Ok(None) => Some(0),
            Err(err) => {
                warn!(key = %key, error = %err, "history generation unreadable");
                None
            }
        }
    }

    /// Retire every cached history page of a room.
    ///
    /// Generations never repeat: a counter that comes back from expiry or
    /// eviction at 1 is moved to the current time in milliseconds, past
    /// every value the lost counter could have handed out.
    pub async fn invalidate_history(&self, room_id: RoomId) {
        let key = keys::history_generation(room_id);
        match self
            .store
            .increment(&key, self.ttls.history_generation)
            .await
        {
            Ok(1) => self.reseed_generation(&key).await,
            Ok(_) => {}
            Err(err) => warn!(key = %key, error = %err, "history generation bump failed"),
        }
        self.forget_by_prefix(&keys::history_page_prefix(room_id))
            .await;
    }

    async fn reseed_generation(&self, key: &CacheKey) {
        let seed = self.clock.utc().timestamp_millis();
        if let Err(err) = self
            .store
            .set(key, seed.to_string(), self.ttls.history_generation)
            .await
        {
            warn!(key = %key, error = %err, "history generation reseed failed");
        }
    }

    /// Invalidate everything derived from a room's messages and memberships.
    pub async fn invalidate_room_views(&self, room_id: RoomId) {
        self.forget(&keys::room_stats(room_id)).await;
        self.forget(&keys::online_users(room_id)).await;
        self.invalidate_history(room_id).await;
    }

    /// Invalidate presence-derived views for one member.
    pub async fn invalidate_presence(&self, room_id: RoomId, user_id: UserId) {
        self.forget(&keys::presence(room_id, user_id)).await;
        self.forget(&keys::online_users(room_id)).await;
        self.forget(&keys::room_stats(room_id)).await;
    }

    pub async fn invalidate_room_list(&self) {
        self.forget(&keys::room_list()).await;
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
