//! Outbound adapters implementing the domain ports.
//!
//! - **cache**: Redis (`bb8-redis`) and in-memory [`CacheStore`] adapters.
//! - **memory_store**: in-memory [`ChatStore`] with atomic batches.
//! - **broadcast**: `tokio` broadcast channels behind [`EventPublisher`].
//!
//! Adapters translate between domain types and infrastructure; they hold no
//! chat rules.
//!
//! [`CacheStore`]: crate::domain::ports::CacheStore
//! [`ChatStore`]: crate::domain::ports::ChatStore
//! [`EventPublisher`]: crate::domain::ports::EventPublisher

pub mod broadcast;
pub mod cache;
pub mod memory_store;

pub use self::broadcast::BroadcastPublisher;
pub use self::cache::{InMemoryCacheStore, RedisCacheStore};
pub use self::memory_store::InMemoryChatStore;
