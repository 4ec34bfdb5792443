//! Domain ports and supporting types for the hexagonal boundary.
//!
//! - [`ChatStore`]: durable rooms, memberships, messages, reports, and the
//!   audit log, written through atomic [`WriteBatch`]es.
//! - [`CacheStore`]: shared key-value cache for derived views and counters.
//! - [`EventPublisher`]: fire-and-forget notification transport.
//!
//! Time is injected through [`mockable::Clock`].

mod macros;
pub(crate) use macros::define_port_error;

mod cache_key;
mod cache_store;
mod chat_store;
mod event_publisher;

pub use cache_key::{CacheKey, CacheKeyValidationError};
#[cfg(test)]
pub use cache_store::MockCacheStore;
pub use cache_store::{CacheStore, CacheStoreError, FixtureCacheStore, PrefixDeletion};
#[cfg(test)]
pub use chat_store::MockChatStore;
pub use chat_store::{
    ChatStore, ChatStoreError, CommitReceipt, MessageQuery, MessageStats, WriteBatch, WriteOp,
};
#[cfg(test)]
pub use event_publisher::MockEventPublisher;
pub use event_publisher::{EventPublisher, FixtureEventPublisher, PublishError};
