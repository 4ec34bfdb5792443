//! Port for pushing notifications to connected clients.

use async_trait::async_trait;

use crate::domain::ChatEvent;

use super::define_port_error;

define_port_error! {
    /// Errors raised by publisher adapters.
    pub enum PublishError {
        /// The transport rejected or dropped the event.
        Transport { message: String } => "event publish failed: {message}",
    }
}

/// Fire-and-forget broadcast of chat events.
///
/// Delivery is best effort; callers log failures and carry on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `event` on `channel`.
    async fn publish(&self, channel: &str, event: &ChatEvent) -> Result<(), PublishError>;
}

/// Fixture publisher that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixtureEventPublisher;

#[async_trait]
impl EventPublisher for FixtureEventPublisher {
    async fn publish(&self, _channel: &str, _event: &ChatEvent) -> Result<(), PublishError> {
        Ok(())
    }
}
