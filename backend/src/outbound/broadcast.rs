//! In-process fan-out of chat events over `tokio` broadcast channels.
//!
//! Each channel name gets its own bounded channel, created on first
//! subscription. Events published to a channel nobody listens on are
//! dropped, and slow subscribers lose the oldest events first.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::ChatEvent;
use crate::domain::ports::{EventPublisher, PublishError};

/// Events buffered per channel before lagging subscribers skip ahead.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// [`EventPublisher`] backed by per-channel `tokio::sync::broadcast`.
pub struct BroadcastPublisher {
    channels: Mutex<HashMap<String, broadcast::Sender<ChatEvent>>>,
    capacity: usize,
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Receive every event published on `channel` from now on.
    pub fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<ChatEvent>, PublishError> {
        let mut channels = self.lock()?;
        let sender = channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(sender.subscribe())
    }

    fn lock(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<String, broadcast::Sender<ChatEvent>>>, PublishError> {
        self.channels
            .lock()
            .map_err(|_| PublishError::transport("channel registry lock poisoned"))
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, channel: &str, event: &ChatEvent) -> Result<(), PublishError> {
        let mut channels = self.lock()?;
        let Some(sender) = channels.get(channel) else {
            debug!(channel, event = event.name(), "no subscribers; event dropped");
            return Ok(());
        };
        if sender.send(event.clone()).is_err() {
            channels.remove(channel);
            debug!(channel, "last subscriber left; channel closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::domain::{Actor, RoomId, UserId, room_channel};

    fn deleted(room: i64) -> ChatEvent {
        ChatEvent::MessageDeleted {
            message_id: crate::domain::MessageId::new(9),
            room_id: RoomId::new(room),
            actor: Actor::System,
            reason: None,
        }
    }

    #[rstest]
    #[tokio::test]
    async fn subscribers_receive_events_for_their_room_only() {
        let publisher = BroadcastPublisher::default();
        let mut lobby = publisher
            .subscribe(&room_channel(RoomId::new(1)))
            .expect("subscribe");

        publisher
            .publish(&room_channel(RoomId::new(2)), &deleted(2))
            .await
            .expect("publish");
        publisher
            .publish(&room_channel(RoomId::new(1)), &deleted(1))
            .await
            .expect("publish");

        let received = lobby.recv().await.expect("event");
        assert_eq!(received.room_id(), RoomId::new(1));
        assert!(lobby.try_recv().is_err());
    }

    #[rstest]
    #[tokio::test]
    async fn publishing_without_subscribers_succeeds() {
        let publisher = BroadcastPublisher::new(4);
        let event = ChatEvent::UserLeft {
            user: crate::domain::User::new(UserId::new(3), "carol"),
            room_id: RoomId::new(1),
        };

        publisher
            .publish("room.1", &event)
            .await
            .expect("dropped silently");
    }
}
