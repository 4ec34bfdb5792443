//! Collaborators and guards shared by the chat services.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use serde_json::json;
use tracing::warn;

use crate::domain::ports::{ChatStore, ChatStoreError, CommitReceipt, EventPublisher, WriteBatch};
use crate::domain::{
    CacheLayer, ChatConfig, ChatEvent, Error, Membership, Room, RoomId, User, UserId,
    room_channel,
};

/// Ports every service is constructed with.
#[derive(Clone)]
pub struct ChatPorts {
    pub store: Arc<dyn ChatStore>,
    pub cache: CacheLayer,
    pub publisher: Arc<dyn EventPublisher>,
    pub clock: Arc<dyn Clock>,
    pub config: ChatConfig,
}

impl ChatPorts {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.utc()
    }

    /// Apply a batch atomically.
    pub async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt, Error> {
        self.store.commit(batch).await.map_err(map_store_error)
    }

    /// Apply a batch carrying a presence change for `user_id`.
    ///
    /// A restriction committed after the caller's checks makes the store
    /// refuse the change; `guard` then reports it from the fresh row.
    pub async fn commit_presence(
        &self,
        batch: WriteBatch,
        room_id: RoomId,
        user_id: UserId,
        guard: fn(&Membership, DateTime<Utc>) -> Result<(), Error>,
    ) -> Result<CommitReceipt, Error> {
        match self.store.commit(batch).await {
            Ok(receipt) => Ok(receipt),
            Err(err @ ChatStoreError::Conflict { .. }) => {
                if let Some(current) = self.find_membership(room_id, user_id).await? {
                    guard(&current, self.now())?;
                }
                Err(map_store_error(err))
            }
            Err(err) => Err(map_store_error(err)),
        }
    }

    /// Hand an event to the broadcast collaborator. Delivery is best-effort:
    /// a failure is logged and never undoes the committed write.
    pub async fn broadcast(&self, event: ChatEvent) {
        let channel = room_channel(event.room_id());
        if let Err(err) = self.publisher.publish(&channel, &event).await {
            warn!(channel, event = event.name(), error = %err, "event broadcast failed");
        }
    }

    /// Room that exists and accepts activity.
    pub async fn require_active_room(&self, room_id: RoomId) -> Result<Room, Error> {
        match self.store.find_room(room_id).await.map_err(map_store_error)? {
            Some(room) if room.active => Ok(room),
            Some(_) => Err(Error::conflict("room is no longer active")),
            None => Err(Error::not_found("room not found")),
        }
    }

    pub async fn require_user(&self, user_id: UserId) -> Result<User, Error> {
        self.store
            .find_user(user_id)
            .await
            .map_err(map_store_error)?
            .ok_or_else(|| Error::not_found("user not found"))
    }

    pub async fn find_membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Membership>, Error> {
        self.store
            .find_membership(room_id, user_id)
            .await
            .map_err(map_store_error)
    }

    /// Membership the caller must hold to act in the room.
    pub async fn require_membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Membership, Error> {
        self.find_membership(room_id, user_id)
            .await?
            .ok_or_else(|| Error::forbidden("you are not a member of this room"))
    }

    /// Room creator or an elevated account.
    pub async fn can_moderate(&self, room: &Room, actor_id: UserId) -> Result<bool, Error> {
        if room.created_by == actor_id {
            return Ok(true);
        }
        Ok(self
            .store
            .find_user(actor_id)
            .await
            .map_err(map_store_error)?
            .is_some_and(|user| user.elevated))
    }

    pub async fn require_moderator(&self, room: &Room, actor_id: UserId) -> Result<(), Error> {
        if self.can_moderate(room, actor_id).await? {
            Ok(())
        } else {
            Err(Error::forbidden(
                "you do not have permission to moderate this room",
            ))
        }
    }
}

/// Refuse a member banned at `now`.
pub fn ensure_not_banned(membership: &Membership, now: DateTime<Utc>) -> Result<(), Error> {
    if membership.is_banned_at(now) {
        return Err(Error::forbidden("you are banned from this room").with_details(
            json!({ "reason": "banned", "bannedUntil": membership.banned_until }),
        ));
    }
    Ok(())
}

/// Refuse a member who may not post at `now`.
pub fn ensure_can_post(membership: &Membership, now: DateTime<Utc>) -> Result<(), Error> {
    if membership.can_send_messages(now) {
        return Ok(());
    }
    ensure_not_banned(membership, now)?;
    Err(Error::forbidden("you are muted in this room").with_details(
        json!({ "reason": "muted", "mutedUntil": membership.muted_until }),
    ))
}

/// Membership row left by the last presence or restriction change of a batch.
pub fn stored_membership(receipt: &mut CommitReceipt) -> Result<Membership, Error> {
    receipt
        .memberships
        .pop()
        .ok_or_else(|| Error::internal("membership change returned no row"))
}

/// Translate store failures into domain errors.
pub fn map_store_error(error: ChatStoreError) -> Error {
    match error {
        ChatStoreError::Connection { message } => {
            Error::service_unavailable(format!("chat store unavailable: {message}"))
        }
        ChatStoreError::Query { message } => {
            Error::internal(format!("chat store error: {message}"))
        }
        ChatStoreError::Constraint { message } => {
            Error::internal(format!("chat store rejected the write: {message}"))
        }
        ChatStoreError::Conflict { message } => {
            Error::conflict(format!("the write lost a race with another change: {message}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::domain::ErrorCode;

    #[rstest]
    #[case(ChatStoreError::connection("refused"), ErrorCode::ServiceUnavailable)]
    #[case(ChatStoreError::query("syntax"), ErrorCode::InternalError)]
    #[case(ChatStoreError::constraint("fk"), ErrorCode::InternalError)]
    #[case(ChatStoreError::conflict("report exists"), ErrorCode::Conflict)]
    fn store_errors_map_to_codes(#[case] error: ChatStoreError, #[case] code: ErrorCode) {
        assert_eq!(map_store_error(error).code(), code);
    }
}
