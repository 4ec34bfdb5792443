//! Notifications handed to the broadcast collaborator.
//!
//! Events stay transport agnostic: outbound adapters decide how to frame
//! them for connected clients.

use serde::{Deserialize, Serialize};

use super::{Actor, Message, MessageId, RoomId, User, UserId};

/// Channel name carrying a room's events.
pub fn room_channel(room_id: RoomId) -> String {
    format!("room.{room_id}")
}

/// Moderation state change broadcast to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationNotice {
    pub room_id: RoomId,
    pub target_id: UserId,
    pub actor: Actor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Events produced by the chat core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageSent {
        message: Message,
    },
    MessageDeleted {
        message_id: MessageId,
        room_id: RoomId,
        actor: Actor,
        reason: Option<String>,
    },
    UserJoined {
        user: User,
        room_id: RoomId,
    },
    UserLeft {
        user: User,
        room_id: RoomId,
    },
    UserMuted(ModerationNotice),
    UserUnmuted(ModerationNotice),
    UserBanned(ModerationNotice),
    UserUnbanned(ModerationNotice),
}

impl ChatEvent {
    /// Stable event label.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MessageSent { .. } => "message_sent",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::UserJoined { .. } => "user_joined",
            Self::UserLeft { .. } => "user_left",
            Self::UserMuted(_) => "user_muted",
            Self::UserUnmuted(_) => "user_unmuted",
            Self::UserBanned(_) => "user_banned",
            Self::UserUnbanned(_) => "user_unbanned",
        }
    }

    /// Room the event belongs to.
    pub fn room_id(&self) -> RoomId {
        match self {
            Self::MessageSent { message } => message.room_id,
            Self::MessageDeleted { room_id, .. }
            | Self::UserJoined { room_id, .. }
            | Self::UserLeft { room_id, .. } => *room_id,
            Self::UserMuted(notice)
            | Self::UserUnmuted(notice)
            | Self::UserBanned(notice)
            | Self::UserUnbanned(notice) => notice.room_id,
        }
    }
}
