//! Chat messages and their keyset ordering.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use pagination::Cursor;
use serde::{Deserialize, Serialize};

use super::{MessageId, RoomId, UserId};

/// Longest accepted message body, in characters.
pub const MESSAGE_BODY_MAX: usize = 1000;

/// Message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Authored by a participant; subject to content filtering.
    Text,
    /// Generated by the chat core (joins, leaves, timeouts).
    System,
}

/// A stored message. `created_at` and `id` never change once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub body: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Pagination key for this row.
    pub fn key(&self) -> MessageKey {
        MessageKey {
            id: self.id.get(),
            timestamp: self.created_at,
        }
    }

    /// Opaque cursor pointing at this row.
    pub fn cursor(&self) -> Option<String> {
        self.key().encode()
    }
}

/// A message awaiting storage; the store assigns `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub body: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    /// A system notice attributed to `user_id`.
    pub fn system(
        room_id: RoomId,
        user_id: UserId,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            room_id,
            user_id,
            body: body.into(),
            kind: MessageKind::System,
            created_at,
        }
    }
}

/// Total order over messages: `(timestamp, id)`, so rows sharing a
/// timestamp still sort deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
}

impl MessageKey {
    /// Encode as an opaque cursor token.
    pub fn encode(self) -> Option<String> {
        Cursor::new(self).encode().ok()
    }

    /// Decode a cursor token; malformed tokens yield `None`.
    pub fn decode(token: Option<&str>) -> Option<Self> {
        Cursor::<Self>::decode_lenient(token).map(Cursor::into_key)
    }
}

impl Ord for MessageKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for MessageKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    //! Cursor encoding and ordering of message keys.

    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, second)
            .single()
            .expect("valid timestamp")
    }

    #[rstest]
    #[case(1, 0)]
    #[case(9_007_199_254_740_993, 59)]
    fn cursor_round_trips(#[case] id: i64, #[case] second: u32) {
        let key = MessageKey {
            id,
            timestamp: at(second),
        };
        let token = key.encode().expect("encodes");
        assert_eq!(MessageKey::decode(Some(&token)), Some(key));
    }

    #[rstest]
    #[case(Some("garbage"))]
    #[case(Some(""))]
    #[case(None)]
    fn malformed_cursor_is_treated_as_absent(#[case] token: Option<&str>) {
        assert!(MessageKey::decode(token).is_none());
    }

    #[rstest]
    fn cursor_payload_uses_iso_timestamps() {
        let key = MessageKey {
            id: 5,
            timestamp: at(30),
        };
        let json = serde_json::to_value(key).expect("serialises");
        assert_eq!(json["id"], serde_json::json!(5));
        assert_eq!(json["timestamp"], serde_json::json!("2026-03-01T12:00:30Z"));
    }

    #[rstest]
    fn equal_timestamps_order_by_id() {
        let earlier = MessageKey {
            id: 3,
            timestamp: at(10),
        };
        let later = MessageKey {
            id: 4,
            timestamp: at(10),
        };
        assert!(earlier < later);
        assert!(
            MessageKey {
                id: 99,
                timestamp: at(9)
            } < earlier
        );
    }
}
