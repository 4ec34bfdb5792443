//! Rooms and per-(room, user) memberships.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{Actor, RoomId, UserId};

/// Longest accepted room name, in characters.
pub const ROOM_NAME_MAX: usize = 50;

/// Longest accepted room description, in characters.
pub const ROOM_DESCRIPTION_MAX: usize = 500;

/// A named, independently moderated chat channel.
///
/// Rooms are never hard-deleted: deactivation keeps the message history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub description: Option<String>,
    pub created_by: UserId,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A room that has not been stored yet.
///
/// Storing it also creates the creator's membership, online as of
/// `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoom {
    pub name: String,
    pub description: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Validation errors for room attributes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomValidationError {
    #[error("room name must not be empty")]
    EmptyName,
    #[error("room name must be at most {max} characters")]
    NameTooLong { max: usize },
    #[error("room description must be at most {max} characters")]
    DescriptionTooLong { max: usize },
}

impl NewRoom {
    /// Validate and normalise room attributes.
    pub fn try_new(
        name: &str,
        description: Option<&str>,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Result<Self, RoomValidationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RoomValidationError::EmptyName);
        }
        if name.chars().count() > ROOM_NAME_MAX {
            return Err(RoomValidationError::NameTooLong { max: ROOM_NAME_MAX });
        }
        let description = description
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_owned);
        if description
            .as_deref()
            .is_some_and(|text| text.chars().count() > ROOM_DESCRIPTION_MAX)
        {
            return Err(RoomValidationError::DescriptionTooLong {
                max: ROOM_DESCRIPTION_MAX,
            });
        }
        Ok(Self {
            name: name.to_owned(),
            description,
            created_by,
            created_at,
        })
    }
}

/// Presence update applied to the stored membership row. Restriction
/// fields are never touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// Joined or sent a heartbeat; refused while banned.
    Online(DateTime<Utc>),
    /// Posted a message; refused while muted or banned.
    Posted(DateTime<Utc>),
    /// Left the room or was removed from it.
    Offline(DateTime<Utc>),
}

/// Restriction update applied to the stored membership row. Presence
/// fields are never touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictionChange {
    Mute {
        by: Actor,
        until: Option<DateTime<Utc>>,
    },
    Unmute,
    Ban {
        by: Actor,
        until: Option<DateTime<Utc>>,
    },
    Unban,
}

/// Why a presence change was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PresenceRefusal {
    #[error("member is banned")]
    Banned,
    #[error("member is muted")]
    Muted,
}

/// Presence and moderation state for one user in one room.
///
/// `muted_until`/`banned_until` of `None` while the matching flag is set
/// means the restriction is permanent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub online: bool,
    pub is_muted: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub muted_by: Option<Actor>,
    pub is_banned: bool,
    pub banned_until: Option<DateTime<Utc>>,
    pub banned_by: Option<Actor>,
}

impl Membership {
    /// A fresh, online membership.
    pub const fn joined(room_id: RoomId, user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            room_id,
            user_id,
            joined_at: now,
            last_seen: now,
            online: true,
            is_muted: false,
            muted_until: None,
            muted_by: None,
            is_banned: false,
            banned_until: None,
            banned_by: None,
        }
    }

    /// Whether a mute is in force at `now`.
    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        self.is_muted && self.muted_until.is_none_or(|until| now < until)
    }

    /// Whether a ban is in force at `now`.
    pub fn is_banned_at(&self, now: DateTime<Utc>) -> bool {
        self.is_banned && self.banned_until.is_none_or(|until| now < until)
    }

    /// Whether the member may post at `now`.
    pub fn can_send_messages(&self, now: DateTime<Utc>) -> bool {
        !self.is_muted_at(now) && !self.is_banned_at(now)
    }

    /// Whether the member counts as online: flagged online and seen within
    /// `timeout`.
    pub fn is_online_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.online && self.last_seen >= now - timeout
    }

    /// Refresh presence.
    pub fn mark_online(&mut self, now: DateTime<Utc>) {
        self.online = true;
        self.last_seen = now;
    }

    /// Drop presence.
    pub fn mark_offline(&mut self, now: DateTime<Utc>) {
        self.online = false;
        self.last_seen = now;
    }

    /// Apply a mute; `until` of `None` is permanent.
    pub fn mute(&mut self, by: Actor, until: Option<DateTime<Utc>>) {
        self.is_muted = true;
        self.muted_until = until;
        self.muted_by = Some(by);
    }

    /// Lift a mute.
    pub fn unmute(&mut self) {
        self.is_muted = false;
        self.muted_until = None;
        self.muted_by = None;
    }

    /// Apply a ban; `until` of `None` is permanent.
    pub fn ban(&mut self, by: Actor, until: Option<DateTime<Utc>>) {
        self.is_banned = true;
        self.banned_until = until;
        self.banned_by = Some(by);
    }

    /// Lift a ban.
    pub fn unban(&mut self) {
        self.is_banned = false;
        self.banned_until = None;
        self.banned_by = None;
    }

    /// Apply a presence change against the restrictions currently in force.
    pub fn apply_presence(&mut self, change: PresenceChange) -> Result<(), PresenceRefusal> {
        match change {
            PresenceChange::Online(at) => {
                if self.is_banned_at(at) {
                    return Err(PresenceRefusal::Banned);
                }
                self.mark_online(at);
            }
            PresenceChange::Posted(at) => {
                if self.is_banned_at(at) {
                    return Err(PresenceRefusal::Banned);
                }
                if self.is_muted_at(at) {
                    return Err(PresenceRefusal::Muted);
                }
                self.mark_online(at);
            }
            PresenceChange::Offline(at) => self.mark_offline(at),
        }
        Ok(())
    }

    pub fn apply_restriction(&mut self, change: RestrictionChange) {
        match change {
            RestrictionChange::Mute { by, until } => self.mute(by, until),
            RestrictionChange::Unmute => self.unmute(),
            RestrictionChange::Ban { by, until } => self.ban(by, until),
            RestrictionChange::Unban => self.unban(),
        }
    }
}

#[cfg(test)]
mod tests {
    //! Membership state semantics.

    use super::*;
    use chrono::TimeZone;
    use rstest::{fixture, rstest};

    #[fixture]
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[fixture]
    fn membership(now: DateTime<Utc>) -> Membership {
        Membership::joined(RoomId::new(1), UserId::new(2), now)
    }

    #[rstest]
    fn permanent_mute_blocks_sending(now: DateTime<Utc>, mut membership: Membership) {
        membership.mute(Actor::User(UserId::new(9)), None);
        assert!(!membership.can_send_messages(now));
        assert!(!membership.can_send_messages(now + Duration::days(3650)));
    }

    #[rstest]
    fn timed_mute_expires(now: DateTime<Utc>, mut membership: Membership) {
        let until = now + Duration::minutes(30);
        membership.mute(Actor::System, Some(until));
        assert!(!membership.can_send_messages(now));
        assert!(!membership.can_send_messages(until - Duration::seconds(1)));
        assert!(membership.can_send_messages(until));
    }

    #[rstest]
    fn ban_blocks_independently_of_mute(now: DateTime<Utc>, mut membership: Membership) {
        membership.ban(Actor::User(UserId::new(9)), Some(now + Duration::days(1)));
        assert!(!membership.is_muted_at(now));
        assert!(membership.is_banned_at(now));
        assert!(!membership.can_send_messages(now));
        membership.unban();
        assert!(membership.can_send_messages(now));
        assert!(membership.banned_by.is_none());
    }

    #[rstest]
    fn presence_changes_keep_restrictions(now: DateTime<Utc>, mut membership: Membership) {
        membership.apply_restriction(RestrictionChange::Mute {
            by: Actor::System,
            until: None,
        });
        membership
            .apply_presence(PresenceChange::Online(now + Duration::minutes(1)))
            .expect("muted members stay present");
        membership
            .apply_presence(PresenceChange::Offline(now + Duration::minutes(2)))
            .expect("leaving is never refused");

        assert!(membership.is_muted_at(now + Duration::minutes(3)));
        assert!(!membership.online);
        assert_eq!(membership.last_seen, now + Duration::minutes(2));
    }

    const PERMANENT_MUTE: RestrictionChange = RestrictionChange::Mute {
        by: Actor::System,
        until: None,
    };
    const PERMANENT_BAN: RestrictionChange = RestrictionChange::Ban {
        by: Actor::System,
        until: None,
    };

    #[rstest]
    #[case(PERMANENT_MUTE, PresenceChange::Posted, Some(PresenceRefusal::Muted))]
    #[case(PERMANENT_MUTE, PresenceChange::Online, None)]
    #[case(PERMANENT_BAN, PresenceChange::Online, Some(PresenceRefusal::Banned))]
    #[case(PERMANENT_BAN, PresenceChange::Posted, Some(PresenceRefusal::Banned))]
    fn restricted_members_are_refused_presence(
        now: DateTime<Utc>,
        mut membership: Membership,
        #[case] restriction: RestrictionChange,
        #[case] change: fn(DateTime<Utc>) -> PresenceChange,
        #[case] refusal: Option<PresenceRefusal>,
    ) {
        membership.apply_restriction(restriction);
        assert_eq!(membership.apply_presence(change(now)).err(), refusal);
    }

    #[rstest]
    fn expired_restrictions_allow_presence(now: DateTime<Utc>, mut membership: Membership) {
        membership.apply_restriction(RestrictionChange::Ban {
            by: Actor::System,
            until: Some(now + Duration::minutes(5)),
        });
        let later = now + Duration::minutes(5);
        assert_eq!(membership.apply_presence(PresenceChange::Posted(later)), Ok(()));
        assert!(membership.online);
    }

    #[rstest]
    fn presence_expires_after_timeout(now: DateTime<Utc>, membership: Membership) {
        let timeout = Duration::minutes(5);
        assert!(membership.is_online_at(now + Duration::minutes(4), timeout));
        assert!(!membership.is_online_at(now + Duration::minutes(6), timeout));
    }

    #[rstest]
    #[case("   ", RoomValidationError::EmptyName)]
    #[case(
        "abcdefghijklmnopqrstuvwxyzabcdefghijklmnopqrstuvwxy",
        RoomValidationError::NameTooLong { max: ROOM_NAME_MAX }
    )]
    fn room_names_are_validated(
        now: DateTime<Utc>,
        #[case] name: &str,
        #[case] expected: RoomValidationError,
    ) {
        let err = NewRoom::try_new(name, None, UserId::new(1), now).expect_err("invalid");
        assert_eq!(err, expected);
    }

    #[rstest]
    fn blank_descriptions_are_dropped(now: DateTime<Utc>) {
        let room = NewRoom::try_new("  lobby ", Some("  "), UserId::new(1), now).expect("valid");
        assert_eq!(room.name, "lobby");
        assert!(room.description.is_none());
    }
}
