//! Identifier newtypes and the acting principal.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw store identifier.
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// The raw store identifier.
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

define_id! {
    /// Identity of a chat room.
    RoomId
}

define_id! {
    /// Identity of a user account managed outside this crate.
    UserId
}

define_id! {
    /// Monotonically increasing message identity.
    MessageId
}

define_id! {
    /// Identity of an abuse report.
    ReportId
}

define_id! {
    /// Identity of an audit log entry.
    ModerationActionId
}

/// Principal performing an action.
///
/// `System` is a sentinel for automated moderation. No user id maps to it,
/// so it cannot be impersonated or reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    /// A human user.
    User(UserId),
    /// Automated moderation.
    System,
}

impl Actor {
    /// The user behind this actor, if any.
    pub const fn user_id(self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(id),
            Self::System => None,
        }
    }

    /// Whether this is the automated system actor.
    pub const fn is_system(self) -> bool {
        matches!(self, Self::System)
    }
}

impl From<UserId> for Actor {
    fn from(id: UserId) -> Self {
        Self::User(id)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::System => f.write_str("system"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn system_actor_serialises_without_an_id() {
        let value = serde_json::to_value(Actor::System).expect("serialises");
        assert_eq!(value, json!({ "kind": "system" }));
    }

    #[rstest]
    fn user_actor_carries_its_id() {
        let value = serde_json::to_value(Actor::User(UserId::new(7))).expect("serialises");
        assert_eq!(value, json!({ "kind": "user", "id": 7 }));
        assert_eq!(Actor::User(UserId::new(7)).user_id(), Some(UserId::new(7)));
    }

    #[rstest]
    fn system_actor_has_no_user() {
        assert!(Actor::System.user_id().is_none());
        assert!(Actor::System.is_system());
    }
}
