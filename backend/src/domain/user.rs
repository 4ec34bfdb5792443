//! Chat participants as seen by the chat core.
//!
//! Accounts are owned by the authentication system; the chat core only reads
//! the identity, the display handle used for `@mentions`, and whether the
//! account carries an elevated (site moderator) role.

use serde::{Deserialize, Serialize};

use super::UserId;

/// User projection consumed by the chat core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Account identity.
    pub id: UserId,
    /// Unique handle used for mentions.
    pub username: String,
    /// Whether the account may moderate any room.
    pub elevated: bool,
}

impl User {
    /// Build a regular (non-elevated) user.
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            elevated: false,
        }
    }

    /// Grant the elevated role.
    #[must_use]
    pub fn elevated(mut self) -> Self {
        self.elevated = true;
        self
    }
}
