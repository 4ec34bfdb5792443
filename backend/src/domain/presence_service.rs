//! Presence tracking: join, heartbeat, leave, and the inactivity sweep.
//!
//! A membership is online while its flag is set and `last_seen` falls inside
//! the inactivity timeout. Every transition commits before the derived
//! online-user list, room statistics, and presence snapshots are
//! invalidated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::cache::keys;
use crate::domain::ports::{WriteBatch, WriteOp};
use crate::domain::service_support::{
    ChatPorts, ensure_not_banned, map_store_error, stored_membership,
};
use crate::domain::{
    ChatEvent, Error, Membership, Message, NewMessage, PresenceChange, Room, RoomId, UserId,
};

/// Entry of a room's online-user list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: UserId,
    pub username: String,
    pub last_seen: DateTime<Utc>,
    pub is_muted: bool,
}

/// Aggregate figures for a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub room_id: RoomId,
    pub message_count: u64,
    pub member_count: u64,
    pub online_count: u64,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// One member's presence and restriction state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    pub is_muted: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub is_banned: bool,
    pub banned_until: Option<DateTime<Utc>>,
}

/// Memberships flipped offline by a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub affected: Vec<(RoomId, UserId)>,
}

/// Presence state machine over room memberships.
#[derive(Clone)]
pub struct PresenceService {
    ports: ChatPorts,
}

impl PresenceService {
    /// Presence tracking over `ports`.
    #[must_use]
    pub fn new(ports: ChatPorts) -> Self {
        Self { ports }
    }

    /// Enter a room, creating the membership on first visit.
    pub async fn join(&self, room_id: RoomId, user_id: UserId) -> Result<Membership, Error> {
        let room = self.ports.require_active_room(room_id).await?;
        let user = self.ports.require_user(user_id).await?;
        let now = self.ports.now();
        if let Some(existing) = self.ports.find_membership(room.id, user.id).await? {
            ensure_not_banned(&existing, now)?;
        }

        let notice = NewMessage::system(
            room.id,
            user.id,
            format!("{} joined the room", user.username),
            now,
        );
        let mut receipt = self
            .ports
            .commit_presence(
                WriteBatch::new()
                    .with(WriteOp::UpdatePresence {
                        room_id: room.id,
                        user_id: user.id,
                        change: PresenceChange::Online(now),
                    })
                    .with(WriteOp::InsertMessage(notice)),
                room.id,
                user.id,
                ensure_not_banned,
            )
            .await?;
        let membership = stored_membership(&mut receipt)?;

        self.invalidate_member(room.id, user.id).await;
        info!(room_id = %room.id, user_id = %user.id, "user joined room");
        self.ports
            .broadcast(ChatEvent::UserJoined {
                user,
                room_id: room.id,
            })
            .await;
        self.announce(receipt.messages).await;
        Ok(membership)
    }

    /// Refresh the inactivity timer of an existing member.
    pub async fn heartbeat(&self, room_id: RoomId, user_id: UserId) -> Result<Membership, Error> {
        let room = self.ports.require_active_room(room_id).await?;
        let current = self.ports.require_membership(room.id, user_id).await?;
        let now = self.ports.now();
        ensure_not_banned(&current, now)?;

        let was_online = current.is_online_at(now, self.ports.config.presence.inactivity_timeout);
        let mut receipt = self
            .ports
            .commit_presence(
                WriteBatch::new().with(WriteOp::UpdatePresence {
                    room_id: room.id,
                    user_id,
                    change: PresenceChange::Online(now),
                }),
                room.id,
                user_id,
                ensure_not_banned,
            )
            .await?;
        let membership = stored_membership(&mut receipt)?;

        if was_online {
            self.ports
                .cache
                .forget(&keys::presence(room.id, user_id))
                .await;
        } else {
            self.ports.cache.invalidate_presence(room.id, user_id).await;
        }
        Ok(membership)
    }

    /// Leave a room; the membership and its restrictions are kept.
    pub async fn leave(&self, room_id: RoomId, user_id: UserId) -> Result<Membership, Error> {
        let room = self.require_room(room_id).await?;
        let user = self.ports.require_user(user_id).await?;
        self.ports.require_membership(room.id, user.id).await?;
        let now = self.ports.now();

        let notice = NewMessage::system(
            room.id,
            user.id,
            format!("{} left the room", user.username),
            now,
        );
        let mut receipt = self
            .ports
            .commit(
                WriteBatch::new()
                    .with(WriteOp::UpdatePresence {
                        room_id: room.id,
                        user_id: user.id,
                        change: PresenceChange::Offline(now),
                    })
                    .with(WriteOp::InsertMessage(notice)),
            )
            .await?;
        let membership = stored_membership(&mut receipt)?;

        self.invalidate_member(room.id, user.id).await;
        info!(room_id = %room.id, user_id = %user.id, "user left room");
        self.ports
            .broadcast(ChatEvent::UserLeft {
                user,
                room_id: room.id,
            })
            .await;
        self.announce(receipt.messages).await;
        Ok(membership)
    }

    /// Flip every online membership idle past the timeout to offline.
    ///
    /// Safe to run repeatedly and alongside heartbeats: the store re-checks
    /// idleness when it applies each expiry, so a member refreshed after the
    /// scan stays online and gets no notice.
    pub async fn sweep(&self) -> Result<SweepReport, Error> {
        let now = self.ports.now();
        let cutoff = now - self.ports.config.presence.inactivity_timeout;
        let stale = self
            .ports
            .store
            .list_stale_memberships(cutoff)
            .await
            .map_err(map_store_error)?;
        if stale.is_empty() {
            return Ok(SweepReport::default());
        }

        let mut batch = WriteBatch::new();
        let mut users = Vec::with_capacity(stale.len());
        for membership in stale {
            let Some(user) = self
                .ports
                .store
                .find_user(membership.user_id)
                .await
                .map_err(map_store_error)?
            else {
                warn!(user_id = %membership.user_id, "skipping sweep of unknown user");
                continue;
            };
            batch.push(WriteOp::ExpirePresence {
                room_id: membership.room_id,
                user_id: user.id,
                seen_before: cutoff,
                notice: NewMessage::system(
                    membership.room_id,
                    user.id,
                    format!("{} went offline", user.username),
                    now,
                ),
            });
            users.push(user);
        }
        if batch.is_empty() {
            return Ok(SweepReport::default());
        }
        let receipt = self.ports.commit(batch).await?;

        let mut report = SweepReport::default();
        for expired in receipt.memberships {
            self.invalidate_member(expired.room_id, expired.user_id).await;
            report.affected.push((expired.room_id, expired.user_id));
            if let Some(user) = users.iter().find(|user| user.id == expired.user_id) {
                self.ports
                    .broadcast(ChatEvent::UserLeft {
                        user: user.clone(),
                        room_id: expired.room_id,
                    })
                    .await;
            }
        }
        self.announce(receipt.messages).await;
        info!(swept = report.affected.len(), "presence sweep complete");
        Ok(report)
    }

    /// Members currently online, by username.
    pub async fn online_users(&self, room_id: RoomId) -> Result<Vec<OnlineUser>, Error> {
        let room = self.require_room(room_id).await?;
        let ttl = self.ports.cache.ttls().online_users;
        self.ports
            .cache
            .remember(&keys::online_users(room.id), ttl, || async {
                let now = self.ports.now();
                let timeout = self.ports.config.presence.inactivity_timeout;
                let members = self
                    .ports
                    .store
                    .list_memberships(room.id)
                    .await
                    .map_err(map_store_error)?;
                let mut online = Vec::new();
                for membership in members.iter().filter(|m| m.is_online_at(now, timeout)) {
                    if let Some(user) = self
                        .ports
                        .store
                        .find_user(membership.user_id)
                        .await
                        .map_err(map_store_error)?
                    {
                        online.push(OnlineUser {
                            user_id: user.id,
                            username: user.username,
                            last_seen: membership.last_seen,
                            is_muted: membership.is_muted_at(now),
                        });
                    }
                }
                online.sort_by(|a, b| a.username.cmp(&b.username));
                Ok(online)
            })
            .await
    }

    /// Message and membership counts for a room.
    pub async fn room_stats(&self, room_id: RoomId) -> Result<RoomStats, Error> {
        let room = self.require_room(room_id).await?;
        let ttl = self.ports.cache.ttls().room_stats;
        self.ports
            .cache
            .remember(&keys::room_stats(room.id), ttl, || async {
                let now = self.ports.now();
                let timeout = self.ports.config.presence.inactivity_timeout;
                let messages = self
                    .ports
                    .store
                    .message_stats(room.id)
                    .await
                    .map_err(map_store_error)?;
                let members = self
                    .ports
                    .store
                    .list_memberships(room.id)
                    .await
                    .map_err(map_store_error)?;
                let online = members
                    .iter()
                    .filter(|m| m.is_online_at(now, timeout))
                    .count();
                Ok(RoomStats {
                    room_id: room.id,
                    message_count: messages.count,
                    member_count: members.len() as u64,
                    online_count: online as u64,
                    last_message_at: messages.last_message_at,
                })
            })
            .await
    }

    /// Presence and restriction state of one member.
    pub async fn presence(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<PresenceSnapshot, Error> {
        let ttl = self.ports.cache.ttls().presence;
        self.ports
            .cache
            .remember(&keys::presence(room_id, user_id), ttl, || async {
                let now = self.ports.now();
                let membership = self
                    .ports
                    .find_membership(room_id, user_id)
                    .await?
                    .ok_or_else(|| Error::not_found("membership not found"))?;
                Ok(PresenceSnapshot {
                    room_id,
                    user_id,
                    online: membership
                        .is_online_at(now, self.ports.config.presence.inactivity_timeout),
                    last_seen: membership.last_seen,
                    is_muted: membership.is_muted_at(now),
                    muted_until: membership.muted_until,
                    is_banned: membership.is_banned_at(now),
                    banned_until: membership.banned_until,
                })
            })
            .await
    }

    async fn require_room(&self, room_id: RoomId) -> Result<Room, Error> {
        self.ports
            .store
            .find_room(room_id)
            .await
            .map_err(map_store_error)?
            .ok_or_else(|| Error::not_found("room not found"))
    }

    async fn invalidate_member(&self, room_id: RoomId, user_id: UserId) {
        self.ports.cache.forget(&keys::presence(room_id, user_id)).await;
        self.ports.cache.invalidate_room_views(room_id).await;
    }

    async fn announce(&self, messages: Vec<Message>) {
        for message in messages {
            self.ports
                .broadcast(ChatEvent::MessageSent { message })
                .await;
        }
    }
}

#[cfg(test)]
#[path = "presence_service_tests.rs"]
mod tests;
