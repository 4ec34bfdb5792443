//! Moderation engine: mutes, bans, deletions, reports, and auto-moderation.
//!
//! Every state change and its audit record commit in one unit of work.
//! Where a deletion is involved, the audit record and any report updates
//! precede the delete inside the batch so they still see the message.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::domain::ports::{ChatStoreError, WriteBatch, WriteOp};
use crate::domain::service_support::{ChatPorts, map_store_error, stored_membership};
use crate::domain::{
    Actor, ChatEvent, Error, HistoryPage, Membership, Message, MessageId, ModerationAction,
    ModerationActionFilter, ModerationActionKind, ModerationNotice, NewModerationAction,
    NewReport, PageRequest, PresenceChange, Report, ReportFilter, ReportId, ReportKind,
    ReportStatus, RestrictionChange, ReviewDecision, Room, RoomId, UserId,
};

/// Reviewer note attached to reports resolved by auto-moderation.
pub const AUTO_RESOLVE_NOTE: &str =
    "Automatically resolved: message removed after reaching report threshold";

/// Longest accepted report reason, in characters.
pub const REPORT_REASON_MAX: usize = 500;

/// Result of filing a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome {
    pub report: Report,
    /// Whether the report pushed the message over the threshold and it was
    /// removed.
    pub auto_moderated: bool,
}

/// Moderator input for a report review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub decision: ReviewDecision,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub delete_message: bool,
    #[serde(default)]
    pub mute_user: bool,
    #[serde(default)]
    pub mute_duration_minutes: Option<u32>,
}

impl ReviewRequest {
    pub fn new(decision: ReviewDecision) -> Self {
        Self {
            decision,
            notes: None,
            delete_message: false,
            mute_user: false,
            mute_duration_minutes: None,
        }
    }
}

/// Result of a review, recording which cascades actually ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub report: Report,
    pub message_deleted: bool,
    pub user_muted: bool,
}

/// Which restriction an action concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Restriction {
    Mute,
    Ban,
}

/// Moderation operations scoped to a room.
#[derive(Clone)]
pub struct ModerationService {
    ports: ChatPorts,
}

impl ModerationService {
    /// Moderation over `ports`; limits come from `ports.config.moderation`.
    #[must_use]
    pub fn new(ports: ChatPorts) -> Self {
        Self { ports }
    }

    /// Mute `target_id`; `duration_minutes` of `None` is permanent.
    pub async fn mute_user(
        &self,
        room_id: RoomId,
        actor_id: UserId,
        target_id: UserId,
        duration_minutes: Option<u32>,
        reason: Option<String>,
    ) -> Result<Membership, Error> {
        self.restrict(
            Restriction::Mute,
            room_id,
            actor_id,
            target_id,
            duration_minutes,
            reason,
        )
        .await
    }

    /// Ban `target_id`, taking them offline; `None` is permanent.
    pub async fn ban_user(
        &self,
        room_id: RoomId,
        actor_id: UserId,
        target_id: UserId,
        duration_minutes: Option<u32>,
        reason: Option<String>,
    ) -> Result<Membership, Error> {
        self.restrict(
            Restriction::Ban,
            room_id,
            actor_id,
            target_id,
            duration_minutes,
            reason,
        )
        .await
    }

    /// Lift a mute. Fails with `not_muted` when none is in force.
    pub async fn unmute_user(
        &self,
        room_id: RoomId,
        actor_id: UserId,
        target_id: UserId,
        reason: Option<String>,
    ) -> Result<Membership, Error> {
        self.lift(Restriction::Mute, room_id, actor_id, target_id, reason)
            .await
    }

    /// Lift a ban. Fails with `not_banned` when none is in force.
    pub async fn unban_user(
        &self,
        room_id: RoomId,
        actor_id: UserId,
        target_id: UserId,
        reason: Option<String>,
    ) -> Result<Membership, Error> {
        self.lift(Restriction::Ban, room_id, actor_id, target_id, reason)
            .await
    }

    async fn restrict(
        &self,
        restriction: Restriction,
        room_id: RoomId,
        actor_id: UserId,
        target_id: UserId,
        duration_minutes: Option<u32>,
        reason: Option<String>,
    ) -> Result<Membership, Error> {
        let room = self.ports.require_active_room(room_id).await?;
        self.authorize_target(&room, actor_id, target_id).await?;
        let now = self.ports.now();
        let ceiling = match restriction {
            Restriction::Mute => self.ports.config.moderation.max_mute_minutes,
            Restriction::Ban => self.ports.config.moderation.max_ban_minutes,
        };
        let until = expiry(now, duration_minutes, ceiling)?;
        let actor = Actor::User(actor_id);

        let mut batch = WriteBatch::new();
        let kind = match restriction {
            Restriction::Mute => {
                batch.push(WriteOp::UpdateRestriction {
                    room_id: room.id,
                    user_id: target_id,
                    change: RestrictionChange::Mute { by: actor, until },
                });
                ModerationActionKind::Mute
            }
            Restriction::Ban => {
                batch.push(WriteOp::UpdateRestriction {
                    room_id: room.id,
                    user_id: target_id,
                    change: RestrictionChange::Ban { by: actor, until },
                });
                batch.push(WriteOp::UpdatePresence {
                    room_id: room.id,
                    user_id: target_id,
                    change: PresenceChange::Offline(now),
                });
                ModerationActionKind::Ban
            }
        };
        let audit = NewModerationAction {
            room_id: room.id,
            moderator: actor,
            target_user_id: target_id,
            target_message_id: None,
            kind,
            reason: reason.clone(),
            metadata: json!({ "duration_minutes": duration_minutes, "until": until }),
            created_at: now,
        };
        let mut receipt = self
            .ports
            .commit(batch.with(WriteOp::RecordAction(audit)))
            .await?;
        let membership = stored_membership(&mut receipt)?;

        self.ports.cache.invalidate_presence(room.id, target_id).await;
        info!(
            room_id = %room.id,
            actor_id = %actor_id,
            target_id = %target_id,
            action = ?kind,
            duration_minutes,
            "moderation restriction applied"
        );
        let notice = ModerationNotice {
            room_id: room.id,
            target_id,
            actor,
            duration_minutes,
            reason,
        };
        self.ports
            .broadcast(match restriction {
                Restriction::Mute => ChatEvent::UserMuted(notice),
                Restriction::Ban => ChatEvent::UserBanned(notice),
            })
            .await;
        Ok(membership)
    }

    async fn lift(
        &self,
        restriction: Restriction,
        room_id: RoomId,
        actor_id: UserId,
        target_id: UserId,
        reason: Option<String>,
    ) -> Result<Membership, Error> {
        let room = self.ports.require_active_room(room_id).await?;
        let membership = self.authorize_target(&room, actor_id, target_id).await?;
        let now = self.ports.now();

        let (kind, change) = match restriction {
            Restriction::Mute => {
                if !membership.is_muted_at(now) {
                    return Err(Error::policy_violation("user is not muted")
                        .with_details(json!({ "reason": "not_muted" })));
                }
                (ModerationActionKind::Unmute, RestrictionChange::Unmute)
            }
            Restriction::Ban => {
                if !membership.is_banned_at(now) {
                    return Err(Error::policy_violation("user is not banned")
                        .with_details(json!({ "reason": "not_banned" })));
                }
                (ModerationActionKind::Unban, RestrictionChange::Unban)
            }
        };
        let actor = Actor::User(actor_id);
        let audit = NewModerationAction {
            room_id: room.id,
            moderator: actor,
            target_user_id: target_id,
            target_message_id: None,
            kind,
            reason: reason.clone(),
            metadata: json!({}),
            created_at: now,
        };
        let mut receipt = self
            .ports
            .commit(
                WriteBatch::new()
                    .with(WriteOp::UpdateRestriction {
                        room_id: room.id,
                        user_id: target_id,
                        change,
                    })
                    .with(WriteOp::RecordAction(audit)),
            )
            .await?;
        let membership = stored_membership(&mut receipt)?;

        self.ports.cache.invalidate_presence(room.id, target_id).await;
        let notice = ModerationNotice {
            room_id: room.id,
            target_id,
            actor,
            duration_minutes: None,
            reason,
        };
        self.ports
            .broadcast(match restriction {
                Restriction::Mute => ChatEvent::UserUnmuted(notice),
                Restriction::Ban => ChatEvent::UserUnbanned(notice),
            })
            .await;
        Ok(membership)
    }

    /// Capability, self-action, and target membership checks, in that order.
    async fn authorize_target(
        &self,
        room: &Room,
        actor_id: UserId,
        target_id: UserId,
    ) -> Result<Membership, Error> {
        self.ports.require_moderator(room, actor_id).await?;
        if actor_id == target_id {
            return Err(Error::forbidden("you cannot moderate yourself")
                .with_details(json!({ "reason": "self_moderation" })));
        }
        self.ports
            .find_membership(room.id, target_id)
            .await?
            .ok_or_else(|| Error::not_found("user is not a member of this room"))
    }

    /// Delete a message as its author or a moderator. The audit record keeps
    /// the original content.
    pub async fn delete_message(
        &self,
        room_id: RoomId,
        actor_id: UserId,
        message_id: MessageId,
        reason: Option<String>,
    ) -> Result<(), Error> {
        let room = self.require_room(room_id).await?;
        let message = self.require_message_in(room.id, message_id).await?;
        let own_message = message.user_id == actor_id;
        if !own_message && !self.ports.can_moderate(&room, actor_id).await? {
            return Err(Error::forbidden(
                "you can only delete your own messages",
            ));
        }

        let actor = Actor::User(actor_id);
        let audit = deletion_audit(
            &message,
            actor,
            reason.clone(),
            json!({ "own_message": own_message }),
            self.ports.now(),
        );
        self.ports
            .commit(
                WriteBatch::new()
                    .with(WriteOp::RecordAction(audit))
                    .with(WriteOp::DeleteMessage(message.id)),
            )
            .await?;

        self.ports.cache.invalidate_room_views(room.id).await;
        info!(room_id = %room.id, message_id = %message.id, actor = %actor, "message deleted");
        self.ports
            .broadcast(ChatEvent::MessageDeleted {
                message_id: message.id,
                room_id: room.id,
                actor,
                reason,
            })
            .await;
        Ok(())
    }

    /// File a report against a message, then check the auto-moderation
    /// threshold.
    pub async fn report(
        &self,
        message_id: MessageId,
        reporter_id: UserId,
        kind: ReportKind,
        reason: Option<String>,
    ) -> Result<ReportOutcome, Error> {
        let reason = reason
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty());
        if reason
            .as_deref()
            .is_some_and(|text| text.chars().count() > REPORT_REASON_MAX)
        {
            return Err(Error::invalid_request(format!(
                "report reason must be at most {REPORT_REASON_MAX} characters"
            )));
        }
        let message = self
            .find_message(message_id)
            .await?
            .ok_or_else(|| Error::not_found("message not found"))?;
        if message.user_id == reporter_id {
            return Err(Error::forbidden("you cannot report your own message"));
        }
        self.ports
            .require_membership(message.room_id, reporter_id)
            .await?;
        let duplicate = self
            .ports
            .store
            .has_pending_report(message.id, reporter_id)
            .await
            .map_err(map_store_error)?;
        if duplicate {
            return Err(Error::conflict("you have already reported this message"));
        }

        let receipt = self
            .ports
            .commit(WriteBatch::new().with(WriteOp::InsertReport(NewReport {
                message_id: message.id,
                reporter_id,
                room_id: message.room_id,
                kind,
                reason,
                created_at: self.ports.now(),
            })))
            .await?;
        let report = receipt
            .reports
            .into_iter()
            .next()
            .ok_or_else(|| Error::internal("report insert returned no row"))?;
        info!(report_id = %report.id, message_id = %message.id, "message reported");

        let auto_moderated = self.check_auto_moderation(message.id).await?;
        Ok(ReportOutcome {
            report,
            auto_moderated,
        })
    }

    /// Remove a message once its pending reports reach the threshold.
    ///
    /// One unit of work records a system audit entry with the content,
    /// resolves the pending reports, and deletes the message, in that order.
    /// A message that another writer removed first yields `Ok(false)`.
    pub async fn check_auto_moderation(&self, message_id: MessageId) -> Result<bool, Error> {
        let Some(message) = self.find_message(message_id).await? else {
            return Ok(false);
        };
        let pending = self
            .ports
            .store
            .list_pending_reports(message.id)
            .await
            .map_err(map_store_error)?;
        let threshold = self.ports.config.moderation.report_threshold;
        if pending.len() < threshold {
            return Ok(false);
        }

        let now = self.ports.now();
        let report_ids: Vec<ReportId> = pending.iter().map(|report| report.id).collect();
        let reason = format!("Automatically removed after {} reports", pending.len());
        let audit = deletion_audit(
            &message,
            Actor::System,
            Some(reason.clone()),
            json!({
                "auto_action": true,
                "report_count": pending.len(),
                "report_ids": report_ids,
            }),
            now,
        );
        let batch = WriteBatch::new()
            .with(WriteOp::RecordAction(audit))
            .with(WriteOp::ResolvePendingReports {
                message_id: message.id,
                reviewer: Actor::System,
                notes: AUTO_RESOLVE_NOTE.to_owned(),
                reviewed_at: now,
            })
            .with(WriteOp::DeleteMessage(message.id));
        match self.ports.store.commit(batch).await {
            Ok(_) => {}
            Err(err @ ChatStoreError::Conflict { .. }) => {
                if self.find_message(message.id).await?.is_some() {
                    return Err(map_store_error(err));
                }
                debug!(message_id = %message.id, "message already removed");
                return Ok(false);
            }
            Err(err) => return Err(map_store_error(err)),
        }

        self.ports.cache.invalidate_room_views(message.room_id).await;
        info!(
            message_id = %message.id,
            reports = pending.len(),
            "message removed by auto-moderation"
        );
        self.ports
            .broadcast(ChatEvent::MessageDeleted {
                message_id: message.id,
                room_id: message.room_id,
                actor: Actor::System,
                reason: Some(reason),
            })
            .await;
        Ok(true)
    }

    /// Review a pending report, optionally deleting the message and muting
    /// its author in the same unit of work.
    pub async fn review_report(
        &self,
        report_id: ReportId,
        reviewer_id: UserId,
        request: ReviewRequest,
    ) -> Result<ReviewOutcome, Error> {
        let mut report = self
            .ports
            .store
            .find_report(report_id)
            .await
            .map_err(map_store_error)?
            .ok_or_else(|| Error::not_found("report not found"))?;
        if report.status != ReportStatus::Pending {
            return Err(Error::conflict("report has already been reviewed")
                .with_details(json!({ "status": report.status })));
        }
        let room = self.require_room(report.room_id).await?;
        self.ports.require_moderator(&room, reviewer_id).await?;

        let now = self.ports.now();
        let reviewer = Actor::User(reviewer_id);
        let message = match report.message_id {
            Some(id) => self.find_message(id).await?,
            None => None,
        };
        report.review(
            request.decision.resulting_status(),
            reviewer,
            request.notes.clone(),
            now,
        );
        let mut batch = WriteBatch::new().with(WriteOp::UpdateReport(report.clone()));

        let mut mute = None;
        if request.mute_user {
            if let Some(message) = message.as_ref().filter(|m| m.user_id != reviewer_id) {
                let minutes = request
                    .mute_duration_minutes
                    .unwrap_or(self.ports.config.moderation.review_mute_minutes);
                let until = expiry(
                    now,
                    Some(minutes),
                    self.ports.config.moderation.max_mute_minutes,
                )?;
                if self
                    .ports
                    .find_membership(room.id, message.user_id)
                    .await?
                    .is_some()
                {
                    batch.push(WriteOp::UpdateRestriction {
                        room_id: room.id,
                        user_id: message.user_id,
                        change: RestrictionChange::Mute {
                            by: reviewer,
                            until,
                        },
                    });
                    batch.push(WriteOp::RecordAction(NewModerationAction {
                        room_id: room.id,
                        moderator: reviewer,
                        target_user_id: message.user_id,
                        target_message_id: Some(message.id),
                        kind: ModerationActionKind::Mute,
                        reason: request.notes.clone(),
                        metadata: json!({
                            "duration_minutes": minutes,
                            "until": until,
                            "report_id": report.id,
                        }),
                        created_at: now,
                    }));
                    mute = Some((message.user_id, minutes));
                }
            }
        }

        let deleted = match message.as_ref().filter(|_| request.delete_message) {
            Some(message) => {
                batch.push(WriteOp::RecordAction(deletion_audit(
                    message,
                    reviewer,
                    request.notes.clone(),
                    json!({ "report_id": report.id }),
                    now,
                )));
                batch.push(WriteOp::DeleteMessage(message.id));
                report.message_id = None;
                Some(message.id)
            }
            None => None,
        };

        self.ports.commit(batch).await?;
        info!(
            report_id = %report.id,
            status = %report.status,
            message_deleted = deleted.is_some(),
            user_muted = mute.is_some(),
            "report reviewed"
        );

        if let Some(message_id) = deleted {
            self.ports.cache.invalidate_room_views(room.id).await;
            self.ports
                .broadcast(ChatEvent::MessageDeleted {
                    message_id,
                    room_id: room.id,
                    actor: reviewer,
                    reason: request.notes.clone(),
                })
                .await;
        }
        if let Some((target_id, minutes)) = mute {
            self.ports.cache.invalidate_presence(room.id, target_id).await;
            self.ports
                .broadcast(ChatEvent::UserMuted(ModerationNotice {
                    room_id: room.id,
                    target_id,
                    actor: reviewer,
                    duration_minutes: Some(minutes),
                    reason: request.notes.clone(),
                }))
                .await;
        }

        Ok(ReviewOutcome {
            report,
            message_deleted: deleted.is_some(),
            user_muted: mute.is_some(),
        })
    }

    /// Audit log of a room, newest first. Moderators only.
    pub async fn action_history(
        &self,
        room_id: RoomId,
        actor_id: UserId,
        filter: ModerationActionFilter,
        page: PageRequest,
    ) -> Result<HistoryPage<ModerationAction>, Error> {
        let room = self.require_room(room_id).await?;
        self.ports.require_moderator(&room, actor_id).await?;
        self.ports
            .store
            .list_actions(room.id, filter, page)
            .await
            .map_err(map_store_error)
    }

    /// Reports filed in a room, newest first. Moderators only.
    pub async fn report_history(
        &self,
        room_id: RoomId,
        actor_id: UserId,
        filter: ReportFilter,
        page: PageRequest,
    ) -> Result<HistoryPage<Report>, Error> {
        let room = self.require_room(room_id).await?;
        self.ports.require_moderator(&room, actor_id).await?;
        self.ports
            .store
            .list_reports(room.id, filter, page)
            .await
            .map_err(map_store_error)
    }

    async fn require_room(&self, room_id: RoomId) -> Result<Room, Error> {
        self.ports
            .store
            .find_room(room_id)
            .await
            .map_err(map_store_error)?
            .ok_or_else(|| Error::not_found("room not found"))
    }

    async fn find_message(&self, message_id: MessageId) -> Result<Option<Message>, Error> {
        self.ports
            .store
            .find_message(message_id)
            .await
            .map_err(map_store_error)
    }

    async fn require_message_in(
        &self,
        room_id: RoomId,
        message_id: MessageId,
    ) -> Result<Message, Error> {
        self.find_message(message_id)
            .await?
            .filter(|message| message.room_id == room_id)
            .ok_or_else(|| Error::not_found("message not found in this room"))
    }
}

/// End of a timed restriction, validated against `ceiling` minutes.
fn expiry(
    now: DateTime<Utc>,
    minutes: Option<u32>,
    ceiling: u32,
) -> Result<Option<DateTime<Utc>>, Error> {
    match minutes {
        None => Ok(None),
        Some(0) => Err(Error::invalid_request("duration must be at least one minute")),
        Some(minutes) if minutes > ceiling => Err(Error::invalid_request(format!(
            "duration must be at most {ceiling} minutes"
        ))
        .with_details(json!({ "maxMinutes": ceiling }))),
        Some(minutes) => Ok(Some(now + TimeDelta::minutes(i64::from(minutes)))),
    }
}

/// Audit entry for a deletion, capturing the content while it still exists.
fn deletion_audit(
    message: &Message,
    moderator: Actor,
    reason: Option<String>,
    extra: serde_json::Value,
    now: DateTime<Utc>,
) -> NewModerationAction {
    let mut metadata = json!({
        "content": message.body,
        "message_created_at": message.created_at,
    });
    if let (Some(target), serde_json::Value::Object(extra)) = (metadata.as_object_mut(), extra) {
        target.extend(extra);
    }
    NewModerationAction {
        room_id: message.room_id,
        moderator,
        target_user_id: message.user_id,
        target_message_id: Some(message.id),
        kind: ModerationActionKind::DeleteMessage,
        reason,
        metadata,
        created_at: now,
    }
}

#[cfg(test)]
#[path = "moderation_service_tests.rs"]
mod tests;
