//! Content and spam filter gating every text message.
//!
//! Two passes run over the sanitised body: the word list (stateless) and the
//! spam heuristics (partly backed by cache counters). A message is blocked
//! when any violation is high severity, when spam violations reach two, or
//! when word violations reach three. Every block is written to the audit
//! log; high-severity spam also mutes the sender for a short while.

mod policy;
mod spam;
mod words;

use std::sync::Arc;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

pub use self::policy::{FilterPolicy, FilterPolicyError, FilterPolicyTables, WordRule};
use self::spam::SpamDetector;
use self::words::check_words;
use crate::domain::ports::{WriteBatch, WriteOp};
use crate::domain::service_support::ChatPorts;
use crate::domain::{
    Actor, ChatEvent, Error, ModerationActionKind, ModerationNotice, NewModerationAction,
    RestrictionChange, RoomId, UserId,
};

/// Word violations that block a message on their own.
const CONTENT_BLOCK_COUNT: usize = 3;
/// Spam violations that block a message on their own.
const SPAM_BLOCK_COUNT: usize = 2;

/// Violation severity, ordered from least to most serious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Which check raised a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    ProhibitedWord,
    MessageFrequency,
    DuplicateMessage,
    ExcessiveCaps,
    CharacterRepetition,
    UrlSpam,
}

impl ViolationKind {
    pub const fn is_spam(self) -> bool {
        !matches!(self, Self::ProhibitedWord)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub detail: String,
}

/// Outcome of evaluating one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterVerdict {
    pub allowed: bool,
    /// Body with low and medium word matches masked or replaced.
    pub filtered_body: String,
    pub violations: Vec<Violation>,
    /// Highest severity among the violations.
    pub severity: Option<Severity>,
    /// Whether the sender was muted automatically.
    pub auto_muted: bool,
}

impl FilterVerdict {
    /// Rejection surfaced to the sender of a blocked message.
    pub fn to_error(&self) -> Error {
        let reason = self
            .violations
            .iter()
            .max_by_key(|violation| violation.severity)
            .map_or_else(
                || "message rejected".to_owned(),
                |violation| violation.detail.clone(),
            );
        Error::policy_violation(format!("Message blocked by content filter: {reason}"))
            .with_details(json!({
                "reason": "content_blocked",
                "severity": self.severity,
                "violations": self.violations,
                "autoMuted": self.auto_muted,
            }))
    }
}

/// Evaluates message bodies and enforces blocking side effects.
#[derive(Clone)]
pub struct ContentFilterService {
    ports: ChatPorts,
    policy: Arc<FilterPolicy>,
    spam: SpamDetector,
}

impl ContentFilterService {
    pub fn new(ports: ChatPorts, policy: Arc<FilterPolicy>) -> Self {
        let spam = SpamDetector::new(
            ports.cache.store().clone(),
            ports.config.spam,
            policy.clone(),
        );
        Self {
            ports,
            policy,
            spam,
        }
    }

    /// Evaluate `body` as sent by `user_id` in `room_id`.
    ///
    /// A blocked verdict has already been audited (and the sender muted for
    /// high-severity spam) by the time it is returned.
    pub async fn evaluate(
        &self,
        body: &str,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<FilterVerdict, Error> {
        let now = self.ports.now();
        let word_check = check_words(&self.policy, body);
        let spam_violations = self.spam.check(body, user_id, room_id, now).await;

        let content_count = word_check.violations.len();
        let spam_count = spam_violations.len();
        let mut violations = word_check.violations;
        violations.extend(spam_violations);
        let severity = violations.iter().map(|violation| violation.severity).max();

        let allowed = !(severity == Some(Severity::High)
            || spam_count >= SPAM_BLOCK_COUNT
            || content_count >= CONTENT_BLOCK_COUNT);
        let mut verdict = FilterVerdict {
            allowed,
            filtered_body: word_check.filtered_body,
            violations,
            severity,
            auto_muted: false,
        };
        if !verdict.allowed {
            verdict.auto_muted = self.enforce_block(&verdict, body, user_id, room_id).await?;
        }
        Ok(verdict)
    }

    /// Audit the block and, for high-severity spam, mute the sender. Both
    /// land in one unit of work. Returns whether a mute was applied.
    async fn enforce_block(
        &self,
        verdict: &FilterVerdict,
        body: &str,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<bool, Error> {
        let now = self.ports.now();
        let spam_blocked = verdict.violations.iter().any(|v| v.kind.is_spam());
        let kind = if spam_blocked {
            ModerationActionKind::SpamDetection
        } else {
            ModerationActionKind::ContentFilter
        };
        let mut batch = WriteBatch::new().with(WriteOp::RecordAction(NewModerationAction {
            room_id,
            moderator: Actor::System,
            target_user_id: user_id,
            target_message_id: None,
            kind,
            reason: Some("Message blocked by content filter".to_owned()),
            metadata: json!({
                "severity": verdict.severity,
                "violations": verdict.violations,
                "content": body,
            }),
            created_at: now,
        }));

        let high_spam = verdict
            .violations
            .iter()
            .any(|v| v.kind.is_spam() && v.severity == Severity::High);
        let minutes = self.ports.config.spam.auto_mute_minutes;
        let mut muted = false;
        if high_spam {
            if self.ports.find_membership(room_id, user_id).await?.is_some() {
                batch.push(WriteOp::UpdateRestriction {
                    room_id,
                    user_id,
                    change: RestrictionChange::Mute {
                        by: Actor::System,
                        until: Some(now + TimeDelta::minutes(i64::from(minutes))),
                    },
                });
                batch.push(WriteOp::RecordAction(NewModerationAction {
                    room_id,
                    moderator: Actor::System,
                    target_user_id: user_id,
                    target_message_id: None,
                    kind: ModerationActionKind::Mute,
                    reason: Some("Automatic mute for spam".to_owned()),
                    metadata: json!({
                        "duration_minutes": minutes,
                        "auto_action": true,
                        "severity": Severity::High,
                    }),
                    created_at: now,
                }));
                muted = true;
            }
        }

        self.ports.commit(batch).await?;
        info!(
            room_id = %room_id,
            user_id = %user_id,
            violations = verdict.violations.len(),
            auto_muted = muted,
            "message blocked by content filter"
        );

        if muted {
            self.ports.cache.invalidate_presence(room_id, user_id).await;
            self.ports
                .broadcast(ChatEvent::UserMuted(ModerationNotice {
                    room_id,
                    target_id: user_id,
                    actor: Actor::System,
                    duration_minutes: Some(minutes),
                    reason: Some("Automatic mute for spam".to_owned()),
                }))
                .await;
        }
        Ok(muted)
    }
}
