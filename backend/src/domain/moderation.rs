//! Audit log entries and abuse reports.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Actor, MessageId, ModerationActionId, ReportId, RoomId, UserId};

/// What a moderation action did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationActionKind {
    DeleteMessage,
    Mute,
    Unmute,
    Ban,
    Unban,
    ContentFilter,
    SpamDetection,
}

/// Append-only audit record. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationAction {
    pub id: ModerationActionId,
    pub room_id: RoomId,
    pub moderator: Actor,
    pub target_user_id: UserId,
    /// Cleared by the store once the message row is deleted.
    pub target_message_id: Option<MessageId>,
    pub kind: ModerationActionKind,
    pub reason: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// An audit record awaiting storage.
#[derive(Debug, Clone, PartialEq)]
pub struct NewModerationAction {
    pub room_id: RoomId,
    pub moderator: Actor,
    pub target_user_id: UserId,
    pub target_message_id: Option<MessageId>,
    pub kind: ModerationActionKind,
    pub reason: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Report categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Spam,
    Harassment,
    HateSpeech,
    InappropriateContent,
    Misinformation,
    Other,
}

/// Error returned when a report category label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown report type: {0}")]
pub struct ReportKindParseError(pub String);

impl FromStr for ReportKind {
    type Err = ReportKindParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "spam" => Ok(Self::Spam),
            "harassment" => Ok(Self::Harassment),
            "hate_speech" => Ok(Self::HateSpeech),
            "inappropriate_content" => Ok(Self::InappropriateContent),
            "misinformation" => Ok(Self::Misinformation),
            "other" => Ok(Self::Other),
            _ => Err(ReportKindParseError(value.to_owned())),
        }
    }
}

/// Review state of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Resolved,
    Dismissed,
    Reviewed,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
            Self::Reviewed => "reviewed",
        };
        f.write_str(label)
    }
}

/// An abuse report against a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: ReportId,
    /// `None` once the reported message has been deleted.
    pub message_id: Option<MessageId>,
    pub reporter_id: UserId,
    pub room_id: RoomId,
    pub kind: ReportKind,
    pub reason: Option<String>,
    pub status: ReportStatus,
    pub reviewed_by: Option<Actor>,
    pub reviewer_notes: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Report {
    /// Record a review outcome.
    pub fn review(
        &mut self,
        status: ReportStatus,
        reviewer: Actor,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) {
        self.status = status;
        self.reviewed_by = Some(reviewer);
        self.reviewer_notes = notes;
        self.reviewed_at = Some(at);
    }
}

/// A report awaiting storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReport {
    pub message_id: MessageId,
    pub reporter_id: UserId,
    pub room_id: RoomId,
    pub kind: ReportKind,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Moderator verdict on a pending report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Resolve,
    Dismiss,
    Escalate,
}

impl ReviewDecision {
    /// Status a report takes after this decision.
    pub const fn resulting_status(self) -> ReportStatus {
        match self {
            Self::Resolve => ReportStatus::Resolved,
            Self::Dismiss => ReportStatus::Dismissed,
            Self::Escalate => ReportStatus::Reviewed,
        }
    }
}

/// Composable filters for the moderation-action history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModerationActionFilter {
    pub kind: Option<ModerationActionKind>,
    pub target_user_id: Option<UserId>,
}

/// Composable filters for the report history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportFilter {
    pub kind: Option<ReportKind>,
    pub status: Option<ReportStatus>,
    pub reporter_id: Option<UserId>,
}

/// Offset pagination for history listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    per_page: u32,
}

impl PageRequest {
    pub const DEFAULT_PER_PAGE: u32 = 20;
    pub const MAX_PER_PAGE: u32 = 100;

    /// Clamp page (≥ 1) and page size (1..=100, default 20).
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page
                .unwrap_or(Self::DEFAULT_PER_PAGE)
                .clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub const fn page(self) -> u32 {
        self.page
    }

    pub const fn per_page(self) -> u32 {
        self.per_page
    }

    /// Rows to skip.
    pub const fn offset(self) -> u64 {
        (self.page as u64 - 1) * self.per_page as u64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of a history listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, None, 1, 20, 0)]
    #[case(Some(0), Some(0), 1, 1, 0)]
    #[case(Some(3), Some(500), 3, 100, 200)]
    fn page_requests_are_clamped(
        #[case] page: Option<u32>,
        #[case] per_page: Option<u32>,
        #[case] expected_page: u32,
        #[case] expected_per_page: u32,
        #[case] expected_offset: u64,
    ) {
        let request = PageRequest::new(page, per_page);
        assert_eq!(request.page(), expected_page);
        assert_eq!(request.per_page(), expected_per_page);
        assert_eq!(request.offset(), expected_offset);
    }

    #[rstest]
    #[case("spam", ReportKind::Spam)]
    #[case("Hate_Speech", ReportKind::HateSpeech)]
    fn report_kinds_parse(#[case] raw: &str, #[case] expected: ReportKind) {
        assert_eq!(raw.parse::<ReportKind>(), Ok(expected));
    }

    #[rstest]
    fn unknown_report_kind_is_rejected() {
        assert!("rude".parse::<ReportKind>().is_err());
    }

    #[rstest]
    #[case(ReviewDecision::Resolve, ReportStatus::Resolved)]
    #[case(ReviewDecision::Dismiss, ReportStatus::Dismissed)]
    #[case(ReviewDecision::Escalate, ReportStatus::Reviewed)]
    fn decisions_map_to_statuses(#[case] decision: ReviewDecision, #[case] status: ReportStatus) {
        assert_eq!(decision.resulting_status(), status);
    }
}
