//! Port for the durable system of record.
//!
//! Reads are individual queries. Writes go through [`ChatStore::commit`],
//! which applies a [`WriteBatch`] as one atomic unit of work: either every
//! operation is visible afterwards or none is. Operations apply in the order
//! they were pushed, so a batch that records an audit entry before deleting a
//! message captures the message while it still exists.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pagination::Direction;

use crate::domain::{
    Actor, HistoryPage, Membership, Message, MessageId, MessageKey, ModerationAction,
    ModerationActionFilter, NewMessage, NewModerationAction, NewReport, NewRoom, PageRequest,
    PresenceChange, Report, ReportFilter, ReportId, RestrictionChange, Room, RoomId, User, UserId,
};

use super::define_port_error;

define_port_error! {
    /// Errors raised by durable store adapters.
    pub enum ChatStoreError {
        /// Store connection could not be established.
        Connection { message: String } => "chat store connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "chat store query failed: {message}",
        /// A batch referenced missing rows or broke a constraint; nothing was
        /// applied.
        Constraint { message: String } => "chat store rejected batch: {message}",
        /// A batch no longer fits the stored state, typically because a
        /// concurrent batch changed it first; nothing was applied.
        Conflict { message: String } => "chat store batch conflicts: {message}",
    }
}

/// Range query over a room's messages.
///
/// `Before` returns rows strictly older than `anchor`, newest first; `After`
/// returns rows strictly newer than `anchor`, oldest first. Without an anchor
/// the range starts at the newest (`Before`) or oldest (`After`) row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub room_id: RoomId,
    pub anchor: Option<MessageKey>,
    pub direction: Direction,
    pub limit: usize,
    pub text_only: bool,
    /// Case-insensitive substring the body must contain.
    pub contains: Option<String>,
}

/// Aggregate message figures for one room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageStats {
    pub count: u64,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// A single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert a room together with its creator's online membership.
    CreateRoom(NewRoom),
    /// Overwrite an existing room.
    UpdateRoom(Room),
    /// Apply a presence change to the stored membership. `Online` creates
    /// the membership when absent; a refused change is a conflict.
    UpdatePresence {
        room_id: RoomId,
        user_id: UserId,
        change: PresenceChange,
    },
    /// Flip a membership offline and insert `notice`, but only while it is
    /// still online and was last seen before `seen_before`. Otherwise
    /// nothing happens.
    ExpirePresence {
        room_id: RoomId,
        user_id: UserId,
        seen_before: DateTime<Utc>,
        notice: NewMessage,
    },
    /// Apply a restriction change to an existing membership.
    UpdateRestriction {
        room_id: RoomId,
        user_id: UserId,
        change: RestrictionChange,
    },
    /// Insert a message; the store assigns id.
    InsertMessage(NewMessage),
    /// Delete a message, clearing references to it from reports and audit
    /// records. A message that is already gone is a conflict.
    DeleteMessage(MessageId),
    /// Append an audit record.
    RecordAction(NewModerationAction),
    /// Insert a pending report; a second pending report by the same
    /// reporter on the same message is a conflict.
    InsertReport(NewReport),
    /// Overwrite a report that is still pending; a reviewed report is a
    /// conflict.
    UpdateReport(Report),
    /// Mark every pending report for a message as resolved.
    ResolvePendingReports {
        message_id: MessageId,
        reviewer: Actor,
        notes: String,
        reviewed_at: DateTime<Utc>,
    },
}

/// Ordered list of mutations applied atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch(Vec<WriteOp>);

impl WriteBatch {
    /// Start an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operation.
    #[must_use]
    pub fn with(mut self, op: WriteOp) -> Self {
        self.0.push(op);
        self
    }

    /// Append an operation in place.
    pub fn push(&mut self, op: WriteOp) {
        self.0.push(op);
    }

    /// Operations in application order.
    pub fn ops(&self) -> &[WriteOp] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.0
    }
}

/// Rows produced by a committed batch, in operation order per kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReceipt {
    pub rooms: Vec<Room>,
    /// Membership rows as left by presence and restriction changes.
    pub memberships: Vec<Membership>,
    pub messages: Vec<Message>,
    pub actions: Vec<ModerationAction>,
    pub reports: Vec<Report>,
    pub resolved_reports: Vec<Report>,
}

/// Durable store for rooms, memberships, messages, reports, and the audit
/// log.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_user(&self, user_id: UserId) -> Result<Option<User>, ChatStoreError>;

    /// Users whose username matches any of `usernames`, ignoring case.
    async fn find_users_by_username(
        &self,
        usernames: &[String],
    ) -> Result<Vec<User>, ChatStoreError>;

    async fn find_room(&self, room_id: RoomId) -> Result<Option<Room>, ChatStoreError>;

    /// Active room whose name matches, ignoring case.
    async fn find_active_room_by_name(&self, name: &str) -> Result<Option<Room>, ChatStoreError>;

    async fn list_active_rooms(&self) -> Result<Vec<Room>, ChatStoreError>;

    async fn find_membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Membership>, ChatStoreError>;

    async fn list_memberships(&self, room_id: RoomId) -> Result<Vec<Membership>, ChatStoreError>;

    /// Memberships flagged online whose `last_seen` is older than
    /// `seen_before`, across all rooms.
    async fn list_stale_memberships(
        &self,
        seen_before: DateTime<Utc>,
    ) -> Result<Vec<Membership>, ChatStoreError>;

    async fn find_message(&self, message_id: MessageId)
    -> Result<Option<Message>, ChatStoreError>;

    async fn list_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, ChatStoreError>;

    async fn message_stats(&self, room_id: RoomId) -> Result<MessageStats, ChatStoreError>;

    async fn find_report(&self, report_id: ReportId) -> Result<Option<Report>, ChatStoreError>;

    /// Pending reports against a message.
    async fn list_pending_reports(
        &self,
        message_id: MessageId,
    ) -> Result<Vec<Report>, ChatStoreError>;

    /// Whether `reporter_id` already has a pending report on the message.
    async fn has_pending_report(
        &self,
        message_id: MessageId,
        reporter_id: UserId,
    ) -> Result<bool, ChatStoreError>;

    /// Audit records for a room, newest first.
    async fn list_actions(
        &self,
        room_id: RoomId,
        filter: ModerationActionFilter,
        page: PageRequest,
    ) -> Result<HistoryPage<ModerationAction>, ChatStoreError>;

    /// Reports for a room, newest first.
    async fn list_reports(
        &self,
        room_id: RoomId,
        filter: ReportFilter,
        page: PageRequest,
    ) -> Result<HistoryPage<Report>, ChatStoreError>;

    /// Apply a batch atomically.
    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt, ChatStoreError>;
}

#[cfg(test)]
mod tests {
    //! Regression coverage for this module.

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn batches_keep_insertion_order() {
        let batch = WriteBatch::new()
            .with(WriteOp::DeleteMessage(MessageId::new(2)))
            .with(WriteOp::DeleteMessage(MessageId::new(1)));
        assert_eq!(
            batch.ops(),
            &[
                WriteOp::DeleteMessage(MessageId::new(2)),
                WriteOp::DeleteMessage(MessageId::new(1)),
            ]
        );
    }

    #[rstest]
    fn constraint_error_formats_message() {
        let err = ChatStoreError::constraint("message 9 not found");
        assert!(err.to_string().contains("message 9 not found"));
    }
}
