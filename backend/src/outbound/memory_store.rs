//! In-memory system of record.
//!
//! Batches are applied to a copy of the tables which replaces the live copy
//! only once every operation succeeded, so a failing operation leaves no
//! trace of the earlier ones.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pagination::Direction;

use crate::domain::ports::{
    ChatStore, ChatStoreError, CommitReceipt, MessageQuery, MessageStats, WriteBatch, WriteOp,
};
use crate::domain::{
    HistoryPage, Membership, Message, MessageId, MessageKind, ModerationAction,
    ModerationActionFilter, ModerationActionId, PageRequest, PresenceChange, Report, ReportFilter,
    ReportId, ReportStatus, Room, RoomId, User, UserId,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    rooms: BTreeMap<RoomId, Room>,
    memberships: BTreeMap<(RoomId, UserId), Membership>,
    messages: BTreeMap<MessageId, Message>,
    actions: Vec<ModerationAction>,
    reports: BTreeMap<ReportId, Report>,
    last_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn require_room(&self, room_id: RoomId) -> Result<(), ChatStoreError> {
        if self.rooms.contains_key(&room_id) {
            Ok(())
        } else {
            Err(ChatStoreError::constraint(format!("room {room_id} does not exist")))
        }
    }

    fn require_user(&self, user_id: UserId) -> Result<(), ChatStoreError> {
        if self.users.contains_key(&user_id) {
            Ok(())
        } else {
            Err(ChatStoreError::constraint(format!("user {user_id} does not exist")))
        }
    }

    fn membership_mut(
        &mut self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<&mut Membership, ChatStoreError> {
        self.memberships
            .get_mut(&(room_id, user_id))
            .ok_or_else(|| {
                ChatStoreError::constraint(format!(
                    "user {user_id} is not a member of room {room_id}"
                ))
            })
    }

    fn apply(&mut self, op: WriteOp, receipt: &mut CommitReceipt) -> Result<(), ChatStoreError> {
        match op {
            WriteOp::CreateRoom(new_room) => {
                self.require_user(new_room.created_by)?;
                let taken = self
                    .rooms
                    .values()
                    .any(|room| room.active && room.name.eq_ignore_ascii_case(&new_room.name));
                if taken {
                    return Err(ChatStoreError::conflict(format!(
                        "an active room named {:?} exists",
                        new_room.name
                    )));
                }
                let room = Room {
                    id: RoomId::new(self.next_id()),
                    name: new_room.name,
                    description: new_room.description,
                    created_by: new_room.created_by,
                    active: true,
                    created_at: new_room.created_at,
                };
                self.memberships.insert(
                    (room.id, room.created_by),
                    Membership::joined(room.id, room.created_by, room.created_at),
                );
                self.rooms.insert(room.id, room.clone());
                receipt.rooms.push(room);
            }
            WriteOp::UpdateRoom(room) => {
                self.require_room(room.id)?;
                self.rooms.insert(room.id, room);
            }
            WriteOp::UpdatePresence {
                room_id,
                user_id,
                change,
            } => {
                self.require_room(room_id)?;
                self.require_user(user_id)?;
                if let PresenceChange::Online(at) = change {
                    self.memberships
                        .entry((room_id, user_id))
                        .or_insert_with(|| Membership::joined(room_id, user_id, at));
                }
                let membership = self.membership_mut(room_id, user_id)?;
                membership.apply_presence(change).map_err(|refusal| {
                    ChatStoreError::conflict(format!("{refusal} in room {room_id}"))
                })?;
                receipt.memberships.push(membership.clone());
            }
            WriteOp::ExpirePresence {
                room_id,
                user_id,
                seen_before,
                notice,
            } => {
                let Some(membership) = self.memberships.get_mut(&(room_id, user_id)) else {
                    return Ok(());
                };
                if !membership.online || membership.last_seen >= seen_before {
                    return Ok(());
                }
                membership.online = false;
                receipt.memberships.push(membership.clone());
                self.apply(WriteOp::InsertMessage(notice), receipt)?;
            }
            WriteOp::UpdateRestriction {
                room_id,
                user_id,
                change,
            } => {
                let membership = self.membership_mut(room_id, user_id)?;
                membership.apply_restriction(change);
                receipt.memberships.push(membership.clone());
            }
            WriteOp::InsertMessage(new_message) => {
                self.require_room(new_message.room_id)?;
                self.require_user(new_message.user_id)?;
                let message = Message {
                    id: MessageId::new(self.next_id()),
                    room_id: new_message.room_id,
                    user_id: new_message.user_id,
                    body: new_message.body,
                    kind: new_message.kind,
                    created_at: new_message.created_at,
                };
                self.messages.insert(message.id, message.clone());
                receipt.messages.push(message);
            }
            WriteOp::DeleteMessage(message_id) => {
                if self.messages.remove(&message_id).is_none() {
                    return Err(ChatStoreError::conflict(format!(
                        "message {message_id} does not exist"
                    )));
                }
                for report in self.reports.values_mut() {
                    if report.message_id == Some(message_id) {
                        report.message_id = None;
                    }
                }
                for action in &mut self.actions {
                    if action.target_message_id == Some(message_id) {
                        action.target_message_id = None;
                    }
                }
            }
            WriteOp::RecordAction(new_action) => {
                self.require_room(new_action.room_id)?;
                let action = ModerationAction {
                    id: ModerationActionId::new(self.next_id()),
                    room_id: new_action.room_id,
                    moderator: new_action.moderator,
                    target_user_id: new_action.target_user_id,
                    target_message_id: new_action.target_message_id,
                    kind: new_action.kind,
                    reason: new_action.reason,
                    metadata: new_action.metadata,
                    created_at: new_action.created_at,
                };
                self.actions.push(action.clone());
                receipt.actions.push(action);
            }
            WriteOp::InsertReport(new_report) => {
                if !self.messages.contains_key(&new_report.message_id) {
                    return Err(ChatStoreError::conflict(format!(
                        "message {} does not exist",
                        new_report.message_id
                    )));
                }
                let duplicate = self.reports.values().any(|report| {
                    report.message_id == Some(new_report.message_id)
                        && report.reporter_id == new_report.reporter_id
                        && report.status == ReportStatus::Pending
                });
                if duplicate {
                    return Err(ChatStoreError::conflict(format!(
                        "user {} already has a pending report on message {}",
                        new_report.reporter_id, new_report.message_id
                    )));
                }
                let report = Report {
                    id: ReportId::new(self.next_id()),
                    message_id: Some(new_report.message_id),
                    reporter_id: new_report.reporter_id,
                    room_id: new_report.room_id,
                    kind: new_report.kind,
                    reason: new_report.reason,
                    status: ReportStatus::Pending,
                    reviewed_by: None,
                    reviewer_notes: None,
                    reviewed_at: None,
                    created_at: new_report.created_at,
                };
                self.reports.insert(report.id, report.clone());
                receipt.reports.push(report);
            }
            WriteOp::UpdateReport(report) => {
                match self.reports.get(&report.id) {
                    None => {
                        return Err(ChatStoreError::constraint(format!(
                            "report {} does not exist",
                            report.id
                        )));
                    }
                    Some(stored) if stored.status != ReportStatus::Pending => {
                        return Err(ChatStoreError::conflict(format!(
                            "report {} was already reviewed",
                            report.id
                        )));
                    }
                    Some(_) => {}
                }
                self.reports.insert(report.id, report);
            }
            WriteOp::ResolvePendingReports {
                message_id,
                reviewer,
                notes,
                reviewed_at,
            } => {
                for report in self.reports.values_mut().filter(|report| {
                    report.message_id == Some(message_id) && report.status == ReportStatus::Pending
                }) {
                    report.review(
                        ReportStatus::Resolved,
                        reviewer,
                        Some(notes.clone()),
                        reviewed_at,
                    );
                    receipt.resolved_reports.push(report.clone());
                }
            }
        }
        Ok(())
    }
}

/// [`ChatStore`] held entirely in process memory.
#[derive(Default)]
pub struct InMemoryChatStore {
    tables: Mutex<Tables>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account. Accounts belong to the authentication system, so
    /// they are seeded rather than written through batches.
    pub fn insert_user(&self, user: User) -> Result<(), ChatStoreError> {
        self.lock()?.users.insert(user.id, user);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, ChatStoreError> {
        self.tables
            .lock()
            .map_err(|_| ChatStoreError::query("store lock poisoned"))
    }
}

fn paginate<T: Clone>(rows: Vec<T>, page: PageRequest) -> HistoryPage<T> {
    let total = rows.len() as u64;
    let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
    HistoryPage {
        items: rows
            .into_iter()
            .skip(offset)
            .take(page.per_page() as usize)
            .collect(),
        page: page.page(),
        per_page: page.per_page(),
        total,
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn find_user(&self, user_id: UserId) -> Result<Option<User>, ChatStoreError> {
        Ok(self.lock()?.users.get(&user_id).cloned())
    }

    async fn find_users_by_username(
        &self,
        usernames: &[String],
    ) -> Result<Vec<User>, ChatStoreError> {
        Ok(self
            .lock()?
            .users
            .values()
            .filter(|user| {
                usernames
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(&user.username))
            })
            .cloned()
            .collect())
    }

    async fn find_room(&self, room_id: RoomId) -> Result<Option<Room>, ChatStoreError> {
        Ok(self.lock()?.rooms.get(&room_id).cloned())
    }

    async fn find_active_room_by_name(&self, name: &str) -> Result<Option<Room>, ChatStoreError> {
        Ok(self
            .lock()?
            .rooms
            .values()
            .find(|room| room.active && room.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn list_active_rooms(&self) -> Result<Vec<Room>, ChatStoreError> {
        Ok(self
            .lock()?
            .rooms
            .values()
            .filter(|room| room.active)
            .cloned()
            .collect())
    }

    async fn find_membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Membership>, ChatStoreError> {
        Ok(self.lock()?.memberships.get(&(room_id, user_id)).cloned())
    }

    async fn list_memberships(&self, room_id: RoomId) -> Result<Vec<Membership>, ChatStoreError> {
        Ok(self
            .lock()?
            .memberships
            .values()
            .filter(|membership| membership.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn list_stale_memberships(
        &self,
        seen_before: DateTime<Utc>,
    ) -> Result<Vec<Membership>, ChatStoreError> {
        Ok(self
            .lock()?
            .memberships
            .values()
            .filter(|membership| membership.online && membership.last_seen < seen_before)
            .cloned()
            .collect())
    }

    async fn find_message(
        &self,
        message_id: MessageId,
    ) -> Result<Option<Message>, ChatStoreError> {
        Ok(self.lock()?.messages.get(&message_id).cloned())
    }

    async fn list_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, ChatStoreError> {
        let needle = query.contains.as_deref().map(str::to_lowercase);
        let tables = self.lock()?;
        let mut rows: Vec<Message> = tables
            .messages
            .values()
            .filter(|message| message.room_id == query.room_id)
            .filter(|message| !query.text_only || message.kind == MessageKind::Text)
            .filter(|message| {
                needle
                    .as_deref()
                    .is_none_or(|needle| message.body.to_lowercase().contains(needle))
            })
            .filter(|message| match (query.anchor, query.direction) {
                (None, _) => true,
                (Some(anchor), Direction::Before) => message.key() < anchor,
                (Some(anchor), Direction::After) => message.key() > anchor,
            })
            .cloned()
            .collect();
        rows.sort_by_key(Message::key);
        if query.direction == Direction::Before {
            rows.reverse();
        }
        rows.truncate(query.limit);
        Ok(rows)
    }

    async fn message_stats(&self, room_id: RoomId) -> Result<MessageStats, ChatStoreError> {
        let tables = self.lock()?;
        let in_room = tables
            .messages
            .values()
            .filter(|message| message.room_id == room_id);
        let (count, last_message_at) = in_room.fold((0_u64, None), |(count, last), message| {
            (count + 1, last.max(Some(message.created_at)))
        });
        Ok(MessageStats {
            count,
            last_message_at,
        })
    }

    async fn find_report(&self, report_id: ReportId) -> Result<Option<Report>, ChatStoreError> {
        Ok(self.lock()?.reports.get(&report_id).cloned())
    }

    async fn list_pending_reports(
        &self,
        message_id: MessageId,
    ) -> Result<Vec<Report>, ChatStoreError> {
        Ok(self
            .lock()?
            .reports
            .values()
            .filter(|report| {
                report.message_id == Some(message_id) && report.status == ReportStatus::Pending
            })
            .cloned()
            .collect())
    }

    async fn has_pending_report(
        &self,
        message_id: MessageId,
        reporter_id: UserId,
    ) -> Result<bool, ChatStoreError> {
        Ok(self.lock()?.reports.values().any(|report| {
            report.message_id == Some(message_id)
                && report.reporter_id == reporter_id
                && report.status == ReportStatus::Pending
        }))
    }

    async fn list_actions(
        &self,
        room_id: RoomId,
        filter: ModerationActionFilter,
        page: PageRequest,
    ) -> Result<HistoryPage<ModerationAction>, ChatStoreError> {
        let mut rows: Vec<ModerationAction> = self
            .lock()?
            .actions
            .iter()
            .filter(|action| action.room_id == room_id)
            .filter(|action| filter.kind.is_none_or(|kind| action.kind == kind))
            .filter(|action| {
                filter
                    .target_user_id
                    .is_none_or(|target| action.target_user_id == target)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(paginate(rows, page))
    }

    async fn list_reports(
        &self,
        room_id: RoomId,
        filter: ReportFilter,
        page: PageRequest,
    ) -> Result<HistoryPage<Report>, ChatStoreError> {
        let mut rows: Vec<Report> = self
            .lock()?
            .reports
            .values()
            .filter(|report| report.room_id == room_id)
            .filter(|report| filter.kind.is_none_or(|kind| report.kind == kind))
            .filter(|report| filter.status.is_none_or(|status| report.status == status))
            .filter(|report| {
                filter
                    .reporter_id
                    .is_none_or(|reporter| report.reporter_id == reporter)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(paginate(rows, page))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt, ChatStoreError> {
        let mut tables = self.lock()?;
        let mut staged = tables.clone();
        let mut receipt = CommitReceipt::default();
        for op in batch.into_ops() {
            staged.apply(op, &mut receipt)?;
        }
        *tables = staged;
        Ok(receipt)
    }
}

#[cfg(test)]
#[path = "memory_store_tests.rs"]
mod tests;
