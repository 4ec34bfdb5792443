//! Test utilities for the chat crate.
//!
//! Shared by unit tests (in `src/`) and integration tests (in `tests/`).
//! Compiled for tests and when the `test-support` feature is enabled.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use mockable::Clock;

use crate::domain::ports::{
    ChatStore, ChatStoreError, CommitReceipt, EventPublisher, MessageQuery, MessageStats,
    PublishError, WriteBatch, WriteOp,
};
use crate::domain::{
    CacheLayer, ChatConfig, ChatEvent, ChatPorts, FilterPolicy, HistoryPage, Membership, Message,
    MessageId, MessageKind, ModerationAction, ModerationActionFilter, NewMessage, NewRoom,
    PageRequest, PresenceChange, Report, ReportFilter, ReportId, RestrictionChange, Room, RoomId,
    User, UserId,
};
use crate::outbound::{InMemoryCacheStore, InMemoryChatStore};
use crate::state::ChatServices;

/// Clock whose time only moves when a test advances it.
pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, delta: Duration) {
        let delta = match TimeDelta::from_std(delta) {
            Ok(delta) => delta,
            Err(error) => {
                panic!("failed to convert Duration to TimeDelta: {error}; delta={delta:?}",)
            }
        };
        *self.lock_clock() += delta;
    }

    pub fn advance_seconds(&self, seconds: i64) {
        *self.lock_clock() += TimeDelta::seconds(seconds);
    }

    pub fn advance_minutes(&self, minutes: i64) {
        *self.lock_clock() += TimeDelta::minutes(minutes);
    }

    fn lock_clock(&self) -> MutexGuard<'_, DateTime<Utc>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("clock mutex"),
        }
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.lock_clock()
    }
}

/// Publisher that keeps every event for later assertions.
#[derive(Default)]
pub struct RecordingPublisher(Mutex<Vec<(String, ChatEvent)>>);

impl RecordingPublisher {
    /// Published `(channel, event)` pairs in order.
    pub fn events(&self) -> Vec<(String, ChatEvent)> {
        self.lock().clone()
    }

    /// Event names in publish order.
    pub fn names(&self) -> Vec<&'static str> {
        self.lock().iter().map(|(_, event)| event.name()).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, ChatEvent)>> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("publisher mutex"),
        }
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, channel: &str, event: &ChatEvent) -> Result<(), PublishError> {
        self.lock().push((channel.to_owned(), event.clone()));
        Ok(())
    }
}

/// Publisher whose transport is always down.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingPublisher;

#[async_trait]
impl EventPublisher for FailingPublisher {
    async fn publish(&self, _channel: &str, _event: &ChatEvent) -> Result<(), PublishError> {
        Err(PublishError::transport("socket closed"))
    }
}

/// Fixed start time shared by the fixtures.
pub fn start_time() -> DateTime<Utc> {
    match Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single() {
        Some(time) => time,
        None => panic!("fixture start time must be valid"),
    }
}

/// In-memory deployment of the chat core with seeding helpers.
pub struct TestChat {
    pub store: Arc<InMemoryChatStore>,
    pub cache: Arc<InMemoryCacheStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub clock: Arc<MutableClock>,
    pub config: ChatConfig,
}

impl Default for TestChat {
    fn default() -> Self {
        Self::new()
    }
}

impl TestChat {
    pub fn new() -> Self {
        Self::with_config(ChatConfig::default())
    }

    pub fn with_config(config: ChatConfig) -> Self {
        let clock = Arc::new(MutableClock::new(start_time()));
        Self {
            store: Arc::new(InMemoryChatStore::new()),
            cache: Arc::new(InMemoryCacheStore::new(clock.clone())),
            publisher: Arc::new(RecordingPublisher::default()),
            clock,
            config,
        }
    }

    pub fn ports(&self) -> ChatPorts {
        self.ports_with_store(self.store.clone())
    }

    /// Ports reading and writing through `store` instead of the fixture store.
    pub fn ports_with_store(&self, store: Arc<dyn ChatStore>) -> ChatPorts {
        ChatPorts {
            store,
            cache: CacheLayer::new(self.cache.clone(), self.clock.clone(), self.config.cache),
            publisher: self.publisher.clone(),
            clock: self.clock.clone(),
            config: self.config,
        }
    }

    pub fn services(&self) -> ChatServices {
        ChatServices::new(self.ports(), Arc::new(FilterPolicy::default()))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.utc()
    }

    pub fn user(&self, id: i64, username: &str) -> User {
        self.seed_user(User::new(UserId::new(id), username))
    }

    pub fn elevated_user(&self, id: i64, username: &str) -> User {
        self.seed_user(User::new(UserId::new(id), username).elevated())
    }

    fn seed_user(&self, user: User) -> User {
        if let Err(err) = self.store.insert_user(user.clone()) {
            panic!("seeding user failed: {err}");
        }
        user
    }

    /// Active room created by `creator`, who is joined and online.
    pub async fn room(&self, creator: &User, name: &str) -> Room {
        let new_room = match NewRoom::try_new(name, None, creator.id, self.now()) {
            Ok(room) => room,
            Err(err) => panic!("invalid fixture room: {err}"),
        };
        let receipt = self
            .commit(WriteBatch::new().with(WriteOp::CreateRoom(new_room)))
            .await;
        match receipt.rooms.into_iter().next() {
            Some(room) => room,
            None => panic!("room creation returned no row"),
        }
    }

    /// Online membership for `user`, bypassing the join flow.
    pub async fn member(&self, room: &Room, user: &User) -> Membership {
        self.membership_change(WriteOp::UpdatePresence {
            room_id: room.id,
            user_id: user.id,
            change: PresenceChange::Online(self.now()),
        })
        .await
    }

    /// Mute or ban an existing member without an audit record.
    pub async fn restrict(&self, room: &Room, user: &User, change: RestrictionChange) -> Membership {
        self.membership_change(WriteOp::UpdateRestriction {
            room_id: room.id,
            user_id: user.id,
            change,
        })
        .await
    }

    /// Presence change with no restriction check and no notice.
    pub async fn set_presence(&self, room: &Room, user: &User, change: PresenceChange) -> Membership {
        self.membership_change(WriteOp::UpdatePresence {
            room_id: room.id,
            user_id: user.id,
            change,
        })
        .await
    }

    async fn membership_change(&self, op: WriteOp) -> Membership {
        let receipt = self.commit(WriteBatch::new().with(op)).await;
        match receipt.memberships.into_iter().next() {
            Some(membership) => membership,
            None => panic!("membership change returned no row"),
        }
    }

    /// Text message stored at the current clock time, bypassing the pipeline.
    pub async fn post(&self, room_id: RoomId, user: &User, body: &str) -> Message {
        let receipt = self
            .commit(WriteBatch::new().with(WriteOp::InsertMessage(NewMessage {
                room_id,
                user_id: user.id,
                body: body.to_owned(),
                kind: MessageKind::Text,
                created_at: self.now(),
            })))
            .await;
        match receipt.messages.into_iter().next() {
            Some(message) => message,
            None => panic!("message insert returned no row"),
        }
    }

    async fn commit(&self, batch: WriteBatch) -> CommitReceipt {
        match self.store.commit(batch).await {
            Ok(receipt) => receipt,
            Err(err) => panic!("fixture commit failed: {err}"),
        }
    }
}

/// Read after which a [`RacingStore`] lands its queued batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceAfter {
    MembershipLookup,
    StaleScan,
    DuplicateReportCheck,
    PendingReportList,
}

/// Store that applies a queued batch straight after a chosen read, the way
/// a concurrent writer would land between a service's checks and its commit.
pub struct RacingStore {
    inner: Arc<InMemoryChatStore>,
    queued: Mutex<Option<(RaceAfter, WriteBatch)>>,
}

impl RacingStore {
    pub fn new(inner: Arc<InMemoryChatStore>) -> Self {
        Self {
            inner,
            queued: Mutex::new(None),
        }
    }

    /// Commit `batch` once, right after the next read of kind `after`.
    pub fn queue(&self, after: RaceAfter, batch: WriteBatch) {
        *self.lock() = Some((after, batch));
    }

    fn lock(&self) -> MutexGuard<'_, Option<(RaceAfter, WriteBatch)>> {
        match self.queued.lock() {
            Ok(guard) => guard,
            Err(_) => panic!("racing store mutex"),
        }
    }

    async fn interleave(&self, read: RaceAfter) {
        let queued = {
            let mut slot = self.lock();
            match slot.as_ref() {
                Some((after, _)) if *after == read => slot.take(),
                _ => None,
            }
        };
        if let Some((_, batch)) = queued {
            if let Err(err) = self.inner.commit(batch).await {
                panic!("racing write failed: {err}");
            }
        }
    }
}

#[async_trait]
impl ChatStore for RacingStore {
    async fn find_user(&self, user_id: UserId) -> Result<Option<User>, ChatStoreError> {
        self.inner.find_user(user_id).await
    }

    async fn find_users_by_username(
        &self,
        usernames: &[String],
    ) -> Result<Vec<User>, ChatStoreError> {
        self.inner.find_users_by_username(usernames).await
    }

    async fn find_room(&self, room_id: RoomId) -> Result<Option<Room>, ChatStoreError> {
        self.inner.find_room(room_id).await
    }

    async fn find_active_room_by_name(&self, name: &str) -> Result<Option<Room>, ChatStoreError> {
        self.inner.find_active_room_by_name(name).await
    }

    async fn list_active_rooms(&self) -> Result<Vec<Room>, ChatStoreError> {
        self.inner.list_active_rooms().await
    }

    async fn find_membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<Membership>, ChatStoreError> {
        let found = self.inner.find_membership(room_id, user_id).await;
        self.interleave(RaceAfter::MembershipLookup).await;
        found
    }

    async fn list_memberships(&self, room_id: RoomId) -> Result<Vec<Membership>, ChatStoreError> {
        self.inner.list_memberships(room_id).await
    }

    async fn list_stale_memberships(
        &self,
        seen_before: DateTime<Utc>,
    ) -> Result<Vec<Membership>, ChatStoreError> {
        let stale = self.inner.list_stale_memberships(seen_before).await;
        self.interleave(RaceAfter::StaleScan).await;
        stale
    }

    async fn find_message(
        &self,
        message_id: MessageId,
    ) -> Result<Option<Message>, ChatStoreError> {
        self.inner.find_message(message_id).await
    }

    async fn list_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, ChatStoreError> {
        self.inner.list_messages(query).await
    }

    async fn message_stats(&self, room_id: RoomId) -> Result<MessageStats, ChatStoreError> {
        self.inner.message_stats(room_id).await
    }

    async fn find_report(&self, report_id: ReportId) -> Result<Option<Report>, ChatStoreError> {
        self.inner.find_report(report_id).await
    }

    async fn list_pending_reports(
        &self,
        message_id: MessageId,
    ) -> Result<Vec<Report>, ChatStoreError> {
        let pending = self.inner.list_pending_reports(message_id).await;
        self.interleave(RaceAfter::PendingReportList).await;
        pending
    }

    async fn has_pending_report(
        &self,
        message_id: MessageId,
        reporter_id: UserId,
    ) -> Result<bool, ChatStoreError> {
        let duplicate = self.inner.has_pending_report(message_id, reporter_id).await;
        self.interleave(RaceAfter::DuplicateReportCheck).await;
        duplicate
    }

    async fn list_actions(
        &self,
        room_id: RoomId,
        filter: ModerationActionFilter,
        page: PageRequest,
    ) -> Result<HistoryPage<ModerationAction>, ChatStoreError> {
        self.inner.list_actions(room_id, filter, page).await
    }

    async fn list_reports(
        &self,
        room_id: RoomId,
        filter: ReportFilter,
        page: PageRequest,
    ) -> Result<HistoryPage<Report>, ChatStoreError> {
        self.inner.list_reports(room_id, filter, page).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<CommitReceipt, ChatStoreError> {
        self.inner.commit(batch).await
    }
}
