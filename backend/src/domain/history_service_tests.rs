//! Keyset paging, caching, and search.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rstest::rstest;

use super::*;
use crate::domain::ports::{CacheKey, CacheStore, CacheStoreError, PrefixDeletion};
use crate::domain::{CacheLayer, ErrorCode};
use crate::outbound::InMemoryCacheStore;
use crate::test_support::TestChat;

/// In-memory cache that cannot enumerate keys.
struct KeylessCache(Arc<InMemoryCacheStore>);

#[async_trait]
impl CacheStore for KeylessCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheStoreError> {
        self.0.get(key).await
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheStoreError> {
        self.0.set(key, value, ttl).await
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheStoreError> {
        self.0.delete(key).await
    }

    async fn delete_by_prefix(&self, _prefix: &str) -> Result<PrefixDeletion, CacheStoreError> {
        Ok(PrefixDeletion::Unsupported)
    }

    async fn increment(&self, key: &CacheKey, ttl: Duration) -> Result<i64, CacheStoreError> {
        self.0.increment(key, ttl).await
    }

    async fn time_to_live(&self, key: &CacheKey) -> Result<Option<Duration>, CacheStoreError> {
        self.0.time_to_live(key).await
    }
}

async fn seeded_room(chat: &TestChat, count: usize) -> (Room, Vec<Message>) {
    let owner = chat.user(1, "owner");
    let room = chat.room(&owner, "lobby").await;
    let mut messages = Vec::new();
    for n in 0..count {
        // three rows share each timestamp
        if n % 3 == 0 {
            chat.clock.advance_seconds(1);
        }
        messages.push(chat.post(room.id, &owner, &format!("message {n}")).await);
    }
    (room, messages)
}

#[rstest]
#[tokio::test]
async fn paging_backwards_visits_every_message_once() {
    let chat = TestChat::new();
    let (room, messages) = seeded_room(&chat, 23).await;
    let history = HistoryService::new(chat.ports());

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    let mut previous_oldest: Option<MessageKey> = None;
    loop {
        let page = history
            .page(room.id, cursor.as_deref(), Some(5), Direction::Before)
            .await
            .expect("page");
        let newest = page.items.iter().map(Message::key).max();
        if let (Some(newest), Some(boundary)) = (newest, previous_oldest) {
            assert!(newest < boundary, "pages overlap");
        }
        previous_oldest = page.items.iter().map(Message::key).min();
        seen.extend(page.items.iter().map(|message| message.id));
        if !page.has_more {
            break;
        }
        cursor = page.prev_cursor;
    }

    let distinct: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(seen.len(), messages.len());
    assert_eq!(distinct.len(), messages.len());
}

#[rstest]
#[tokio::test]
async fn initial_page_is_the_newest_rows_in_chronological_order() {
    let chat = TestChat::new();
    let (room, messages) = seeded_room(&chat, 6).await;

    let page = HistoryService::new(chat.ports())
        .page(room.id, None, Some(4), Direction::Before)
        .await
        .expect("page");

    let ids: Vec<_> = page.items.iter().map(|m| m.id).collect();
    let expected: Vec<_> = messages[2..].iter().map(|m| m.id).collect();
    assert_eq!(ids, expected);
    assert!(page.has_more);
    assert_eq!(page.prev_cursor, messages[2].cursor());
    assert_eq!(page.next_cursor, messages[5].cursor());
}

#[rstest]
#[tokio::test]
async fn malformed_cursor_reads_like_no_cursor() {
    let chat = TestChat::new();
    let (room, _) = seeded_room(&chat, 4).await;
    let history = HistoryService::new(chat.ports());

    let clean = history
        .page(room.id, None, Some(2), Direction::Before)
        .await
        .expect("page");
    let garbled = history
        .page(room.id, Some("%%%not-a-cursor"), Some(2), Direction::Before)
        .await
        .expect("page");

    assert_eq!(clean, garbled);
}

#[rstest]
#[tokio::test]
async fn cached_pages_are_retired_by_history_invalidation() {
    let chat = TestChat::new();
    let (room, _) = seeded_room(&chat, 2).await;
    let history = HistoryService::new(chat.ports());
    let owner = chat.user(9, "late");

    let first = history
        .page(room.id, None, None, Direction::Before)
        .await
        .expect("page");
    chat.post(room.id, &owner, "fresh").await;
    let stale = history
        .page(room.id, None, None, Direction::Before)
        .await
        .expect("page");
    assert_eq!(first, stale);

    chat.ports().cache.invalidate_room_views(room.id).await;
    let fresh = history
        .page(room.id, None, None, Direction::Before)
        .await
        .expect("page");
    assert_eq!(fresh.items.len(), 3);
}

#[rstest]
#[tokio::test]
async fn expired_generation_never_revives_cached_pages() {
    let chat = TestChat::new();
    let (room, _) = seeded_room(&chat, 2).await;
    let mut ports = chat.ports();
    ports.cache = CacheLayer::new(
        Arc::new(KeylessCache(chat.cache.clone())),
        chat.clock.clone(),
        chat.config.cache,
    );
    let history = HistoryService::new(ports.clone());
    let lifetime = i64::try_from(chat.config.cache.history_generation.as_secs())
        .expect("generation lifetime fits");

    ports.cache.invalidate_history(room.id).await;
    ports.cache.invalidate_history(room.id).await;
    chat.clock.advance_seconds(lifetime - 60);
    let before = history
        .page(room.id, None, None, Direction::Before)
        .await
        .expect("page");
    assert_eq!(before.items.len(), 2);

    chat.clock.advance_seconds(120);
    let owner = chat.user(9, "late");
    for body in ["third", "fourth"] {
        chat.post(room.id, &owner, body).await;
        ports.cache.invalidate_history(room.id).await;
    }
    let after = history
        .page(room.id, None, None, Direction::Before)
        .await
        .expect("page");
    assert_eq!(after.items.len(), 4);
}

#[rstest]
#[tokio::test]
async fn after_pages_forward_from_a_message() {
    let chat = TestChat::new();
    let (room, messages) = seeded_room(&chat, 5).await;

    let page = HistoryService::new(chat.ports())
        .after(room.id, messages[1].id, Some(2))
        .await
        .expect("page");

    let ids: Vec<_> = page.items.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![messages[2].id, messages[3].id]);
    assert!(page.has_more);
}

#[rstest]
#[tokio::test]
async fn after_rejects_messages_from_other_rooms() {
    let chat = TestChat::new();
    let (room, messages) = seeded_room(&chat, 1).await;
    let other = chat.room(&chat.user(5, "other"), "elsewhere").await;

    let err = HistoryService::new(chat.ports())
        .after(other.id, messages[0].id, None)
        .await
        .expect_err("foreign message");
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert_ne!(room.id, other.id);
}

#[rstest]
#[case("", ErrorCode::InvalidRequest)]
#[case("   ", ErrorCode::InvalidRequest)]
#[tokio::test]
async fn blank_searches_are_rejected(#[case] query: &str, #[case] code: ErrorCode) {
    let chat = TestChat::new();
    let (room, _) = seeded_room(&chat, 1).await;

    let err = HistoryService::new(chat.ports())
        .search(room.id, query, None, None)
        .await
        .expect_err("blank");
    assert_eq!(err.code(), code);
}

#[rstest]
#[tokio::test]
async fn search_matches_substrings_ignoring_case() {
    let chat = TestChat::new();
    let (room, _) = seeded_room(&chat, 12).await;

    let page = HistoryService::new(chat.ports())
        .search(room.id, "MESSAGE 1", None, Some(2))
        .await
        .expect("search");

    let bodies: Vec<_> = page.items.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, ["message 11", "message 10"]);
    assert!(page.has_more);
}
