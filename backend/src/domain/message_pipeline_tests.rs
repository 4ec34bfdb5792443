//! Send pipeline ordering, validation, and side effects.

use std::sync::Arc;

use rstest::rstest;
use serde_json::json;

use super::*;
use crate::domain::ports::{CacheStore, ChatStore, ChatStoreError, MockChatStore};
use crate::domain::{
    Actor, ChatConfig, ErrorCode, Membership, PresenceService, RestrictionChange, Room, User,
};
use crate::test_support::{RaceAfter, RacingStore, TestChat};

async fn setup_with(config: ChatConfig) -> (TestChat, User, Room, MessagePipeline) {
    let chat = TestChat::with_config(config);
    let owner = chat.user(1, "owner");
    let alice = chat.user(2, "alice");
    let room = chat.room(&owner, "lobby").await;
    chat.member(&room, &alice).await;
    let pipeline = MessagePipeline::new(chat.ports(), Arc::new(FilterPolicy::default()));
    (chat, alice, room, pipeline)
}

async fn setup() -> (TestChat, User, Room, MessagePipeline) {
    setup_with(ChatConfig::default()).await
}

async fn stored_count(chat: &TestChat, room: &Room) -> u64 {
    chat.store.message_stats(room.id).await.expect("stats").count
}

#[rstest]
#[tokio::test]
async fn messages_are_sanitised_rendered_and_announced() {
    let (chat, alice, room, pipeline) = setup().await;
    let bob = chat.user(3, "bob");

    let sent = pipeline
        .send(
            room.id,
            alice.id,
            "  Hello <b>@Bob</b> and @ghost :)  ",
            MessageKind::Text,
        )
        .await
        .expect("send");

    assert_eq!(
        sent.message.body,
        "Hello <span class=\"mention\" data-user-id=\"3\">@bob</span> and @ghost \u{1f642}"
    );
    assert_eq!(sent.mentions.len(), 1);
    assert_eq!(sent.mentions[0].user_id, bob.id);
    assert_eq!(sent.message.created_at, chat.now());
    assert_eq!(chat.publisher.names(), ["message_sent"]);
}

#[rstest]
#[tokio::test]
async fn sending_refreshes_the_sender_presence() {
    let (chat, alice, room, pipeline) = setup().await;
    chat.set_presence(&room, &alice, PresenceChange::Offline(chat.now()))
        .await;
    chat.clock.advance_minutes(2);

    pipeline
        .send(room.id, alice.id, "back again", MessageKind::Text)
        .await
        .expect("send");

    let membership = chat
        .store
        .find_membership(room.id, alice.id)
        .await
        .expect("lookup")
        .expect("membership");
    assert!(membership.online);
    assert_eq!(membership.last_seen, chat.now());
}

#[rstest]
#[case("", "empty_message")]
#[case("   \n\t ", "empty_message")]
#[case("<b></b><i></i>", "empty_message")]
#[tokio::test]
async fn empty_bodies_are_invalid(#[case] body: &str, #[case] reason: &str) {
    let (chat, alice, room, pipeline) = setup().await;

    let err = pipeline
        .send(room.id, alice.id, body, MessageKind::Text)
        .await
        .expect_err("empty");

    assert_eq!(err.code(), ErrorCode::InvalidRequest);
    assert_eq!(err.detail("reason"), Some(&json!(reason)));
    assert_eq!(stored_count(&chat, &room).await, 0);
}

#[rstest]
#[tokio::test]
async fn overlong_bodies_are_invalid() {
    let (chat, alice, room, pipeline) = setup().await;
    let body = "ab".repeat(MESSAGE_BODY_MAX / 2) + "c";

    let err = pipeline
        .send(room.id, alice.id, &body, MessageKind::Text)
        .await
        .expect_err("too long");

    assert_eq!(err.detail("reason"), Some(&json!("message_too_long")));
    assert_eq!(stored_count(&chat, &room).await, 0);
}

#[rstest]
#[tokio::test]
async fn non_members_cannot_send() {
    let (chat, _alice, room, pipeline) = setup().await;
    let stranger = chat.user(7, "stranger");

    let err = pipeline
        .send(room.id, stranger.id, "hi all", MessageKind::Text)
        .await
        .expect_err("not a member");

    assert_eq!(err.code(), ErrorCode::Forbidden);
    assert_eq!(stored_count(&chat, &room).await, 0);
}

#[rstest]
#[tokio::test]
async fn muted_members_see_when_they_can_speak_again() {
    let (chat, alice, room, pipeline) = setup().await;
    let until = chat.now() + chrono::TimeDelta::minutes(5);
    chat.restrict(
        &room,
        &alice,
        RestrictionChange::Mute {
            by: Actor::User(room.created_by),
            until: Some(until),
        },
    )
    .await;

    let err = pipeline
        .send(room.id, alice.id, "let me talk", MessageKind::Text)
        .await
        .expect_err("muted");
    assert_eq!(err.code(), ErrorCode::Forbidden);
    assert_eq!(err.detail("mutedUntil"), Some(&json!(until)));

    chat.clock.advance_minutes(5);
    pipeline
        .send(room.id, alice.id, "let me talk", MessageKind::Text)
        .await
        .expect("mute expired");
}

#[rstest]
#[tokio::test]
async fn blocked_messages_are_not_stored_or_rate_counted() {
    let (chat, alice, room, pipeline) = setup().await;

    let err = pipeline
        .send(room.id, alice.id, "go die", MessageKind::Text)
        .await
        .expect_err("blocked");

    assert_eq!(err.code(), ErrorCode::PolicyViolation);
    assert_eq!(stored_count(&chat, &room).await, 0);
    let counter = chat
        .cache
        .get(&crate::domain::cache::keys::message_rate(alice.id, room.id))
        .await
        .expect("cache read");
    assert_eq!(counter, None);
    assert!(chat.publisher.names().is_empty());
}

#[rstest]
#[tokio::test]
async fn system_messages_skip_the_content_filter() {
    let (_chat, alice, room, pipeline) = setup().await;

    let sent = pipeline
        .send(room.id, alice.id, "crap happened", MessageKind::System)
        .await
        .expect("send");

    assert_eq!(sent.message.body, "crap happened");
    assert_eq!(sent.message.kind, MessageKind::System);
}

#[rstest]
#[tokio::test]
async fn eleventh_message_in_a_minute_is_rate_limited() {
    let mut config = ChatConfig::default();
    config.spam.frequency_max_messages = 100;
    let (chat, alice, room, pipeline) = setup_with(config).await;

    for n in 1..=10 {
        pipeline
            .send(room.id, alice.id, &format!("status report {n}"), MessageKind::Text)
            .await
            .expect("within limit");
    }
    chat.clock.advance_seconds(20);
    let err = pipeline
        .send(room.id, alice.id, "status report 11", MessageKind::Text)
        .await
        .expect_err("limited");

    assert_eq!(err.code(), ErrorCode::RateLimited);
    assert_eq!(err.detail("attempts"), Some(&json!(11)));
    assert_eq!(err.detail("retryAfterSeconds"), Some(&json!(40)));
    assert!(err.message().contains("40 seconds"));
    assert_eq!(stored_count(&chat, &room).await, 10);

    chat.clock.advance_seconds(41);
    pipeline
        .send(room.id, alice.id, "status report 12", MessageKind::Text)
        .await
        .expect("new window");
}

#[rstest]
#[tokio::test]
async fn cached_room_stats_reflect_a_new_message() {
    let (chat, alice, room, pipeline) = setup().await;
    let presence = PresenceService::new(chat.ports());
    let before = presence.room_stats(room.id).await.expect("stats");
    assert_eq!(before.message_count, 0);

    pipeline
        .send(room.id, alice.id, "first!", MessageKind::Text)
        .await
        .expect("send");

    let after = presence.room_stats(room.id).await.expect("stats");
    assert_eq!(after.message_count, 1);
    assert_eq!(after.last_message_at, Some(chat.now()));
}

#[rstest]
#[tokio::test]
async fn failed_commits_leave_no_side_effects() {
    let chat = TestChat::new();
    let now = chat.now();
    let room = Room {
        id: RoomId::new(1),
        name: "lobby".into(),
        description: None,
        created_by: UserId::new(1),
        active: true,
        created_at: now,
    };
    let sender = UserId::new(2);
    let mut store = MockChatStore::new();
    let found = room.clone();
    store
        .expect_find_room()
        .returning(move |_| Ok(Some(found.clone())));
    store
        .expect_find_membership()
        .returning(move |room_id, user_id| Ok(Some(Membership::joined(room_id, user_id, now))));
    store
        .expect_commit()
        .times(1)
        .returning(|_| Err(ChatStoreError::connection("primary unreachable")));
    let mut ports = chat.ports();
    ports.store = Arc::new(store);
    let pipeline = MessagePipeline::new(ports, Arc::new(FilterPolicy::default()));

    let err = pipeline
        .send(room.id, sender, "hello", MessageKind::Text)
        .await
        .expect_err("commit fails");

    assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
    assert!(chat.publisher.names().is_empty());
}

#[rstest]
#[tokio::test]
async fn mute_landing_mid_send_refuses_the_message() {
    let (chat, alice, room, _pipeline) = setup().await;
    let racing = Arc::new(RacingStore::new(chat.store.clone()));
    let until = chat.now() + chrono::TimeDelta::minutes(10);
    racing.queue(
        RaceAfter::MembershipLookup,
        WriteBatch::new().with(WriteOp::UpdateRestriction {
            room_id: room.id,
            user_id: alice.id,
            change: RestrictionChange::Mute {
                by: Actor::User(room.created_by),
                until: Some(until),
            },
        }),
    );
    let pipeline = MessagePipeline::new(
        chat.ports_with_store(racing),
        Arc::new(FilterPolicy::default()),
    );

    let err = pipeline
        .send(room.id, alice.id, "sneaking this in", MessageKind::Text)
        .await
        .expect_err("muted before commit");

    assert_eq!(err.code(), ErrorCode::Forbidden);
    assert_eq!(err.detail("mutedUntil"), Some(&json!(until)));
    assert_eq!(stored_count(&chat, &room).await, 0);
    assert!(chat.publisher.names().is_empty());
    let membership = chat
        .store
        .find_membership(room.id, alice.id)
        .await
        .expect("lookup")
        .expect("membership");
    assert_eq!(membership.muted_until, Some(until));
}
