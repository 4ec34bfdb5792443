//! Tests for the read-through cache layer.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rstest::rstest;

use super::*;
use crate::domain::ports::{CacheStoreError, MockCacheStore};
use crate::test_support::{MutableClock, start_time};

fn layer(store: MockCacheStore) -> CacheLayer {
    CacheLayer::new(
        Arc::new(store),
        Arc::new(MutableClock::new(start_time())),
        CacheTtls::default(),
    )
}

#[tokio::test]
async fn remember_returns_cached_value_without_computing() {
    let mut store = MockCacheStore::new();
    store
        .expect_get()
        .times(1)
        .return_once(|_| Ok(Some("41".to_owned())));
    store.expect_set().times(0);

    let calls = AtomicUsize::new(0);
    let value: i64 = layer(store)
        .remember(&keys::room_list(), Duration::from_secs(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        })
        .await
        .expect("cached value");

    assert_eq!(value, 41);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn remember_computes_and_stores_on_miss() {
    let mut store = MockCacheStore::new();
    store.expect_get().times(1).return_once(|_| Ok(None));
    store
        .expect_set()
        .withf(|key, value, ttl| {
            key.as_str() == "chat:rooms:active" && value == "7" && *ttl == Duration::from_secs(5)
        })
        .times(1)
        .return_once(|_, _, _| Ok(()));

    let value: i64 = layer(store)
        .remember(&keys::room_list(), Duration::from_secs(5), || async { Ok(7) })
        .await
        .expect("computed value");

    assert_eq!(value, 7);
}

#[tokio::test]
async fn remember_falls_through_when_cache_is_down() {
    let mut store = MockCacheStore::new();
    store
        .expect_get()
        .times(1)
        .return_once(|_| Err(CacheStoreError::backend("connection refused")));
    store
        .expect_set()
        .times(1)
        .return_once(|_, _, _| Err(CacheStoreError::backend("connection refused")));

    let value: i64 = layer(store)
        .remember(&keys::room_list(), Duration::from_secs(5), || async { Ok(3) })
        .await
        .expect("cache failures are not surfaced");

    assert_eq!(value, 3);
}

#[tokio::test]
async fn remember_recomputes_undecodable_entries() {
    let mut store = MockCacheStore::new();
    store
        .expect_get()
        .times(1)
        .return_once(|_| Ok(Some("not json".to_owned())));
    store.expect_set().times(1).return_once(|_, _, _| Ok(()));

    let value: Vec<i64> = layer(store)
        .remember(&keys::room_list(), Duration::from_secs(5), || async {
            Ok(vec![1, 2])
        })
        .await
        .expect("recomputed");

    assert_eq!(value, vec![1, 2]);
}

#[tokio::test]
async fn remember_propagates_compute_errors() {
    let mut store = MockCacheStore::new();
    store.expect_get().times(1).return_once(|_| Ok(None));
    store.expect_set().times(0);

    let err = layer(store)
        .remember::<i64, _, _>(&keys::room_list(), Duration::from_secs(5), || async {
            Err(Error::not_found("room 4 not found"))
        })
        .await
        .expect_err("compute error propagates");

    assert_eq!(err.code(), crate::domain::ErrorCode::NotFound);
}

#[rstest]
#[case(Ok(PrefixDeletion::Unsupported))]
#[case(Err(CacheStoreError::backend("scan failed")))]
#[tokio::test]
async fn prefix_invalidation_degrades_quietly(
    #[case] outcome: Result<PrefixDeletion, CacheStoreError>,
) {
    let mut store = MockCacheStore::new();
    store
        .expect_delete_by_prefix()
        .withf(|prefix| prefix == "chat:room:3:history:page:")
        .times(1)
        .return_once(move |_| outcome);

    layer(store)
        .forget_by_prefix(&keys::history_page_prefix(RoomId::new(3)))
        .await;
}

#[tokio::test]
async fn invalidating_history_bumps_generation_then_clears_pages() {
    let mut store = MockCacheStore::new();
    let mut sequence = mockall::Sequence::new();
    store
        .expect_increment()
        .withf(|key, _| key.as_str() == "chat:room:9:history:gen")
        .times(1)
        .in_sequence(&mut sequence)
        .return_once(|_, _| Ok(2));
    store
        .expect_delete_by_prefix()
        .times(1)
        .in_sequence(&mut sequence)
        .return_once(|_| Ok(PrefixDeletion::Deleted(4)));

    layer(store).invalidate_history(RoomId::new(9)).await;
}

#[tokio::test]
async fn restarted_generation_is_moved_past_earlier_values() {
    let seed = start_time().timestamp_millis().to_string();
    let mut store = MockCacheStore::new();
    let mut sequence = mockall::Sequence::new();
    store
        .expect_increment()
        .times(1)
        .in_sequence(&mut sequence)
        .return_once(|_, _| Ok(1));
    store
        .expect_set()
        .withf(move |key, value, ttl| {
            key.as_str() == "chat:room:9:history:gen"
                && *value == seed
                && *ttl == CacheTtls::default().history_generation
        })
        .times(1)
        .in_sequence(&mut sequence)
        .return_once(|_, _, _| Ok(()));
    store
        .expect_delete_by_prefix()
        .times(1)
        .in_sequence(&mut sequence)
        .return_once(|_| Ok(PrefixDeletion::Unsupported));

    layer(store).invalidate_history(RoomId::new(9)).await;
}

#[rstest]
#[case(Ok(None), Some(0))]
#[case(Ok(Some("5".to_owned())), Some(5))]
#[case(Ok(Some("five".to_owned())), None)]
#[case(Err(CacheStoreError::backend("down")), None)]
#[tokio::test]
async fn history_generation_reads_counter(
    #[case] stored: Result<Option<String>, CacheStoreError>,
    #[case] expected: Option<i64>,
) {
    let mut store = MockCacheStore::new();
    store.expect_get().times(1).return_once(move |_| stored);

    assert_eq!(
        layer(store).history_generation(RoomId::new(1)).await,
        expected
    );
}

#[rstest]
fn page_keys_embed_generation_and_anchor() {
    let key = keys::history_page(
        RoomId::new(2),
        7,
        pagination::Direction::Before,
        Some("abc"),
        50,
    );
    assert_eq!(key.as_str(), "chat:room:2:history:page:7:before:abc:50");
    assert!(key.has_prefix(&keys::history_page_prefix(RoomId::new(2))));
    let latest = keys::history_page(RoomId::new(2), 0, pagination::Direction::Before, None, 50);
    assert_eq!(latest.as_str(), "chat:room:2:history:page:0:before:latest:50");
}
