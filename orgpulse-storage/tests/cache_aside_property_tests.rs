//! Property Tests for the Cache-Aside Read Path
//!
//! **Single-flight**: N concurrent reads of one stale key cause exactly one
//! source fetch, and every reader sees the same result.
//!
//! **Serve-stale-on-error**: an expired record is served, marked stale, when
//! its refresh fails; a forced read surfaces the failure instead.
//!
//! **Idempotence**: repeated unforced reads of unchanged data within the TTL
//! return identical bytes and never touch the source again.
//!
//! **Degradation**: a failing cache is invisible to callers, a failing store
//! is not.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use orgpulse_test_utils::assertions::{assert_read_error, assert_source};
use orgpulse_test_utils::fixtures::{aged, page, post, record};
use orgpulse_test_utils::{
    CacheAsideController, EntityKind, EntityStore, FailingCache, FailingStore, FetchError,
    Harness, InMemoryCache, InMemoryEntityStore, OrchestratorConfig, ReadError, ReadSource,
    ScriptedFetcher,
};

// ============================================================================
// SINGLE-FLIGHT
// ============================================================================

#[tokio::test]
async fn concurrent_reads_share_one_fetch() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));
    h.fetcher.set_delay(Duration::from_millis(50));

    let reads = (0..32).map(|_| h.controller.read_entity(EntityKind::Page, "acme", false));
    let results = join_all(reads).await;

    assert_eq!(h.fetcher.calls(), 1);
    let first = results[0].as_ref().expect("first read").value().clone();
    for result in &results {
        let read = result.as_ref().expect("read");
        assert_eq!(read.value(), &first);
    }
    assert_eq!(h.controller.in_flight(), 0);
    assert_eq!(h.controller.stats().flight_joins, 31);
}

#[tokio::test]
async fn concurrent_failures_are_shared_and_not_cached() {
    let h = Harness::new();
    h.fetcher.set_delay(Duration::from_millis(20));
    h.fetcher.fail(EntityKind::Page, "acme");

    let reads = (0..8).map(|_| h.controller.read_entity(EntityKind::Page, "acme", false));
    for result in join_all(reads).await {
        assert_read_error(&result, "not_found");
    }
    assert_eq!(h.fetcher.calls(), 1);

    // The failure left no slot behind; the next reader fetches again.
    h.fetcher.heal(EntityKind::Page, "acme");
    h.fetcher.put(record(&page("acme")));
    let read = h.controller.read_entity(EntityKind::Page, "acme", false).await;
    assert_source(&read, ReadSource::Fetched);
    assert_eq!(h.fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn deadline_fails_the_read_and_frees_the_slot() {
    let config = OrchestratorConfig::default().with_fetch_deadline(Duration::from_millis(100));
    let h = Harness::with_config(config);
    h.fetcher.put(record(&page("acme")));
    h.fetcher.set_delay(Duration::from_secs(10));

    let result = h.controller.read_entity(EntityKind::Page, "acme", false).await;
    match result {
        Err(ReadError::NotFound {
            cause: FetchError::DeadlineExceeded { deadline },
            ..
        }) => assert_eq!(deadline, Duration::from_millis(100)),
        other => panic!("expected deadline failure, got {:?}", other),
    }
    assert_eq!(h.controller.in_flight(), 0);
    assert_eq!(h.controller.stats().flight_timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn deadline_with_prior_record_serves_stale() {
    let config = OrchestratorConfig::default().with_fetch_deadline(Duration::from_millis(100));
    let h = Harness::with_config(config);
    h.store
        .upsert(&aged(record(&page("acme")), Duration::from_secs(600)))
        .await
        .unwrap();
    h.fetcher.put(record(&page("acme")));
    h.fetcher.set_delay(Duration::from_secs(10));

    let read = h.controller.read_entity(EntityKind::Page, "acme", false).await;
    assert_source(&read, ReadSource::StaleFallback);
}

#[tokio::test]
async fn cancelled_reader_does_not_cancel_the_fetch() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));
    h.fetcher.set_delay(Duration::from_millis(100));

    let controller = h.controller.clone();
    let first = tokio::spawn(async move {
        controller.read_entity(EntityKind::Page, "acme", false).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    first.abort();

    let read = h.controller.read_entity(EntityKind::Page, "acme", false).await;
    assert_source(&read, ReadSource::Fetched);
    assert_eq!(h.fetcher.calls(), 1);
    assert!(h
        .store
        .get_by_key(EntityKind::Page, "acme")
        .await
        .unwrap()
        .is_some());
}

// ============================================================================
// SERVE-STALE-ON-ERROR
// ============================================================================

#[tokio::test]
async fn expired_record_is_served_stale_when_refresh_fails() {
    let h = Harness::new();
    let prior = aged(record(&page("acme")), Duration::from_secs(600));
    h.store.upsert(&prior).await.unwrap();
    h.fetcher.fail(EntityKind::Page, "acme");

    let read = h
        .controller
        .read_entity(EntityKind::Page, "acme", false)
        .await
        .expect("stale read");
    assert!(read.is_stale());
    assert_eq!(read.value(), &prior);
    assert_eq!(h.controller.stats().stale_served, 1);

    let forced = h.controller.read_entity(EntityKind::Page, "acme", true).await;
    assert_read_error(&forced, "fetch_failed");
}

#[tokio::test]
async fn missing_record_with_failed_fetch_is_not_found() {
    let h = Harness::new();
    h.fetcher.fail(EntityKind::Post, "p1");
    let result = h.controller.read_entity(EntityKind::Post, "p1", false).await;
    assert_read_error(&result, "not_found");
}

#[tokio::test]
async fn stale_record_refreshes_when_source_recovers() {
    let h = Harness::new();
    let prior = aged(record(&page("acme")), Duration::from_secs(600));
    h.store.upsert(&prior).await.unwrap();
    let mut current = page("acme");
    current.follower_count = 2_000;
    h.fetcher.put(record(&current));

    let read = h
        .controller
        .read_entity(EntityKind::Page, "acme", false)
        .await
        .expect("refreshed read");
    assert_eq!(read.source(), ReadSource::Fetched);
    assert_eq!(read.value().field("follower_count"), Some(&serde_json::json!(2_000)));
    assert!(read.value().refreshed_at > prior.refreshed_at);
}

// ============================================================================
// IDEMPOTENCE
// ============================================================================

#[tokio::test]
async fn repeated_reads_are_identical_and_fetch_once() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));

    let first = h
        .controller
        .read_entity(EntityKind::Page, "acme", false)
        .await
        .expect("first read");
    assert_eq!(first.source(), ReadSource::Fetched);
    let first_bytes = serde_json::to_vec(first.value()).unwrap();

    for _ in 0..5 {
        let again = h
            .controller
            .read_entity(EntityKind::Page, "acme", false)
            .await
            .expect("repeat read");
        assert_eq!(again.source(), ReadSource::Cache);
        assert_eq!(serde_json::to_vec(again.value()).unwrap(), first_bytes);
    }
    assert_eq!(h.fetcher.calls(), 1);
}

#[tokio::test]
async fn fresh_store_record_is_served_without_fetching() {
    let h = Harness::new();
    h.store.upsert(&record(&page("acme"))).await.unwrap();

    let read = h.controller.read_entity(EntityKind::Page, "acme", false).await;
    assert_source(&read, ReadSource::Store);
    let read = h.controller.read_entity(EntityKind::Page, "acme", false).await;
    assert_source(&read, ReadSource::Cache);
    assert_eq!(h.fetcher.calls(), 0);
}

#[tokio::test]
async fn forced_read_skips_cache_and_store() {
    let h = Harness::new();
    h.store.upsert(&record(&page("acme"))).await.unwrap();
    h.fetcher.put(record(&page("acme")));

    let read = h.controller.read_entity(EntityKind::Page, "acme", true).await;
    assert_source(&read, ReadSource::Fetched);
    assert_eq!(h.fetcher.calls(), 1);
}

// ============================================================================
// DEGRADATION
// ============================================================================

#[tokio::test]
async fn failing_cache_is_absorbed() {
    let store = Arc::new(InMemoryEntityStore::new());
    let fetcher = ScriptedFetcher::shared();
    fetcher.put(record(&page("acme")));
    let controller = CacheAsideController::new(
        store.clone(),
        Arc::new(FailingCache),
        fetcher.clone(),
        None,
        OrchestratorConfig::default(),
    );

    let read = controller.read_entity(EntityKind::Page, "acme", false).await;
    assert_source(&read, ReadSource::Fetched);
    let read = controller.read_entity(EntityKind::Page, "acme", false).await;
    assert_source(&read, ReadSource::Store);
    assert_eq!(fetcher.calls(), 1);
    assert!(controller.stats().cache_errors >= 2);
}

#[tokio::test]
async fn failing_store_surfaces_store_unavailable() {
    let fetcher = ScriptedFetcher::shared();
    fetcher.put(record(&page("acme")));
    let controller = CacheAsideController::new(
        Arc::new(FailingStore),
        Arc::new(InMemoryCache::new()),
        fetcher.clone(),
        None,
        OrchestratorConfig::default(),
    );

    let result = controller.read_entity(EntityKind::Page, "acme", false).await;
    assert_read_error(&result, "store_unavailable");
    assert_eq!(fetcher.calls(), 0);
}

// ============================================================================
// SINGLE CHILD READS
// ============================================================================

#[tokio::test]
async fn post_read_persists_its_page_first() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));
    h.fetcher.put(record(&post("p1", "acme", 0)));

    let read = h.controller.read_entity(EntityKind::Post, "p1", false).await;
    assert_source(&read, ReadSource::Fetched);
    assert!(h
        .store
        .get_by_key(EntityKind::Page, "acme")
        .await
        .unwrap()
        .is_some());
    assert_eq!(h.fetcher.calls_for(EntityKind::Page, "acme"), 1);
}

#[tokio::test]
async fn post_with_unresolvable_page_is_not_written() {
    let h = Harness::new();
    h.fetcher.put(record(&post("p1", "ghost", 0)));

    let result = h.controller.read_entity(EntityKind::Post, "p1", false).await;
    assert_read_error(&result, "parent_unresolved");
    assert!(h
        .store
        .get_by_key(EntityKind::Post, "p1")
        .await
        .unwrap()
        .is_none());
}
