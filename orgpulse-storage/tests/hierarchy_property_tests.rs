//! Property Tests for Parent-First Reads, Listings and Summaries
//!
//! **Hierarchical ordering**: a child listing whose parent cannot be
//! resolved fails with `ParentUnresolved` and never reaches the source.
//!
//! **No implicit cascade**: forcing a child leaves a fresh parent alone
//! unless cascading is requested.
//!
//! **Pagination**: 25 matching posts, page 3 of size 10 holds 5 items; page
//! 10 holds none; both report a total of 25.
//!
//! **Summary invalidation**: a summary within its TTL is regenerated as soon
//! as the page or post snapshot it was built from changes.

use std::collections::BTreeMap;
use std::time::Duration;

use orgpulse_test_utils::assertions::{assert_read_error, assert_source};
use orgpulse_test_utils::fixtures::{aged, comment, employee, page, post, posts, record};
use orgpulse_test_utils::{
    EntityKind, EntityStore, Harness, OrchestratorConfig, ReadOptions, ReadSource,
};

// ============================================================================
// PARENT-FIRST ORDERING
// ============================================================================

#[tokio::test]
async fn failed_parent_blocks_child_fetch() {
    let h = Harness::new();
    h.fetcher.fail(EntityKind::Page, "acme");
    h.fetcher.put_children(EntityKind::Post, "acme", posts("acme", 3));

    let result = h.hierarchy.read_posts("acme", ReadOptions::default()).await;
    assert_read_error(&result, "parent_unresolved");
    assert_eq!(h.fetcher.calls_for(EntityKind::Post, "acme"), 0);

    match result {
        Err(e) => assert_eq!(e.root().kind_name(), "not_found"),
        Ok(_) => unreachable!(),
    }
}

#[tokio::test]
async fn stale_parent_still_unblocks_children() {
    let h = Harness::new();
    h.store
        .upsert(&aged(record(&page("acme")), Duration::from_secs(900)))
        .await
        .unwrap();
    h.fetcher.fail(EntityKind::Page, "acme");
    h.fetcher.put_children(EntityKind::Post, "acme", posts("acme", 3));

    let read = h.hierarchy.read_posts("acme", ReadOptions::default()).await;
    assert_source(&read, ReadSource::Fetched);
}

#[tokio::test]
async fn forced_child_does_not_force_parent() {
    let h = Harness::new();
    h.store.upsert(&record(&page("acme"))).await.unwrap();
    h.fetcher.put(record(&page("acme")));
    h.fetcher.put_children(EntityKind::Post, "acme", posts("acme", 2));

    h.hierarchy
        .read_posts("acme", ReadOptions::forced())
        .await
        .expect("forced listing");
    assert_eq!(h.fetcher.calls_for(EntityKind::Page, "acme"), 0);
    assert_eq!(h.fetcher.calls_for(EntityKind::Post, "acme"), 1);

    h.hierarchy
        .read_posts("acme", ReadOptions::forced().with_cascade(true))
        .await
        .expect("cascading listing");
    assert_eq!(h.fetcher.calls_for(EntityKind::Page, "acme"), 1);
    assert_eq!(h.fetcher.calls_for(EntityKind::Post, "acme"), 2);
}

#[tokio::test]
async fn configured_cascade_applies_when_unset() {
    let h = Harness::with_config(OrchestratorConfig::default().with_cascade_force(true));
    h.store.upsert(&record(&page("acme"))).await.unwrap();
    h.fetcher.put(record(&page("acme")));

    h.hierarchy
        .read_employees("acme", ReadOptions::forced())
        .await
        .expect("forced listing");
    assert_eq!(h.fetcher.calls_for(EntityKind::Page, "acme"), 1);

    h.hierarchy
        .read_employees("acme", ReadOptions::forced().with_cascade(false))
        .await
        .expect("non-cascading listing");
    assert_eq!(h.fetcher.calls_for(EntityKind::Page, "acme"), 1);
}

#[tokio::test]
async fn read_with_parent_resolves_parent_first() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));
    h.fetcher.put(record(&employee("u1", "acme")));

    let read = h
        .hierarchy
        .read_with_parent(
            EntityKind::Employee,
            "u1",
            EntityKind::Page,
            "acme",
            ReadOptions::default(),
        )
        .await;
    assert_source(&read, ReadSource::Fetched);
    assert_eq!(h.fetcher.calls_for(EntityKind::Page, "acme"), 1);
}

#[tokio::test]
async fn read_with_parent_rejects_child_of_another_parent() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));
    h.fetcher.put(record(&page("globex")));
    h.fetcher.put(record(&employee("u1", "globex")));

    let read = h
        .hierarchy
        .read_with_parent(
            EntityKind::Employee,
            "u1",
            EntityKind::Page,
            "acme",
            ReadOptions::default(),
        )
        .await;
    assert_read_error(&read, "not_found");

    let owned = h
        .hierarchy
        .read_with_parent(
            EntityKind::Employee,
            "u1",
            EntityKind::Page,
            "globex",
            ReadOptions::default(),
        )
        .await;
    assert_source(&owned, ReadSource::Cache);

    let wrong_kind = h
        .hierarchy
        .read_with_parent(
            EntityKind::Employee,
            "u1",
            EntityKind::Post,
            "globex",
            ReadOptions::default(),
        )
        .await;
    assert_read_error(&wrong_kind, "not_found");
}

// ============================================================================
// CHILD LISTINGS
// ============================================================================

#[tokio::test]
async fn listing_is_capped_ordered_and_cached() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));
    h.fetcher.put_children(EntityKind::Post, "acme", posts("acme", 20));

    let read = h
        .hierarchy
        .read_posts("acme", ReadOptions::default())
        .await
        .expect("listing");
    assert_eq!(read.source(), ReadSource::Fetched);
    assert_eq!(read.value().len(), 15);
    // Newest first.
    let published: Vec<_> = read
        .value()
        .iter()
        .map(|r| r.field("published_at").cloned())
        .collect();
    let mut sorted = published.clone();
    sorted.sort_by(|a, b| b.as_ref().map(|v| v.to_string()).cmp(&a.as_ref().map(|v| v.to_string())));
    assert_eq!(published, sorted);

    let again = h.hierarchy.read_posts("acme", ReadOptions::default()).await;
    assert_source(&again, ReadSource::Cache);
    assert_eq!(h.fetcher.calls_for(EntityKind::Post, "acme"), 1);
}

#[tokio::test]
async fn empty_listing_is_valid() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));

    let read = h
        .hierarchy
        .read_employees("acme", ReadOptions::default())
        .await
        .expect("empty listing");
    assert!(read.value().is_empty());
    let again = h.hierarchy.read_employees("acme", ReadOptions::default()).await;
    assert_source(&again, ReadSource::Cache);
}

#[tokio::test]
async fn departed_child_does_not_keep_listing_stale() {
    let h = Harness::new();
    h.store.upsert(&record(&page("acme"))).await.unwrap();
    for e in [employee("u1", "acme"), employee("u2", "acme")] {
        h.store
            .upsert(&aged(record(&e), Duration::from_secs(900)))
            .await
            .unwrap();
    }
    // u2 has left; the source only lists u1.
    h.fetcher
        .put_children(EntityKind::Employee, "acme", vec![record(&employee("u1", "acme"))]);

    let first = h
        .hierarchy
        .read_employees("acme", ReadOptions::default())
        .await
        .expect("listing");
    assert_eq!(first.source(), ReadSource::Fetched);
    assert!(!first.is_stale());
    let keys: Vec<_> = first.value().iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["u1"]);

    for _ in 0..2 {
        let again = h.hierarchy.read_employees("acme", ReadOptions::default()).await;
        assert_source(&again, ReadSource::Cache);
        assert_eq!(again.as_ref().map(|r| r.value().len()).ok(), Some(1));
    }
    assert_eq!(h.fetcher.calls_for(EntityKind::Employee, "acme"), 1);
}

#[tokio::test]
async fn single_comment_read_clears_unresolvable_parent() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));
    h.fetcher.put(record(&post("p1", "acme", 0)));
    h.fetcher.put(record(&comment("selfish", "p1", Some("selfish"))));
    h.fetcher.put(record(&comment("orphan", "p1", Some("missing"))));

    for key in ["selfish", "orphan"] {
        let read = h
            .hierarchy
            .read(EntityKind::Comment, key, ReadOptions::default())
            .await
            .expect("comment");
        assert_eq!(read.value().field("parent_comment_id"), Some(&serde_json::Value::Null));

        let stored = h
            .store
            .get_by_key(EntityKind::Comment, key)
            .await
            .unwrap()
            .expect("comment stored");
        assert_eq!(stored.field("parent_comment_id"), Some(&serde_json::Value::Null));
    }
}

#[tokio::test]
async fn single_comment_read_does_not_close_a_cycle() {
    let h = Harness::new();
    h.store.upsert(&record(&page("acme"))).await.unwrap();
    h.store.upsert(&record(&post("p1", "acme", 0))).await.unwrap();
    h.store
        .upsert(&record(&comment("c1", "p1", None)))
        .await
        .unwrap();
    h.store
        .upsert(&record(&comment("c2", "p1", Some("c1"))))
        .await
        .unwrap();
    // The source now claims c1 answers c2.
    h.fetcher.put(record(&comment("c1", "p1", Some("c2"))));

    h.hierarchy
        .read(EntityKind::Comment, "c1", ReadOptions::forced())
        .await
        .expect("comment");
    let stored = h
        .store
        .get_by_key(EntityKind::Comment, "c1")
        .await
        .unwrap()
        .expect("c1 stored");
    assert_eq!(stored.field("parent_comment_id"), Some(&serde_json::Value::Null));

    let chain = h.hierarchy.reply_chain("c2").await.expect("chain");
    let keys: Vec<_> = chain.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["c2", "c1"]);
}

#[tokio::test]
async fn comments_are_written_parents_first_and_repaired() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));
    h.fetcher.put(record(&post("p1", "acme", 0)));
    h.fetcher.put_children(
        EntityKind::Comment,
        "p1",
        vec![
            record(&comment("c3", "p1", Some("c2"))),
            record(&comment("c2", "p1", Some("c1"))),
            record(&comment("c1", "p1", None)),
            record(&comment("orphan", "p1", Some("missing"))),
        ],
    );

    let read = h
        .hierarchy
        .read_comments("p1", ReadOptions::default())
        .await
        .expect("comments");
    assert_eq!(read.value().len(), 4);
    // The post was resolved, and with it its page.
    assert!(h.store.get_by_key(EntityKind::Post, "p1").await.unwrap().is_some());

    let orphan = h
        .store
        .get_by_key(EntityKind::Comment, "orphan")
        .await
        .unwrap()
        .expect("orphan stored");
    assert_eq!(orphan.field("parent_comment_id"), Some(&serde_json::Value::Null));

    let chain = h.hierarchy.reply_chain("c3").await.expect("chain");
    let keys: Vec<_> = chain.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["c3", "c2", "c1"]);
}

#[tokio::test]
async fn stale_listing_served_when_refresh_fails() {
    let h = Harness::new();
    h.store.upsert(&record(&page("acme"))).await.unwrap();
    for p in posts("acme", 3) {
        h.store
            .upsert(&aged(p, Duration::from_secs(900)))
            .await
            .unwrap();
    }
    h.fetcher.fail(EntityKind::Post, "acme");

    let read = h
        .hierarchy
        .read_posts("acme", ReadOptions::default())
        .await
        .expect("stale listing");
    assert!(read.is_stale());
    assert_eq!(read.value().len(), 3);

    let forced = h.hierarchy.read_posts("acme", ReadOptions::forced()).await;
    assert_read_error(&forced, "fetch_failed");
}

#[tokio::test]
async fn page_tree_refresh_counts_each_kind() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));
    let page_posts = posts("acme", 2);
    let first_post = page_posts[0].key.clone();
    let second_post = page_posts[1].key.clone();
    h.fetcher.put_children(EntityKind::Post, "acme", page_posts);
    h.fetcher
        .put_children(EntityKind::Employee, "acme", vec![record(&employee("u1", "acme"))]);
    h.fetcher.put_children(
        EntityKind::Comment,
        &first_post,
        vec![
            record(&comment("c1", &first_post, None)),
            record(&comment("c2", &first_post, Some("c1"))),
        ],
    );
    h.fetcher.fail(EntityKind::Comment, &second_post);

    let report = h.hierarchy.refresh_page_tree("acme").await.expect("report");
    assert_eq!(report.posts, 2);
    assert_eq!(report.employees, 1);
    assert_eq!(report.comments, 2);
    assert_eq!(report.comment_failures, 1);
}

// ============================================================================
// PAGINATION
// ============================================================================

#[tokio::test]
async fn pagination_windows_report_total() {
    let h = Harness::new();
    for p in posts("p1", 25) {
        h.store.upsert(&p).await.unwrap();
    }
    for p in posts("other", 4) {
        h.store.upsert(&p).await.unwrap();
    }
    let engine = h.query_engine();
    let filters = BTreeMap::from([("page_id".to_string(), "p1".to_string())]);

    let third = engine
        .query(EntityKind::Post, &filters, 3, Some(10))
        .await
        .unwrap();
    assert_eq!(third.items.len(), 5);
    assert_eq!(third.total, 25);
    assert_eq!(third.pages, 3);

    let tenth = engine
        .query(EntityKind::Post, &filters, 10, Some(10))
        .await
        .unwrap();
    assert!(tenth.items.is_empty());
    assert_eq!(tenth.total, 25);

    // Unchanged data, identical pages.
    let again = engine
        .query(EntityKind::Post, &filters, 3, Some(10))
        .await
        .unwrap();
    assert_eq!(again, third);
    assert_eq!(h.fetcher.calls(), 0);
}

#[tokio::test]
async fn replies_are_queried_by_parent_comment() {
    let h = Harness::new();
    for c in [
        comment("root", "p1", None),
        comment("r1", "p1", Some("root")),
        comment("r2", "p1", Some("root")),
        comment("rr", "p1", Some("r1")),
    ] {
        h.store.upsert(&record(&c)).await.unwrap();
    }
    let thread = h.query_engine().thread("root", 1, None).await.unwrap();
    let keys: Vec<_> = thread.items.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["r1", "r2"]);
    assert_eq!(thread.total, 2);
}

// ============================================================================
// SUMMARIES
// ============================================================================

#[tokio::test]
async fn summary_regenerates_when_snapshot_changes() {
    let h = Harness::new();
    h.store.upsert(&record(&page("acme"))).await.unwrap();
    for p in posts("acme", 3) {
        h.store.upsert(&p).await.unwrap();
    }

    let first = h
        .hierarchy
        .read_summary("acme", ReadOptions::default())
        .await
        .expect("summary");
    assert_eq!(first.source(), ReadSource::Fetched);
    assert_eq!(h.summarizer.calls(), 1);

    let cached = h.hierarchy.read_summary("acme", ReadOptions::default()).await;
    assert_source(&cached, ReadSource::Cache);
    assert_eq!(h.summarizer.calls(), 1);

    // A new post changes the snapshot while the summary is well within TTL.
    h.store
        .upsert(&record(&post("acme-post-99", "acme", 99)))
        .await
        .unwrap();
    let regenerated = h
        .hierarchy
        .read_summary("acme", ReadOptions::default())
        .await
        .expect("regenerated");
    assert_eq!(regenerated.source(), ReadSource::Fetched);
    assert_eq!(h.summarizer.calls(), 2);
    assert_ne!(
        regenerated.value().field("fingerprint"),
        first.value().field("fingerprint")
    );
}

#[tokio::test]
async fn summary_checks_fingerprint_of_current_page() {
    let h = Harness::new();
    let original = record(&page("acme"));
    h.store.upsert(&original).await.unwrap();

    h.controller
        .read_summary(&original, false)
        .await
        .expect("summary");
    let mut changed = page("acme");
    changed.follower_count += 1;
    let changed = record(&changed);
    h.controller
        .read_summary(&changed, false)
        .await
        .expect("regenerated");
    assert_eq!(h.summarizer.calls(), 2);

    // Same facts re-scraped later keep the fingerprint.
    let mut rescraped = changed.clone();
    rescraped.stamp(changed.refreshed_at + chrono::TimeDelta::seconds(30));
    let read = h.controller.read_summary(&rescraped, false).await;
    assert_source(&read, ReadSource::Cache);
    assert_eq!(h.summarizer.calls(), 2);
}

#[tokio::test]
async fn summary_failure_serves_previous_summary() {
    let h = Harness::new();
    let original = record(&page("acme"));
    h.store.upsert(&original).await.unwrap();
    h.controller
        .read_summary(&original, false)
        .await
        .expect("summary");

    h.summarizer.fail(true);
    let mut changed = page("acme");
    changed.name = "Acme Rebranded".to_string();
    let read = h
        .controller
        .read_summary(&record(&changed), false)
        .await
        .expect("stale summary");
    assert!(read.is_stale());

    let forced = h.controller.read_summary(&record(&changed), true).await;
    assert_read_error(&forced, "fetch_failed");
}
