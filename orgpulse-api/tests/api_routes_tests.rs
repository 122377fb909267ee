//! HTTP-level tests for the ORGPULSE API.
//!
//! Each test builds the full router over in-memory collaborators and drives
//! it with `oneshot`, checking status codes and response envelopes.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use orgpulse_api::{create_api_router, ApiConfig, AppState};
use orgpulse_test_utils::fixtures::{aged, comment, employee, page, posts, record};
use orgpulse_test_utils::{
    CacheAsideController, EntityKind, EntityStore, FailingStore, Harness, InMemoryCache,
    OrchestratorConfig, ScriptedFetcher,
};
use serde_json::Value;
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    let state = AppState::new(h.controller.clone(), h.cache.clone());
    create_api_router(state, &ApiConfig::default())
}

async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri).await
}

// ============================================================================
// SINGLE READS
// ============================================================================

#[tokio::test]
async fn page_read_returns_envelope_then_hits_cache() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));
    let app = app(&h);

    let (status, body) = get(&app, "/api/v1/pages/acme").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["page_id"], "acme");
    assert_eq!(body["stale"], false);
    assert_eq!(body["source"], "fetched");

    let (status, body) = get(&app, "/api/v1/pages/acme").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "cache");
    assert_eq!(h.fetcher.calls(), 1);
}

#[tokio::test]
async fn unknown_page_is_404() {
    let h = Harness::new();
    let (status, body) = get(&app(&h), "/api/v1/pages/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    assert_eq!(body["details"]["key"], "ghost");
}

#[tokio::test]
async fn expired_page_is_served_stale_when_scraper_fails() {
    let h = Harness::new();
    h.store
        .upsert(&aged(record(&page("acme")), Duration::from_secs(600)))
        .await
        .unwrap();
    h.fetcher.fail(EntityKind::Page, "acme");
    let app = app(&h);

    let (status, body) = get(&app, "/api/v1/pages/acme").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stale"], true);
    assert_eq!(body["source"], "stale_fallback");

    let (status, body) = get(&app, "/api/v1/pages/acme?force_refresh=true").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "FETCH_FAILED");
}

#[tokio::test]
async fn bad_read_flag_is_400() {
    let h = Harness::new();
    let (status, body) = get(&app(&h), "/api/v1/pages/acme?force_refresh=sometimes").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_FORMAT");
    assert_eq!(h.fetcher.calls(), 0);
}

// ============================================================================
// CHILD READS
// ============================================================================

#[tokio::test]
async fn page_posts_are_read_after_the_page() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));
    h.fetcher.put_children(EntityKind::Post, "acme", posts("acme", 3));
    let app = app(&h);

    let (status, body) = get(&app, "/api/v1/pages/acme/posts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(3));
    assert_eq!(body["stale"], false);
    assert_eq!(h.fetcher.calls_for(EntityKind::Page, "acme"), 1);
}

#[tokio::test]
async fn children_of_unresolvable_page_are_424() {
    let h = Harness::new();
    h.fetcher
        .put_children(EntityKind::Employee, "ghost", vec![record(&employee("e1", "ghost"))]);

    let (status, body) = get(&app(&h), "/api/v1/pages/ghost/employees").await;
    assert_eq!(status, StatusCode::FAILED_DEPENDENCY);
    assert_eq!(body["code"], "PARENT_UNRESOLVED");
    assert_eq!(body["details"]["parent_key"], "ghost");
    assert_eq!(h.fetcher.calls_for(EntityKind::Employee, "ghost"), 0);
}

#[tokio::test]
async fn refresh_reports_counts() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));
    h.fetcher.put_children(EntityKind::Post, "acme", posts("acme", 2));
    h.fetcher
        .put_children(EntityKind::Employee, "acme", vec![record(&employee("e1", "acme"))]);
    h.fetcher.put_children(
        EntityKind::Comment,
        "acme-post-00",
        vec![record(&comment("c1", "acme-post-00", None))],
    );

    let (status, body) = send(&app(&h), Method::POST, "/api/v1/pages/acme/refresh").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["page_id"], "acme");
    assert_eq!(body["posts"], 2);
    assert_eq!(body["employees"], 1);
    assert_eq!(body["comments"], 1);
    assert_eq!(body["comment_failures"], 0);
}

#[tokio::test]
async fn single_employee_read_stores_its_page_first() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));
    h.fetcher.put(record(&employee("e1", "acme")));

    let (status, body) = get(&app(&h), "/api/v1/employees/e1?force_scrape=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["company_page_id"], "acme");
    assert_eq!(body["source"], "fetched");
    assert!(h
        .store
        .get_by_key(EntityKind::Page, "acme")
        .await
        .unwrap()
        .is_some());
}

// ============================================================================
// LISTINGS
// ============================================================================

async fn seed_posts(h: &Harness, page_key: &str, n: usize) {
    for post in posts(page_key, n) {
        h.store.upsert(&post).await.unwrap();
    }
}

#[tokio::test]
async fn post_listing_paginates_with_total() {
    let h = Harness::new();
    seed_posts(&h, "p1", 25).await;
    seed_posts(&h, "p2", 4).await;
    let app = app(&h);

    let (status, body) = get(&app, "/api/v1/posts?page_id=p1&page=3&page_size=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().map(Vec::len), Some(5));
    assert_eq!(body["total"], 25);
    assert_eq!(body["page"], 3);
    assert_eq!(body["page_size"], 10);
    assert_eq!(body["pages"], 3);

    let (_, body) = get(&app, "/api/v1/posts?page_id=p1&page=10&page_size=10").await;
    assert_eq!(body["items"].as_array().map(Vec::len), Some(0));
    assert_eq!(body["total"], 25);
    assert_eq!(h.fetcher.calls(), 0);
}

#[tokio::test]
async fn unknown_filters_are_ignored() {
    let h = Harness::new();
    seed_posts(&h, "p1", 3).await;

    let (status, body) = get(&app(&h), "/api/v1/posts?colour=blue").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
}

#[tokio::test]
async fn non_numeric_page_is_400() {
    let h = Harness::new();
    let (status, body) = get(&app(&h), "/api/v1/employees?page=first").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_FORMAT");
}

// ============================================================================
// COMMENT THREADS
// ============================================================================

#[tokio::test]
async fn reply_chain_and_replies() {
    let h = Harness::new();
    for c in [
        comment("c1", "p1", None),
        comment("c2", "p1", Some("c1")),
        comment("c3", "p1", Some("c2")),
        comment("c4", "p1", Some("c1")),
    ] {
        h.store.upsert(&record(&c)).await.unwrap();
    }
    let app = app(&h);

    let (status, body) = get(&app, "/api/v1/comments/c3/chain").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["depth"], 2);
    assert_eq!(body["items"][0]["comment_id"], "c3");
    assert_eq!(body["items"][2]["comment_id"], "c1");

    let (status, body) = get(&app, "/api/v1/comments/c1/replies").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let (status, _) = get(&app, "/api/v1/comments/missing/chain").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// SUMMARIES
// ============================================================================

#[tokio::test]
async fn summary_is_generated_once_then_reused() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));
    h.fetcher.put_children(EntityKind::Post, "acme", posts("acme", 2));
    let app = app(&h);

    let (status, body) = get(&app, "/api/v1/ai/summary/acme").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["page_id"], "acme");
    assert_eq!(body["data"]["model"], "scripted");

    let (status, _) = get(&app, "/api/v1/ai/summary/acme").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.summarizer.calls(), 1);
}

#[tokio::test]
async fn summary_without_summarizer_is_503() {
    let fetcher = ScriptedFetcher::shared();
    fetcher.put(record(&page("acme")));
    let cache = Arc::new(InMemoryCache::new());
    let controller = CacheAsideController::new(
        Arc::new(orgpulse_test_utils::InMemoryEntityStore::new()),
        cache.clone(),
        fetcher.clone(),
        None,
        OrchestratorConfig::default(),
    );
    let app = create_api_router(AppState::new(controller, cache), &ApiConfig::default());

    let (status, body) = get(&app, "/api/v1/ai/summary/acme").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "SUMMARIZER_UNAVAILABLE");
    assert_eq!(fetcher.calls(), 0);
}

// ============================================================================
// HEALTH, METRICS, FALLBACK
// ============================================================================

#[tokio::test]
async fn health_reports_components() {
    let h = Harness::new();
    let (status, body) = get(&app(&h), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["details"]["store"]["status"], "healthy");
    assert_eq!(body["details"]["summarizer_configured"], true);

    let (status, body) = get(&app(&h), "/health/live").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn health_is_503_when_store_fails() {
    let cache = Arc::new(InMemoryCache::new());
    let controller = CacheAsideController::new(
        Arc::new(FailingStore),
        cache.clone(),
        ScriptedFetcher::shared(),
        None,
        OrchestratorConfig::default(),
    );
    let app = create_api_router(AppState::new(controller, cache), &ApiConfig::default());

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert!(body["details"]["store"]["error"].is_string());
}

#[tokio::test]
async fn failing_store_read_is_503() {
    let fetcher = ScriptedFetcher::shared();
    fetcher.put(record(&page("acme")));
    let cache = Arc::new(InMemoryCache::new());
    let controller = CacheAsideController::new(
        Arc::new(FailingStore),
        cache.clone(),
        fetcher,
        None,
        OrchestratorConfig::default(),
    );
    let app = create_api_router(AppState::new(controller, cache), &ApiConfig::default());

    let (status, body) = get(&app, "/api/v1/pages/acme").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "STORE_UNAVAILABLE");
}

#[tokio::test]
async fn metrics_expose_orchestrator_counters() {
    let h = Harness::new();
    h.fetcher.put(record(&page("acme")));
    let app = app(&h);
    get(&app, "/api/v1/pages/acme").await;

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("orgpulse_orchestrator"));
    assert!(text.contains("orgpulse_http_requests_total"));
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let h = Harness::new();
    let (status, body) = get(&app(&h), "/api/v2/pages").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}
