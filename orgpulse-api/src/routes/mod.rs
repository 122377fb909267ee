//! REST API Route Handlers
//!
//! Read endpoints answer through the hierarchical fetcher and the
//! cache-aside controller; list endpoints query the store directly.
//!
//! Route modules:
//! - pages: page reads, child listings and bulk refresh
//! - posts: post reads and comment listings
//! - employees: employee listing
//! - comments: comment listing, reply chains and threads
//! - ai: page summaries
//! - health: liveness and readiness

pub mod ai;
pub mod comments;
pub mod employees;
pub mod health;
pub mod pages;
pub mod posts;

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn,
    routing::get,
    Router,
};
use orgpulse_core::{Record, Timestamp};
use orgpulse_storage::{QueryPage, Read, ReadOptions, ReadSource};
use serde::Serialize;
use serde_json::Value;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

/// Longest entity key accepted in a path.
pub const MAX_KEY_LEN: usize = 256;

// ============================================================================
// SHARED REQUEST TYPES
// ============================================================================

/// Raw query string of a request.
pub type QueryMap = BTreeMap<String, String>;

/// Accepted spellings of the force flag.
const FORCE_FLAGS: [&str; 3] = ["force_refresh", "force_scrape", "force_generate"];

/// `force_refresh` and `cascade` flags of a read endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadParams {
    pub force_refresh: bool,
    pub cascade: Option<bool>,
}

impl ReadParams {
    pub fn from_query(query: &QueryMap) -> ApiResult<Self> {
        let mut force_refresh = false;
        for flag in FORCE_FLAGS {
            force_refresh |= parse_flag(query, flag)?.unwrap_or(false);
        }
        Ok(Self {
            force_refresh,
            cascade: parse_flag(query, "cascade")?,
        })
    }

    pub fn options(&self) -> ReadOptions {
        ReadOptions {
            force: self.force_refresh,
            cascade_force: self.cascade,
        }
    }
}

/// Pagination plus the remaining parameters, which are handed to the
/// filter builder as-is. `limit` is read as `page_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    pub page: i64,
    pub page_size: Option<i64>,
    pub filters: QueryMap,
}

impl ListParams {
    pub fn from_query(mut query: QueryMap) -> ApiResult<Self> {
        let page = match query.remove("page") {
            Some(raw) => parse_int("page", &raw)?,
            None => 1,
        };
        let limit = query.remove("limit");
        let page_size = query
            .remove("page_size")
            .or(limit)
            .map(|raw| parse_int("page_size", &raw))
            .transpose()?;
        Ok(Self {
            page,
            page_size,
            filters: query,
        })
    }
}

fn parse_int(field: &str, raw: &str) -> ApiResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ApiError::invalid_format(field, "integer"))
}

fn parse_flag(query: &QueryMap, field: &str) -> ApiResult<Option<bool>> {
    let Some(raw) = query.get(field) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" | "" => Ok(Some(false)),
        _ => Err(ApiError::invalid_format(field, "boolean")),
    }
}

/// Reject blank and oversized path keys before they reach the store.
pub fn validate_key(field: &str, key: &str) -> ApiResult<()> {
    if key.trim().is_empty() {
        return Err(ApiError::invalid_input(format!("{} must not be empty", field)));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(ApiError::invalid_input(format!(
            "{} must be at most {} characters",
            field, MAX_KEY_LEN
        )));
    }
    Ok(())
}

// ============================================================================
// SHARED RESPONSE TYPES
// ============================================================================

/// Envelope of single and child reads.
#[derive(Debug, Clone, Serialize)]
pub struct ReadResponse<T> {
    pub data: T,
    pub stale: bool,
    pub source: ReadSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<Timestamp>,
}

impl ReadResponse<Value> {
    pub fn from_record(read: Read<Record>) -> Self {
        let (stale, source, refreshed_at) = (read.is_stale(), read.source(), read.refreshed_at());
        Self {
            data: read.into_value().body,
            stale,
            source,
            refreshed_at,
        }
    }
}

impl ReadResponse<Vec<Value>> {
    pub fn from_records(read: Read<Vec<Record>>) -> Self {
        let (stale, source, refreshed_at) = (read.is_stale(), read.source(), read.refreshed_at());
        Self {
            data: read.into_value().into_iter().map(|r| r.body).collect(),
            stale,
            source,
            refreshed_at,
        }
    }
}

/// One page of a filtered listing.
#[derive(Debug, Clone, Serialize)]
pub struct ListResponse {
    pub items: Vec<Value>,
    pub total: usize,
    pub page: i64,
    pub page_size: usize,
    pub pages: usize,
}

impl From<QueryPage> for ListResponse {
    fn from(page: QueryPage) -> Self {
        Self {
            items: page.items.into_iter().map(|r| r.body).collect(),
            total: page.total,
            page: page.page,
            page_size: page.page_size,
            pages: page.pages,
        }
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Build CORS layer from configuration.
///
/// Empty origin list allows any origin.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

/// JSON 404 for paths no route matches.
async fn route_not_found() -> ApiError {
    ApiError::not_found("No route for this path")
}

/// Create the complete API router.
///
/// - Entity reads and listings under /api/v1/*
/// - Summaries at /api/v1/ai/summary/:page_id
/// - Health checks at /health and /health/live
/// - Metrics at /metrics
pub fn create_api_router(state: AppState, config: &ApiConfig) -> Router {
    let api_routes = Router::new()
        .nest("/pages", pages::create_router())
        .nest("/posts", posts::create_router())
        .nest("/employees", employees::create_router())
        .nest("/comments", comments::create_router())
        .nest("/ai", ai::create_router());

    Router::new()
        .nest("/api/v1", api_routes)
        .merge(health::create_router())
        .route("/metrics", get(metrics_handler))
        .fallback(route_not_found)
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(config.max_concurrent_requests.max(1)))
        .layer(build_cors_layer(config))
        .with_state(state)
}
