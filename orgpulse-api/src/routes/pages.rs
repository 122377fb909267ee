//! Page REST API Routes
//!
//! Pages are roots of the hierarchy: reading a page never waits on anything
//! else, while its posts and employees are read only after the page itself
//! resolves.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use orgpulse_core::EntityKind;
use orgpulse_storage::RefreshReport;
use serde::Serialize;
use serde_json::Value;

use super::{validate_key, ListParams, ListResponse, QueryMap, ReadParams, ReadResponse};
use crate::error::ApiResult;
use crate::state::AppState;

// ============================================================================
// RESPONSE TYPES
// ============================================================================

/// Result of a full page refresh.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshResponse {
    pub page_id: String,
    #[serde(flatten)]
    pub report: RefreshReport,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /api/v1/pages - Filtered page listing
pub async fn list_pages(
    State(state): State<AppState>,
    Query(query): Query<QueryMap>,
) -> ApiResult<Json<ListResponse>> {
    let params = ListParams::from_query(query)?;
    let page = state
        .queries
        .query(EntityKind::Page, &params.filters, params.page, params.page_size)
        .await?;
    Ok(Json(page.into()))
}

/// GET /api/v1/pages/:id - Read one page
pub async fn get_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<QueryMap>,
) -> ApiResult<Json<ReadResponse<Value>>> {
    validate_key("page_id", &id)?;
    let params = ReadParams::from_query(&query)?;
    let read = state
        .hierarchy
        .read(EntityKind::Page, &id, params.options())
        .await?;
    Ok(Json(ReadResponse::from_record(read)))
}

/// GET /api/v1/pages/:id/posts - Posts of a page, newest first
pub async fn get_page_posts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<QueryMap>,
) -> ApiResult<Json<ReadResponse<Vec<Value>>>> {
    validate_key("page_id", &id)?;
    let params = ReadParams::from_query(&query)?;
    let read = state.hierarchy.read_posts(&id, params.options()).await?;
    Ok(Json(ReadResponse::from_records(read)))
}

/// GET /api/v1/pages/:id/employees - Employees of a page
pub async fn get_page_employees(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<QueryMap>,
) -> ApiResult<Json<ReadResponse<Vec<Value>>>> {
    validate_key("page_id", &id)?;
    let params = ReadParams::from_query(&query)?;
    let read = state.hierarchy.read_employees(&id, params.options()).await?;
    Ok(Json(ReadResponse::from_records(read)))
}

/// POST /api/v1/pages/:id/refresh - Force-refresh a page and everything under it
pub async fn refresh_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RefreshResponse>> {
    validate_key("page_id", &id)?;
    let report = state.hierarchy.refresh_page_tree(&id).await?;
    tracing::info!(
        page_id = %id,
        posts = report.posts,
        employees = report.employees,
        comments = report.comments,
        comment_failures = report.comment_failures,
        "Page tree refreshed"
    );
    Ok(Json(RefreshResponse {
        page_id: id,
        report,
    }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_pages))
        .route("/:id", get(get_page))
        .route("/:id/posts", get(get_page_posts))
        .route("/:id/employees", get(get_page_employees))
        .route("/:id/refresh", post(refresh_page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_response_is_flat() {
        let response = RefreshResponse {
            page_id: "acme".to_string(),
            report: RefreshReport {
                posts: 3,
                employees: 2,
                comments: 7,
                comment_failures: 1,
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["page_id"], "acme");
        assert_eq!(json["posts"], 3);
        assert_eq!(json["comment_failures"], 1);
    }
}
