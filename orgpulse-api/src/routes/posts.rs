//! Post REST API Routes

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use orgpulse_core::EntityKind;
use serde_json::Value;

use super::{validate_key, ListParams, ListResponse, QueryMap, ReadParams, ReadResponse};
use crate::error::ApiResult;
use crate::state::AppState;

/// GET /api/v1/posts - Filtered post listing
pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<QueryMap>,
) -> ApiResult<Json<ListResponse>> {
    let params = ListParams::from_query(query)?;
    let page = state
        .queries
        .query(EntityKind::Post, &params.filters, params.page, params.page_size)
        .await?;
    Ok(Json(page.into()))
}

/// GET /api/v1/posts/:id - Read one post; its page is stored first
pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<QueryMap>,
) -> ApiResult<Json<ReadResponse<Value>>> {
    validate_key("post_id", &id)?;
    let params = ReadParams::from_query(&query)?;
    let read = state
        .hierarchy
        .read(EntityKind::Post, &id, params.options())
        .await?;
    Ok(Json(ReadResponse::from_record(read)))
}

/// GET /api/v1/posts/:id/comments - Comments of a post, threads repaired
pub async fn get_post_comments(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<QueryMap>,
) -> ApiResult<Json<ReadResponse<Vec<Value>>>> {
    validate_key("post_id", &id)?;
    let params = ReadParams::from_query(&query)?;
    let read = state.hierarchy.read_comments(&id, params.options()).await?;
    Ok(Json(ReadResponse::from_records(read)))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_posts))
        .route("/:id", get(get_post))
        .route("/:id/comments", get(get_post_comments))
}
