//! Comment REST API Routes
//!
//! Single comments go through the regular read path. Reply chains and
//! threads are answered from stored comments only.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use orgpulse_core::EntityKind;
use serde::Serialize;
use serde_json::Value;

use super::{validate_key, ListParams, ListResponse, QueryMap, ReadParams, ReadResponse};
use crate::error::ApiResult;
use crate::state::AppState;

/// Ancestors of a comment, the comment itself first.
#[derive(Debug, Clone, Serialize)]
pub struct ChainResponse {
    pub comment_id: String,
    pub depth: usize,
    pub items: Vec<Value>,
}

/// GET /api/v1/comments - Filtered comment listing
pub async fn list_comments(
    State(state): State<AppState>,
    Query(query): Query<QueryMap>,
) -> ApiResult<Json<ListResponse>> {
    let params = ListParams::from_query(query)?;
    let page = state
        .queries
        .query(EntityKind::Comment, &params.filters, params.page, params.page_size)
        .await?;
    Ok(Json(page.into()))
}

/// GET /api/v1/comments/:id - Read one comment; its post is stored first
pub async fn get_comment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<QueryMap>,
) -> ApiResult<Json<ReadResponse<Value>>> {
    validate_key("comment_id", &id)?;
    let params = ReadParams::from_query(&query)?;
    let read = state
        .hierarchy
        .read(EntityKind::Comment, &id, params.options())
        .await?;
    Ok(Json(ReadResponse::from_record(read)))
}

/// GET /api/v1/comments/:id/chain - Walk from a comment up to its thread root
pub async fn get_reply_chain(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ChainResponse>> {
    validate_key("comment_id", &id)?;
    let chain = state.hierarchy.reply_chain(&id).await?;
    Ok(Json(ChainResponse {
        comment_id: id,
        depth: chain.len().saturating_sub(1),
        items: chain.into_iter().map(|r| r.body).collect(),
    }))
}

/// GET /api/v1/comments/:id/replies - Direct replies, oldest first
pub async fn get_replies(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<QueryMap>,
) -> ApiResult<Json<ListResponse>> {
    validate_key("comment_id", &id)?;
    let params = ListParams::from_query(query)?;
    let page = state
        .queries
        .thread(&id, params.page, params.page_size)
        .await?;
    Ok(Json(page.into()))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_comments))
        .route("/:id", get(get_comment))
        .route("/:id/chain", get(get_reply_chain))
        .route("/:id/replies", get(get_replies))
}
