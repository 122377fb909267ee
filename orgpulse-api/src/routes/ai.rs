//! AI Summary Routes
//!
//! Summaries are generated on demand from the page and posts currently
//! known. Without a configured summarizer the endpoint answers 503.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde_json::Value;

use super::{validate_key, QueryMap, ReadParams, ReadResponse};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /api/v1/ai/summary/:page_id - Read or regenerate a page summary
pub async fn get_summary(
    State(state): State<AppState>,
    Path(page_id): Path<String>,
    Query(query): Query<QueryMap>,
) -> ApiResult<Json<ReadResponse<Value>>> {
    if !state.controller().has_summarizer() {
        return Err(ApiError::summarizer_unavailable());
    }
    validate_key("page_id", &page_id)?;
    let params = ReadParams::from_query(&query)?;
    let read = state
        .hierarchy
        .read_summary(&page_id, params.options())
        .await?;
    Ok(Json(ReadResponse::from_record(read)))
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/summary/:page_id", get(get_summary))
}
