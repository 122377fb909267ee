//! Employee REST API Routes
//!
//! Per-page employee reads live under `/pages/:id/employees`.

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

/// GET /api/v1/employees - Filtered employee listing
pub async fn list_employees(
    State(state): State<AppState>,
    Query(query): Query<QueryMap>,
) -> ApiResult<Json<ListResponse>> {
    let params = ListParams::from_query(query)?;
    let page = state
        .queries
        .query(EntityKind::Employee, &params.filters, params.page, params.page_size)
        .await?;
    Ok(Json(page.into()))
}

/// GET /api/v1/employees/:id - Read one employee; its page is stored first
pub async fn get_employee(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<QueryMap>,
) -> ApiResult<Json<ReadResponse<Value>>> {
    validate_key("user_id", &id)?;
    let params = ReadParams::from_query(&query)?;
    let read = state
        .hierarchy
        .read(EntityKind::Employee, &id, params.options())
        .await?;
    Ok(Json(ReadResponse::from_record(read)))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_employees))
        .route("/:id", get(get_employee))
}
