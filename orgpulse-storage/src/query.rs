//! Pagination and filtering over the entity store.
//!
//! Request parameters arrive as raw strings. Each kind has an allow-list of
//! recognized parameters; anything else is ignored. Listings are read
//! straight from the store and never cached.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use orgpulse_core::{
    EntityKind, FilterExpr, FilterValue, Industry, OrchestratorConfig, Record, SortField,
    StoreError, StoreQuery, Timestamp,
};
use serde::Serialize;
use tracing::debug;

use crate::traits::EntityStore;

const INDUSTRIES: [Industry; 10] = [
    Industry::Technology,
    Industry::Finance,
    Industry::Healthcare,
    Industry::Education,
    Industry::Retail,
    Industry::Manufacturing,
    Industry::Consulting,
    Industry::Media,
    Industry::Marketing,
    Industry::Other,
];

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPage {
    pub items: Vec<Record>,
    /// Matching records across all pages.
    pub total: usize,
    pub page: i64,
    pub page_size: usize,
    /// Number of pages, `ceil(total / page_size)`.
    pub pages: usize,
}

/// Default ordering of each kind's listings. Stores break ties by key.
pub fn listing_order(kind: EntityKind) -> Vec<SortField> {
    match kind {
        EntityKind::Page | EntityKind::Employee => vec![SortField::asc("name")],
        EntityKind::Post => vec![SortField::desc("published_at")],
        EntityKind::Comment => vec![SortField::asc("published_at")],
        EntityKind::AiSummary => vec![SortField::desc("generated_at")],
    }
}

/// Translate request parameters into store filters.
///
/// | kind | parameter | filter |
/// |---|---|---|
/// | page | `name` | name contains |
/// | page | `industry` | industry equals (case-insensitive name) |
/// | page | `min_followers`, `max_followers` | follower count range |
/// | post | `page_id`, `post_type` | equals |
/// | post | `min_reactions` | total reactions at least |
/// | post | `from_date`, `to_date` | publish time range (RFC 3339 or `YYYY-MM-DD`) |
/// | employee | `company_page_id` | equals |
/// | employee | `name` | name contains |
/// | comment | `post_id`, `user_id`, `parent_comment_id` | equals |
pub fn build_filters(kind: EntityKind, params: &BTreeMap<String, String>) -> Vec<FilterExpr> {
    let mut filters = Vec::new();
    for (name, raw) in params {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        match parse_filter(kind, name, raw) {
            Some(Some(filter)) => filters.push(filter),
            Some(None) => debug!(kind = %kind, param = %name, value = %raw, "Ignoring unparsable filter value"),
            None => debug!(kind = %kind, param = %name, "Ignoring unknown filter"),
        }
    }
    filters
}

/// `None` for unknown parameters, `Some(None)` for unparsable values.
fn parse_filter(kind: EntityKind, name: &str, raw: &str) -> Option<Option<FilterExpr>> {
    let text = |field: &str| Some(FilterExpr::eq(field, FilterValue::Text(raw.to_string())));
    let filter = match (kind, name) {
        (EntityKind::Page, "name") | (EntityKind::Employee, "name") => {
            Some(FilterExpr::contains("name", raw))
        }
        (EntityKind::Page, "industry") => Some(FilterExpr::eq(
            "industry",
            FilterValue::Text(canonical_industry(raw)),
        )),
        (EntityKind::Page, "min_followers") => {
            integer(raw).map(|n| FilterExpr::gte("follower_count", n))
        }
        (EntityKind::Page, "max_followers") => {
            integer(raw).map(|n| FilterExpr::lte("follower_count", n))
        }
        (EntityKind::Post, "page_id") => text("page_id"),
        (EntityKind::Post, "post_type") => Some(FilterExpr::eq(
            "post_type",
            FilterValue::Text(raw.to_lowercase()),
        )),
        (EntityKind::Post, "min_reactions") => {
            integer(raw).map(|n| FilterExpr::gte("reactions.total_count", n))
        }
        (EntityKind::Post, "from_date") => timestamp(raw, false)
            .map(|t| FilterExpr::gte("published_at", FilterValue::Timestamp(t))),
        (EntityKind::Post, "to_date") => timestamp(raw, true)
            .map(|t| FilterExpr::lte("published_at", FilterValue::Timestamp(t))),
        (EntityKind::Employee, "company_page_id") => text("company_page_id"),
        (EntityKind::Comment, "post_id") => text("post_id"),
        (EntityKind::Comment, "user_id") => text("author_id"),
        (EntityKind::Comment, "parent_comment_id") => text("parent_comment_id"),
        _ => return None,
    };
    Some(filter)
}

fn integer(raw: &str) -> Option<FilterValue> {
    raw.parse::<i64>().ok().map(FilterValue::Integer)
}

/// Parse an RFC 3339 instant or a bare date. A bare upper bound covers the
/// whole day.
fn timestamp(raw: &str, end_of_day: bool) -> Option<Timestamp> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)?
    } else {
        NaiveTime::MIN
    };
    Some(date.and_time(time).and_utc())
}

fn canonical_industry(raw: &str) -> String {
    INDUSTRIES
        .iter()
        .find(|i| i.as_str().eq_ignore_ascii_case(raw))
        .map(|i| i.as_str().to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// Offset and limit of a 1-based page. Pages below 1 select nothing.
pub fn page_window(page: i64, page_size: usize) -> (usize, usize) {
    if page < 1 {
        return (0, 0);
    }
    let skipped = usize::try_from(page - 1).unwrap_or(usize::MAX);
    (skipped.saturating_mul(page_size), page_size)
}

/// Filtered, paginated listings.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn EntityStore>,
    config: OrchestratorConfig,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn EntityStore>, config: OrchestratorConfig) -> Self {
        Self { store, config }
    }

    /// Requested page size clamped to `1..=max_page_size`.
    pub fn clamp_page_size(&self, requested: Option<i64>) -> usize {
        let max = self.config.max_page_size.max(1);
        match requested {
            None => self.config.default_page_size.clamp(1, max),
            Some(n) if n < 1 => 1,
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX).min(max),
        }
    }

    /// Run a filtered query and return one page of it.
    ///
    /// Pages outside `1..=pages` come back empty with the correct total.
    pub async fn query(
        &self,
        kind: EntityKind,
        params: &BTreeMap<String, String>,
        page: i64,
        page_size: Option<i64>,
    ) -> Result<QueryPage, StoreError> {
        let filters = build_filters(kind, params);
        self.run(kind, filters, page, page_size).await
    }

    /// Direct replies to a comment, oldest first.
    pub async fn thread(
        &self,
        comment_key: &str,
        page: i64,
        page_size: Option<i64>,
    ) -> Result<QueryPage, StoreError> {
        let filters = vec![FilterExpr::eq(
            "parent_comment_id",
            FilterValue::Text(comment_key.to_string()),
        )];
        self.run(EntityKind::Comment, filters, page, page_size).await
    }

    async fn run(
        &self,
        kind: EntityKind,
        filters: Vec<FilterExpr>,
        page: i64,
        page_size: Option<i64>,
    ) -> Result<QueryPage, StoreError> {
        let page_size = self.clamp_page_size(page_size);
        let (offset, limit) = page_window(page, page_size);
        let mut query = listing_order(kind)
            .into_iter()
            .fold(StoreQuery::new(kind), StoreQuery::order_by)
            .window(offset, limit);
        query.filters = filters;

        let (items, total) = self.store.query_filtered(&query).await?;
        debug!(kind = %kind, page, page_size, total, returned = items.len(), "Query executed");
        Ok(QueryPage {
            items,
            total,
            page,
            page_size,
            pages: total.div_ceil(page_size),
        })
    }
}
