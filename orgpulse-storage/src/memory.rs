//! In-memory entity store.
//!
//! Reference implementation of [`EntityStore`] used by tests and by the API
//! when no database is configured. Filters and ordering are evaluated against
//! the JSON body of each record.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgpulse_core::{
    EntityKind, FilterExpr, FilterOperator, FilterValue, Record, SortDirection, SortField,
    StoreError, StoreQuery,
};
use serde_json::Value;

use crate::traits::EntityStore;

type RecordMap = HashMap<(EntityKind, String), Record>;

/// In-memory store keyed by `(kind, key)`.
#[derive(Debug, Default, Clone)]
pub struct InMemoryEntityStore {
    records: Arc<RwLock<RecordMap>>,
}

impl InMemoryEntityStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records of one kind.
    pub fn count(&self, kind: EntityKind) -> Result<usize, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.keys().filter(|(k, _)| *k == kind).count())
    }

    /// Remove every record.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.records
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .clear();
        Ok(())
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get_by_key(&self, kind: EntityKind, key: &str) -> Result<Option<Record>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.get(&(kind, key.to_string())).cloned())
    }

    async fn upsert(&self, record: &Record) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        let slot = (record.kind, record.key.clone());
        if let Some(existing) = records.get(&slot) {
            if existing.refreshed_at > record.refreshed_at {
                tracing::debug!(kind = %record.kind, key = %record.key, "Skipping out-of-order upsert");
                return Ok(());
            }
        }
        records.insert(slot, record.clone());
        Ok(())
    }

    async fn query_filtered(&self, query: &StoreQuery) -> Result<(Vec<Record>, usize), StoreError> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut matched: Vec<&Record> = records
            .values()
            .filter(|r| r.kind == query.kind)
            .filter(|r| query.filters.iter().all(|f| matches(r, f)))
            .collect();

        matched.sort_by(|a, b| compare_records(a, b, &query.order));

        let total = matched.len();
        let window = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();
        Ok((window, total))
    }
}

// ============================================================================
// PREDICATE EVALUATION
// ============================================================================

/// Whether a record satisfies a filter. Missing fields never match.
pub fn matches(record: &Record, filter: &FilterExpr) -> bool {
    let Some(actual) = record.field(&filter.field) else {
        return false;
    };
    match (filter.operator, &filter.value) {
        (FilterOperator::Contains, FilterValue::Text(needle)) => actual
            .as_str()
            .map(|s| s.to_lowercase().contains(&needle.to_lowercase()))
            .unwrap_or(false),
        (FilterOperator::Contains, _) => false,
        (op, expected) => match compare_to(actual, expected) {
            Some(ord) => match op {
                FilterOperator::Eq => ord == Ordering::Equal,
                FilterOperator::Gte => ord != Ordering::Less,
                FilterOperator::Lte => ord != Ordering::Greater,
                FilterOperator::Contains => false,
            },
            None => false,
        },
    }
}

fn compare_to(actual: &Value, expected: &FilterValue) -> Option<Ordering> {
    match expected {
        FilterValue::Text(s) => actual.as_str().map(|a| a.cmp(s.as_str())),
        FilterValue::Integer(n) => actual
            .as_i64()
            .map(|a| a.cmp(n))
            .or_else(|| actual.as_f64().and_then(|a| a.partial_cmp(&(*n as f64)))),
        FilterValue::Timestamp(t) => parse_timestamp(actual).map(|a| a.cmp(t)),
        FilterValue::Bool(b) => actual.as_bool().map(|a| a.cmp(b)),
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Order two records by `order`, then by key.
pub fn compare_records(a: &Record, b: &Record, order: &[SortField]) -> Ordering {
    order
        .iter()
        .map(|sort| {
            let ord = compare_fields(a.field(&sort.field), b.field(&sort.field));
            match sort.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        })
        .find(|ord| *ord != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.key.cmp(&b.key))
}

/// Total order over optional JSON field values used for sorting.
///
/// Missing and null sort first. Timestamps compare chronologically, numbers
/// numerically, everything else by its string form.
pub fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            if let (Some(x), Some(y)) = (parse_timestamp(a), parse_timestamp(b)) {
                return x.cmp(&y);
            }
            if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            }
            match (a.as_str(), b.as_str()) {
                (Some(x), Some(y)) => x.cmp(y),
                _ => a.to_string().cmp(&b.to_string()),
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
