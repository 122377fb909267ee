//! PostgreSQL Entity Store
//!
//! Every entity lives in one `entities` table keyed by `(kind, key)` with
//! its JSON body in a JSONB column. Filters and sorts address dotted body
//! paths, translated into parameterized SQL by [`build_select`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use once_cell::sync::Lazy;
use orgpulse_core::{
    EntityKind, FilterExpr, FilterOperator, FilterValue, Record, SortDirection, SortField,
    StoreError, StoreQuery,
};
use orgpulse_storage::EntityStore;
use regex::Regex;
use std::time::Duration;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait for a pooled connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "orgpulse".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from `ORGPULSE_DB_*` variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("ORGPULSE_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("ORGPULSE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("ORGPULSE_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("ORGPULSE_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("ORGPULSE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("ORGPULSE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: Duration::from_secs(
                std::env::var("ORGPULSE_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> Result<Pool, StoreError> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: self.max_size,
            timeouts: deadpool_postgres::Timeouts {
                wait: Some(self.timeout),
                create: Some(self.timeout),
                recycle: Some(self.timeout),
            },
            ..Default::default()
        });

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Connection {
                reason: format!("Failed to create pool: {}", e),
            })
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entities (
    kind         TEXT        NOT NULL,
    key          TEXT        NOT NULL,
    parent_key   TEXT,
    refreshed_at TIMESTAMPTZ NOT NULL,
    body         JSONB       NOT NULL,
    PRIMARY KEY (kind, key)
);
CREATE INDEX IF NOT EXISTS entities_parent_idx ON entities (kind, parent_key);
";

const UPSERT: &str = "
INSERT INTO entities (kind, key, parent_key, refreshed_at, body)
VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (kind, key) DO UPDATE
SET parent_key = EXCLUDED.parent_key,
    refreshed_at = EXCLUDED.refreshed_at,
    body = EXCLUDED.body
WHERE entities.refreshed_at <= EXCLUDED.refreshed_at
";

const SELECT_ONE: &str =
    "SELECT kind, key, parent_key, refreshed_at, body FROM entities WHERE kind = $1 AND key = $2";

// ============================================================================
// SQL BUILDER
// ============================================================================

static FIELD_PATH: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*(\.[a-z_][a-z0-9_]*)*$").ok());

/// Owned query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
    Timestamp(DateTime<Utc>),
    Bool(bool),
}

impl SqlParam {
    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlParam::Text(v) => v,
            SqlParam::Integer(v) => v,
            SqlParam::Timestamp(v) => v,
            SqlParam::Bool(v) => v,
        }
    }
}

impl From<&FilterValue> for SqlParam {
    fn from(value: &FilterValue) -> Self {
        match value {
            FilterValue::Text(s) => SqlParam::Text(s.clone()),
            FilterValue::Integer(n) => SqlParam::Integer(*n),
            FilterValue::Timestamp(t) => SqlParam::Timestamp(*t),
            FilterValue::Bool(b) => SqlParam::Bool(*b),
        }
    }
}

/// A statement and its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl SqlQuery {
    fn param_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(SqlParam::as_sql).collect()
    }
}

/// `'{a,b}'` literal for a validated dotted path.
fn json_path(field: &str) -> Result<String, StoreError> {
    if !FIELD_PATH.as_ref().is_some_and(|re| re.is_match(field)) {
        return Err(StoreError::Query {
            reason: format!("invalid field path: {}", field),
        });
    }
    Ok(format!("'{{{}}}'", field.replace('.', ",")))
}

fn is_timestamp_field(field: &str) -> bool {
    let leaf = field.rsplit('.').next().unwrap_or(field);
    leaf.ends_with("_at") || leaf == "last_refreshed"
}

fn predicate(filter: &FilterExpr, params: &mut Vec<SqlParam>) -> Result<String, StoreError> {
    let path = json_path(&filter.field)?;
    let text = format!("(body #>> {})", path);

    let op = match filter.operator {
        FilterOperator::Contains => {
            let FilterValue::Text(needle) = &filter.value else {
                return Ok("FALSE".to_string());
            };
            params.push(SqlParam::Text(needle.clone()));
            return Ok(format!(
                "strpos(lower({}), lower(${})) > 0",
                text,
                params.len()
            ));
        }
        FilterOperator::Eq => "=",
        FilterOperator::Gte => ">=",
        FilterOperator::Lte => "<=",
    };

    params.push(SqlParam::from(&filter.value));
    let n = params.len();
    Ok(match &filter.value {
        FilterValue::Text(_) => format!("{} {} ${}", text, op, n),
        FilterValue::Integer(_) => format!(
            "(CASE WHEN jsonb_typeof(body #> {p}) = 'number' THEN (body #>> {p})::numeric END) {op} ${n}::int8",
            p = path,
            op = op,
            n = n
        ),
        FilterValue::Timestamp(_) => format!("{}::timestamptz {} ${}", text, op, n),
        FilterValue::Bool(_) => format!(
            "(CASE WHEN jsonb_typeof(body #> {p}) = 'boolean' THEN (body #>> {p})::boolean END) {op} ${n}",
            p = path,
            op = op,
            n = n
        ),
    })
}

fn order_term(sort: &SortField) -> Result<String, StoreError> {
    let path = json_path(&sort.field)?;
    let expr = if is_timestamp_field(&sort.field) {
        format!("(body #>> {})::timestamptz", path)
    } else {
        format!("NULLIF(body #> {}, 'null'::jsonb)", path)
    };
    Ok(match sort.direction {
        SortDirection::Asc => format!("{} ASC NULLS FIRST", expr),
        SortDirection::Desc => format!("{} DESC NULLS LAST", expr),
    })
}

fn where_clause(query: &StoreQuery, params: &mut Vec<SqlParam>) -> Result<String, StoreError> {
    params.push(SqlParam::Text(query.kind.as_str().to_string()));
    let mut clauses = vec!["kind = $1".to_string()];
    for filter in &query.filters {
        clauses.push(predicate(filter, params)?);
    }
    Ok(clauses.join(" AND "))
}

/// Windowed select for a store query, ordered by the query's sort fields
/// and then by key.
pub fn build_select(query: &StoreQuery) -> Result<SqlQuery, StoreError> {
    let mut params = Vec::new();
    let filter = where_clause(query, &mut params)?;

    let mut order = query
        .order
        .iter()
        .map(order_term)
        .collect::<Result<Vec<_>, _>>()?;
    order.push("key ASC".to_string());

    let mut sql = format!(
        "SELECT kind, key, parent_key, refreshed_at, body FROM entities WHERE {} ORDER BY {}",
        filter,
        order.join(", ")
    );
    if let Ok(limit) = i64::try_from(query.limit) {
        params.push(SqlParam::Integer(limit));
        sql.push_str(&format!(" LIMIT ${}", params.len()));
    }
    if query.offset > 0 {
        let offset = i64::try_from(query.offset).map_err(|_| StoreError::Query {
            reason: format!("offset {} out of range", query.offset),
        })?;
        params.push(SqlParam::Integer(offset));
        sql.push_str(&format!(" OFFSET ${}", params.len()));
    }
    Ok(SqlQuery { sql, params })
}

/// Count of all records matching a store query, ignoring its window.
pub fn build_count(query: &StoreQuery) -> Result<SqlQuery, StoreError> {
    let mut params = Vec::new();
    let filter = where_clause(query, &mut params)?;
    Ok(SqlQuery {
        sql: format!("SELECT COUNT(*) FROM entities WHERE {}", filter),
        params,
    })
}

// ============================================================================
// STORE
// ============================================================================

/// `EntityStore` over a deadpool-postgres pool.
#[derive(Clone)]
pub struct PgEntityStore {
    pool: Pool,
}

impl PgEntityStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> Result<Self, StoreError> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> Result<deadpool_postgres::Object, StoreError> {
        self.pool.get().await.map_err(|e| StoreError::Connection {
            reason: e.to_string(),
        })
    }

    /// Create the table and indexes if missing.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.batch_execute(SCHEMA).await.map_err(query_error)?;
        tracing::info!("Entity schema ready");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        conn.query_one("SELECT 1", &[]).await.map_err(query_error)?;
        Ok(())
    }
}

fn query_error(err: tokio_postgres::Error) -> StoreError {
    StoreError::Query {
        reason: err.to_string(),
    }
}

fn row_to_record(row: &Row) -> Result<Record, StoreError> {
    let kind: String = row.try_get("kind").map_err(query_error)?;
    let key: String = row.try_get("key").map_err(query_error)?;
    let kind: EntityKind = kind.parse().map_err(|reason| StoreError::Corrupt {
        kind: EntityKind::Page,
        key: key.clone(),
        reason,
    })?;
    Ok(Record {
        kind,
        key,
        parent_key: row.try_get("parent_key").map_err(query_error)?,
        refreshed_at: row.try_get("refreshed_at").map_err(query_error)?,
        body: row.try_get("body").map_err(query_error)?,
    })
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn get_by_key(&self, kind: EntityKind, key: &str) -> Result<Option<Record>, StoreError> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(SELECT_ONE, &[&kind.as_str(), &key])
            .await
            .map_err(query_error)?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn upsert(&self, record: &Record) -> Result<(), StoreError> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                UPSERT,
                &[
                    &record.kind.as_str(),
                    &record.key,
                    &record.parent_key,
                    &record.refreshed_at,
                    &record.body,
                ],
            )
            .await
            .map_err(query_error)?;
        if updated == 0 {
            tracing::debug!(kind = %record.kind, key = %record.key, "Ignored older write");
        }
        Ok(())
    }

    async fn query_filtered(&self, query: &StoreQuery) -> Result<(Vec<Record>, usize), StoreError> {
        let select = build_select(query)?;
        let count = build_count(query)?;
        let conn = self.get_conn().await?;

        let total: i64 = conn
            .query_one(&count.sql, &count.param_refs())
            .await
            .map_err(query_error)?
            .try_get(0)
            .map_err(query_error)?;
        let records = if query.limit == 0 {
            Vec::new()
        } else {
            conn.query(&select.sql, &select.param_refs())
                .await
                .map_err(query_error)?
                .iter()
                .map(row_to_record)
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok((records, usize::try_from(total).unwrap_or(0)))
    }
}

impl std::fmt::Debug for PgEntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("PgEntityStore")
            .field("size", &status.size)
            .field("available", &status.available)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_select_kind_only() {
        let q = build_select(&StoreQuery::new(EntityKind::Page)).unwrap();
        assert_eq!(
            q.sql,
            "SELECT kind, key, parent_key, refreshed_at, body FROM entities \
             WHERE kind = $1 ORDER BY key ASC"
        );
        assert_eq!(q.params, vec![SqlParam::Text("page".into())]);
    }

    #[test]
    fn test_select_with_filters_order_and_window() {
        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let query = StoreQuery::new(EntityKind::Post)
            .filter(FilterExpr::eq("page_id", FilterValue::Text("acme".into())))
            .filter(FilterExpr::gte("published_at", FilterValue::Timestamp(since)))
            .filter(FilterExpr::gte(
                "reactions.total_count",
                FilterValue::Integer(10),
            ))
            .order_by(SortField::desc("published_at"))
            .window(20, 10);
        let q = build_select(&query).unwrap();

        assert!(q.sql.contains("kind = $1"));
        assert!(q.sql.contains("(body #>> '{page_id}') = $2"));
        assert!(q.sql.contains("(body #>> '{published_at}')::timestamptz >= $3"));
        assert!(q.sql.contains("(body #>> '{reactions,total_count}')::numeric END) >= $4::int8"));
        assert!(q
            .sql
            .contains("ORDER BY (body #>> '{published_at}')::timestamptz DESC NULLS LAST, key ASC"));
        assert!(q.sql.ends_with("LIMIT $5 OFFSET $6"));
        assert_eq!(
            q.params,
            vec![
                SqlParam::Text("post".into()),
                SqlParam::Text("acme".into()),
                SqlParam::Timestamp(since),
                SqlParam::Integer(10),
                SqlParam::Integer(10),
                SqlParam::Integer(20),
            ]
        );
    }

    #[test]
    fn test_contains_is_case_insensitive_substring() {
        let query = StoreQuery::new(EntityKind::Page).filter(FilterExpr::contains("name", "Ac"));
        let q = build_select(&query).unwrap();
        assert!(q.sql.contains("strpos(lower((body #>> '{name}')), lower($2)) > 0"));
        assert_eq!(q.params[1], SqlParam::Text("Ac".into()));
    }

    #[test]
    fn test_contains_on_non_text_never_matches() {
        let query = StoreQuery::new(EntityKind::Page).filter(FilterExpr::new(
            "follower_count",
            FilterOperator::Contains,
            FilterValue::Integer(3),
        ));
        let q = build_select(&query).unwrap();
        assert!(q.sql.contains("AND FALSE"));
        assert_eq!(q.params.len(), 1);
    }

    #[test]
    fn test_unbounded_window_has_no_limit() {
        let q = build_select(&StoreQuery::new(EntityKind::Comment)).unwrap();
        assert!(!q.sql.contains("LIMIT"));
        assert!(!q.sql.contains("OFFSET"));
    }

    #[test]
    fn test_non_timestamp_sort_uses_jsonb_ordering() {
        let query = StoreQuery::new(EntityKind::Page).order_by(SortField::asc("name"));
        let q = build_select(&query).unwrap();
        assert!(q
            .sql
            .contains("ORDER BY NULLIF(body #> '{name}', 'null'::jsonb) ASC NULLS FIRST, key ASC"));
    }

    #[test]
    fn test_field_injection_rejected() {
        let query = StoreQuery::new(EntityKind::Page)
            .filter(FilterExpr::eq("name'}'; DROP TABLE entities; --", FilterValue::Bool(true)));
        assert!(matches!(build_select(&query), Err(StoreError::Query { .. })));
        let query = StoreQuery::new(EntityKind::Page).order_by(SortField::asc("Name"));
        assert!(build_select(&query).is_err());
    }

    #[test]
    fn test_count_ignores_window_and_order() {
        let query = StoreQuery::new(EntityKind::Employee)
            .filter(FilterExpr::eq("company_page_id", FilterValue::Text("acme".into())))
            .order_by(SortField::asc("name"))
            .window(10, 10);
        let q = build_count(&query).unwrap();
        assert_eq!(
            q.sql,
            "SELECT COUNT(*) FROM entities WHERE kind = $1 AND (body #>> '{company_page_id}') = $2"
        );
        assert_eq!(q.params.len(), 2);
    }

    #[test]
    fn test_timestamp_field_detection() {
        assert!(is_timestamp_field("published_at"));
        assert!(is_timestamp_field("last_refreshed"));
        assert!(!is_timestamp_field("reactions.total_count"));
    }
}
