//! Collaborator traits consumed by the orchestration layer.
//!
//! Stores, fetchers and summarizers are injected as `Arc<dyn Trait>` at
//! startup; nothing in this crate reaches for a global handle.

use std::time::Duration;

use async_trait::async_trait;
use orgpulse_core::{
    EntityKind, FetchError, Fingerprint, Page, Post, Record, StoreError, StoreQuery,
};
use uuid::Uuid;

/// Durable entity storage.
///
/// Implementations must provide read-your-writes consistency for a single
/// key within one process.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch one record by kind and key.
    async fn get_by_key(&self, kind: EntityKind, key: &str) -> Result<Option<Record>, StoreError>;

    /// Insert or overwrite a record.
    ///
    /// A write whose `refreshed_at` is older than the stored record's is
    /// ignored, keeping refresh timestamps non-decreasing per key.
    async fn upsert(&self, record: &Record) -> Result<(), StoreError>;

    /// Filtered window plus the total number of matching records.
    ///
    /// Results are ordered by `query.order`, then by key ascending.
    async fn query_filtered(&self, query: &StoreQuery) -> Result<(Vec<Record>, usize), StoreError>;
}

/// Per-call context handed to the source fetcher.
#[derive(Debug, Clone)]
pub struct FetchContext {
    /// Correlates log lines of one fetch across collaborators.
    pub request_id: Uuid,
    /// Deadline the orchestration layer will enforce.
    pub deadline: Duration,
    /// Whether the read that triggered the fetch was forced.
    pub force: bool,
    /// Upper bound on children returned by a listing fetch.
    pub limit: usize,
    /// Resolved parent record for child fetches (e.g. the post whose
    /// comments are requested).
    pub parent: Option<Record>,
}

impl FetchContext {
    pub fn new(deadline: Duration, limit: usize) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            deadline,
            force: false,
            limit,
            parent: None,
        }
    }

    pub fn forced(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_parent(mut self, parent: Record) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// External source of entity data (the scraper).
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch one entity.
    async fn fetch(
        &self,
        kind: EntityKind,
        key: &str,
        ctx: &FetchContext,
    ) -> Result<Record, FetchError>;

    /// Fetch the children of `parent_key` for a child kind.
    async fn fetch_children(
        &self,
        kind: EntityKind,
        parent_key: &str,
        ctx: &FetchContext,
    ) -> Result<Vec<Record>, FetchError>;
}

/// Page facts a summary is generated from.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub page: Page,
    pub posts: Vec<Post>,
    pub fingerprint: Fingerprint,
}

/// Summarizer output before it is stamped and persisted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SummaryDraft {
    pub summary: String,
    pub follower_insights: Option<String>,
    pub engagement_insights: Option<String>,
    pub content_insights: Option<String>,
    pub model: String,
}

/// Generates page summaries.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        page_key: &str,
        snapshot: &PageSnapshot,
    ) -> Result<SummaryDraft, FetchError>;
}
