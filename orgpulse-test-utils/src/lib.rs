//! ORGPULSE Test Utilities
//!
//! Centralized test infrastructure for the ORGPULSE workspace:
//! - Fixtures for pages, posts, employees and comments
//! - Scripted source fetcher and summarizer that count their calls
//! - Collaborators that always fail, for degradation tests
//! - Proptest generators
//! - Custom assertions for read results

pub use orgpulse_core::{
    AiSummary, CacheError, Comment, Employee, Entity, EntityKind, FetchError, Industry,
    OrchestratorConfig, Page, Post, PostType, Reactions, ReadError, ReadResult, Record,
    StoreError, StoreQuery, Timestamp,
};
pub use orgpulse_storage::{
    CacheAsideController, CacheClient, CacheKey, CacheStats, EntityStore, FetchContext,
    HierarchicalFetcher, InMemoryCache, InMemoryEntityStore, PageSnapshot, QueryEngine, Read,
    ReadOptions, ReadSource, SourceFetcher, Summarizer, SummaryDraft,
};

use async_trait::async_trait;
use chrono::{Duration as TimeDelta, TimeZone, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// SCRIPTED FETCHER
// ============================================================================

type Slot = (EntityKind, String);

/// Source fetcher answering from scripted data.
///
/// Unscripted keys fail with `FetchError::NotFound`. Every call is counted,
/// and an optional delay keeps fetches in flight long enough for concurrent
/// readers to pile up.
#[derive(Default)]
pub struct ScriptedFetcher {
    entities: Mutex<HashMap<Slot, Record>>,
    children: Mutex<HashMap<Slot, Vec<Record>>>,
    failing: Mutex<HashSet<Slot>>,
    fail_everything: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    log: Mutex<Vec<(EntityKind, String)>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Hold every fetch for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    /// Script the answer for a single entity fetch.
    pub fn put(&self, record: Record) {
        lock(&self.entities).insert((record.kind, record.key.clone()), record);
    }

    /// Script the answer for a listing fetch.
    pub fn put_children(&self, kind: EntityKind, parent_key: &str, records: Vec<Record>) {
        lock(&self.children).insert((kind, parent_key.to_string()), records);
    }

    /// Make fetches of one entity (or listing, keyed by parent) fail.
    pub fn fail(&self, kind: EntityKind, key: &str) {
        lock(&self.failing).insert((kind, key.to_string()));
    }

    pub fn heal(&self, kind: EntityKind, key: &str) {
        lock(&self.failing).remove(&(kind, key.to_string()));
    }

    /// Make every fetch fail.
    pub fn fail_all(&self, fail: bool) {
        *lock(&self.fail_everything) = fail;
    }

    /// Total fetch calls, listings included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls made for one `(kind, key)`; listings are logged under their
    /// parent key.
    pub fn calls_for(&self, kind: EntityKind, key: &str) -> usize {
        lock(&self.log)
            .iter()
            .filter(|(k, key_)| *k == kind && key_ == key)
            .count()
    }

    async fn begin(&self, kind: EntityKind, key: &str) -> Result<(), FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.log).push((kind, key.to_string()));
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let fails = *lock(&self.fail_everything)
            || lock(&self.failing).contains(&(kind, key.to_string()));
        if fails {
            return Err(FetchError::SourceUnavailable {
                reason: format!("scripted failure for {} {}", kind, key),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SourceFetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        kind: EntityKind,
        key: &str,
        _ctx: &FetchContext,
    ) -> Result<Record, FetchError> {
        self.begin(kind, key).await?;
        lock(&self.entities)
            .get(&(kind, key.to_string()))
            .cloned()
            .ok_or_else(|| FetchError::NotFound {
                kind,
                key: key.to_string(),
            })
    }

    async fn fetch_children(
        &self,
        kind: EntityKind,
        parent_key: &str,
        _ctx: &FetchContext,
    ) -> Result<Vec<Record>, FetchError> {
        self.begin(kind, parent_key).await?;
        Ok(lock(&self.children)
            .get(&(kind, parent_key.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// SCRIPTED SUMMARIZER
// ============================================================================

/// Summarizer producing a deterministic summary from the snapshot.
#[derive(Default)]
pub struct ScriptedSummarizer {
    calls: AtomicUsize,
    failing: Mutex<bool>,
    fingerprints: Mutex<Vec<String>>,
}

impl ScriptedSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail(&self, fail: bool) {
        *lock(&self.failing) = fail;
    }

    /// Fingerprints of every snapshot summarized, in call order.
    pub fn fingerprints(&self) -> Vec<String> {
        lock(&self.fingerprints).clone()
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn summarize(
        &self,
        page_key: &str,
        snapshot: &PageSnapshot,
    ) -> Result<SummaryDraft, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.fingerprints).push(snapshot.fingerprint.to_string());
        if *lock(&self.failing) {
            return Err(FetchError::RateLimited {
                retry_after_ms: 1_000,
            });
        }
        Ok(SummaryDraft {
            summary: format!(
                "{} ({}) has {} followers and {} recent posts",
                snapshot.page.name,
                page_key,
                snapshot.page.follower_count,
                snapshot.posts.len()
            ),
            follower_insights: Some(format!("{} followers", snapshot.page.follower_count)),
            engagement_insights: None,
            content_insights: None,
            model: "scripted".to_string(),
        })
    }
}

// ============================================================================
// FAILING COLLABORATORS
// ============================================================================

/// Entity store whose every call fails.
#[derive(Debug, Default, Clone)]
pub struct FailingStore;

#[async_trait]
impl EntityStore for FailingStore {
    async fn get_by_key(&self, _kind: EntityKind, _key: &str) -> Result<Option<Record>, StoreError> {
        Err(FailingStore::error())
    }

    async fn upsert(&self, _record: &Record) -> Result<(), StoreError> {
        Err(FailingStore::error())
    }

    async fn query_filtered(&self, _query: &StoreQuery) -> Result<(Vec<Record>, usize), StoreError> {
        Err(FailingStore::error())
    }
}

impl FailingStore {
    fn error() -> StoreError {
        StoreError::Connection {
            reason: "connection refused".to_string(),
        }
    }
}

/// Cache whose every call fails.
#[derive(Debug, Default, Clone)]
pub struct FailingCache;

#[async_trait]
impl CacheClient for FailingCache {
    async fn get(&self, _key: &CacheKey) -> Result<Option<Value>, CacheError> {
        Err(CacheError::new("cache offline"))
    }

    async fn set_with_ttl(
        &self,
        _key: &CacheKey,
        _value: &Value,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Err(CacheError::new("cache offline"))
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Err(CacheError::new("cache offline"))
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// Controller wired to in-memory collaborators and scripted sources.
pub struct Harness {
    pub store: Arc<InMemoryEntityStore>,
    pub cache: Arc<InMemoryCache>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub summarizer: Arc<ScriptedSummarizer>,
    pub controller: CacheAsideController,
    pub hierarchy: HierarchicalFetcher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let store = Arc::new(InMemoryEntityStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let fetcher = ScriptedFetcher::shared();
        let summarizer = Arc::new(ScriptedSummarizer::new());
        let controller = CacheAsideController::new(
            store.clone(),
            cache.clone(),
            fetcher.clone(),
            Some(summarizer.clone()),
            config,
        );
        let hierarchy = HierarchicalFetcher::new(controller.clone());
        Self {
            store,
            cache,
            fetcher,
            summarizer,
            controller,
            hierarchy,
        }
    }

    pub fn query_engine(&self) -> QueryEngine {
        QueryEngine::new(self.store.clone(), self.controller.config().clone())
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built entities for common testing scenarios.

    use super::*;

    /// Wrap an entity in its record envelope.
    pub fn record<E: Entity>(entity: &E) -> Record {
        match Record::from_entity(entity) {
            Ok(record) => record,
            Err(e) => panic!("fixture failed to serialize: {}", e),
        }
    }

    /// Fixed publication base so ordering tests are reproducible.
    pub fn epoch() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn page(key: &str) -> Page {
        Page {
            page_id: key.to_string(),
            url: format!("https://www.linkedin.com/company/{}/", key),
            name: format!("{} Inc", key),
            description: Some(format!("{} builds things", key)),
            industry: Industry::Technology,
            follower_count: 1_000,
            head_count: Some(120),
            specialities: vec!["widgets".to_string()],
            last_refreshed: Utc::now(),
        }
    }

    /// A post published `minutes` after [`epoch`].
    pub fn post(key: &str, page_key: &str, minutes: i64) -> Post {
        Post {
            post_id: key.to_string(),
            page_id: page_key.to_string(),
            url: None,
            post_type: PostType::Text,
            content: format!("post {}", key),
            media_urls: vec![],
            reactions: Reactions::new(minutes, 1, 0),
            published_at: epoch() + TimeDelta::minutes(minutes),
            last_refreshed: Utc::now(),
        }
    }

    /// `n` posts of a page, `{page_key}-post-00`, `-01`, ... newest last.
    pub fn posts(page_key: &str, n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| record(&post(&format!("{}-post-{:02}", page_key, i), page_key, i as i64)))
            .collect()
    }

    pub fn employee(key: &str, page_key: &str) -> Employee {
        Employee {
            user_id: key.to_string(),
            company_page_id: page_key.to_string(),
            name: format!("Employee {}", key),
            headline: Some("Engineer".to_string()),
            location: None,
            last_refreshed: Utc::now(),
        }
    }

    pub fn comment(key: &str, post_key: &str, parent: Option<&str>) -> Comment {
        Comment {
            comment_id: key.to_string(),
            post_id: post_key.to_string(),
            parent_comment_id: parent.map(str::to_string),
            author_id: format!("author-{}", key),
            content: format!("comment {}", key),
            like_count: 0,
            reply_count: 0,
            published_at: Some(epoch()),
            last_refreshed: Utc::now(),
        }
    }

    /// A record last refreshed `age` ago.
    pub fn aged(mut record: Record, age: Duration) -> Record {
        let delta = TimeDelta::from_std(age).unwrap_or(TimeDelta::zero());
        record.stamp(Utc::now() - delta);
        record
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for ORGPULSE entity types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_entity_kind() -> impl Strategy<Value = EntityKind> {
        prop::sample::select(EntityKind::ALL.to_vec())
    }

    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_600_000_000i64..1_900_000_000).prop_map(|secs| {
            Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,15}"
    }

    pub fn arb_page() -> impl Strategy<Value = Page> {
        (arb_key(), "[A-Za-z ]{1,24}", 0i64..10_000_000, arb_timestamp()).prop_map(
            |(key, name, followers, refreshed)| Page {
                follower_count: followers,
                name,
                last_refreshed: refreshed,
                ..fixtures::page(&key)
            },
        )
    }

    pub fn arb_post(page_key: String) -> impl Strategy<Value = Post> {
        (arb_key(), 0i64..10_000, 0i64..100_000).prop_map(move |(key, likes, minutes)| Post {
            reactions: Reactions::new(likes, 0, 0),
            ..fixtures::post(&key, &page_key, minutes)
        })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for read results.

    use super::*;
    use std::fmt::Debug;

    /// Assert a read succeeded from the given source.
    #[track_caller]
    pub fn assert_source<T: Debug>(result: &ReadResult<Read<T>>, source: ReadSource) {
        match result {
            Ok(read) => assert_eq!(read.source(), source, "unexpected source for {:?}", read),
            Err(e) => panic!("Expected read from {:?}, got error: {:?}", source, e),
        }
    }

    /// Assert a read failed with the given error kind (`ReadError::kind_name`).
    #[track_caller]
    pub fn assert_read_error<T: Debug>(result: &ReadResult<T>, kind_name: &str) {
        match result {
            Err(e) => assert_eq!(e.kind_name(), kind_name, "unexpected error: {:?}", e),
            Ok(value) => panic!("Expected {} error, got: {:?}", kind_name, value),
        }
    }
}
