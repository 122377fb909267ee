//! Cache-aside controller.
//!
//! Every read goes through the same ladder:
//!
//! 1. Unless forced, the cache is consulted and a hit is returned as is.
//! 2. The entity store is consulted and the record's freshness evaluated.
//!    A fresh record is written back to the cache and returned.
//! 3. Otherwise the source is fetched through the single-flight coordinator.
//!    The job upserts the result, populates the cache and returns it.
//! 4. A failed refresh falls back to the stale record when one exists and
//!    the read was not forced.
//!
//! Cache failures are logged and absorbed. Store failures always surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use orgpulse_core::{
    snapshot_fingerprint, AiSummary, CacheError, EntityKind, FetchError, FilterExpr, FilterValue,
    Fingerprint, OrchestratorConfig, Page, Post, ReadError, ReadResult, Record, SortField,
    StoreError, StoreQuery, Timestamp,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::cache_key::CacheKey;
use super::freshness::{evaluate, evaluate_summary, Freshness, Read, ReadSource};
use super::single_flight::SingleFlight;
use super::traits::CacheClient;
use crate::memory::compare_records;
use crate::query::listing_order;
use crate::threads::repair_threads;
use crate::traits::{EntityStore, FetchContext, PageSnapshot, SourceFetcher, Summarizer};

// ============================================================================
// STATS
// ============================================================================

/// Counters kept by the controller.
#[derive(Debug, Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_errors: AtomicU64,
    store_hits: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    stale_served: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Point-in-time view of orchestration activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Cache calls that failed and were treated as misses.
    pub cache_errors: u64,
    /// Reads answered by a fresh store record.
    pub store_hits: u64,
    /// Source calls actually made (fetches and summarizations).
    pub fetches: u64,
    /// Reads whose refresh failed, whether or not a stale record was served.
    pub fetch_failures: u64,
    pub stale_served: u64,
    /// Callers that attached to a fetch already in flight.
    pub flight_joins: u64,
    pub flight_timeouts: u64,
    pub in_flight: usize,
}

// ============================================================================
// CONTROLLER
// ============================================================================

/// Failure of a single-flight job, fanned out to every waiter.
#[derive(Debug, Clone)]
enum JobError {
    Fetch(FetchError),
    Store(StoreError),
    /// Already shaped as `ReadError::ParentUnresolved`.
    Parent(ReadError),
}

impl From<FetchError> for JobError {
    fn from(err: FetchError) -> Self {
        JobError::Fetch(err)
    }
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        JobError::Store(err)
    }
}

struct Inner {
    store: Arc<dyn EntityStore>,
    cache: Arc<dyn CacheClient>,
    fetcher: Arc<dyn SourceFetcher>,
    summarizer: Option<Arc<dyn Summarizer>>,
    entities: SingleFlight<Record, JobError>,
    listings: SingleFlight<Vec<Record>, JobError>,
    config: OrchestratorConfig,
    counters: Counters,
}

/// Read path shared by every entity kind.
///
/// Cheap to clone; clones share collaborators, in-flight slots and stats.
#[derive(Clone)]
pub struct CacheAsideController {
    inner: Arc<Inner>,
}

impl CacheAsideController {
    pub fn new(
        store: Arc<dyn EntityStore>,
        cache: Arc<dyn CacheClient>,
        fetcher: Arc<dyn SourceFetcher>,
        summarizer: Option<Arc<dyn Summarizer>>,
        config: OrchestratorConfig,
    ) -> Self {
        let deadline = config.fetch_deadline;
        Self {
            inner: Arc::new(Inner {
                store,
                cache,
                fetcher,
                summarizer,
                entities: SingleFlight::new(deadline),
                listings: SingleFlight::new(deadline),
                config,
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.inner.store
    }

    pub fn has_summarizer(&self) -> bool {
        self.inner.summarizer.is_some()
    }

    /// Fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.entities.in_flight() + self.inner.listings.in_flight()
    }

    pub fn stats(&self) -> OrchestratorStats {
        let c = &self.inner.counters;
        let entities = self.inner.entities.stats();
        let listings = self.inner.listings.stats();
        OrchestratorStats {
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            cache_misses: c.cache_misses.load(Ordering::Relaxed),
            cache_errors: c.cache_errors.load(Ordering::Relaxed),
            store_hits: c.store_hits.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            fetch_failures: c.fetch_failures.load(Ordering::Relaxed),
            stale_served: c.stale_served.load(Ordering::Relaxed),
            flight_joins: entities.joined + listings.joined,
            flight_timeouts: entities.timed_out + listings.timed_out,
            in_flight: self.in_flight(),
        }
    }

    // ------------------------------------------------------------------------
    // Single entities
    // ------------------------------------------------------------------------

    /// Read one page, post, employee or comment.
    ///
    /// Summaries depend on their page and go through [`Self::read_summary`].
    pub async fn read_entity(
        &self,
        kind: EntityKind,
        key: &str,
        force: bool,
    ) -> ReadResult<Read<Record>> {
        if kind == EntityKind::AiSummary {
            return Err(ReadError::NotFound {
                kind,
                key: key.to_string(),
                cause: FetchError::Invalid {
                    reason: "summaries are read with their page".to_string(),
                },
            });
        }

        let cache_key = CacheKey::entity(kind, key);
        if !force {
            if let Some(record) = self.cache_get::<Record>(&cache_key).await {
                let refreshed_at = record.refreshed_at;
                return Ok(Read::new(record, ReadSource::Cache, Some(refreshed_at)));
            }
        }

        let stored = self.inner.store.get_by_key(kind, key).await?;
        let prior = stored.as_ref().map(|r| r.refreshed_at);
        let freshness = evaluate(prior, self.inner.config.ttl(kind), force, Utc::now());
        if let (Freshness::Fresh, Some(record)) = (freshness, stored.as_ref()) {
            bump(&self.inner.counters.store_hits);
            self.cache_put(&cache_key, record, record.refreshed_at).await;
            return Ok(Read::new(record.clone(), ReadSource::Store, prior));
        }

        debug!(kind = %kind, key = %key, ?freshness, force, "Refresh required");
        let ctl = self.clone();
        let owned_key = key.to_string();
        let result = self
            .inner
            .entities
            .run(cache_key, move || ctl.entity_job(kind, owned_key, force, prior))
            .await;

        match result {
            Ok(record) => {
                let refreshed_at = record.refreshed_at;
                Ok(Read::new(record, ReadSource::Fetched, Some(refreshed_at)))
            }
            Err(err) => {
                let fallback = stored.map(|r| {
                    let at = r.refreshed_at;
                    (r, at)
                });
                self.settle_failure(kind, key, force, fallback, err)
            }
        }
    }

    fn entity_job(
        self,
        kind: EntityKind,
        key: String,
        force: bool,
        prior: Option<Timestamp>,
    ) -> BoxFuture<'static, Result<Record, JobError>> {
        async move {
            let inner = &self.inner;
            bump(&inner.counters.fetches);
            let ctx = FetchContext::new(inner.config.fetch_deadline, inner.config.max_children)
                .forced(force);
            debug!(kind = %kind, key = %key, request_id = %ctx.request_id, "Fetching from source");

            let mut record = inner.fetcher.fetch(kind, &key, &ctx).await?;
            if record.kind != kind || record.key != key {
                return Err(JobError::Fetch(FetchError::Invalid {
                    reason: format!(
                        "asked for {} {}, source returned {} {}",
                        kind, key, record.kind, record.key
                    ),
                }));
            }

            self.ensure_parent(&record).await?;
            if kind == EntityKind::Comment {
                record = repair_threads(inner.store.as_ref(), vec![record])
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        JobError::Fetch(FetchError::Invalid {
                            reason: format!("thread repair dropped comment {}", key),
                        })
                    })?;
            }
            record.stamp(next_stamp(prior));
            inner.store.upsert(&record).await?;
            self.cache_put(&CacheKey::entity(kind, &key), &record, record.refreshed_at)
                .await;
            info!(kind = %kind, key = %key, request_id = %ctx.request_id, "Refreshed from source");
            Ok(record)
        }
        .boxed()
    }

    /// Resolve a missing parent before its child is written.
    async fn ensure_parent(&self, record: &Record) -> Result<(), JobError> {
        let (Some(parent_kind), Some(parent_key)) =
            (record.kind.parent(), record.parent_key.as_deref())
        else {
            return Ok(());
        };
        if self
            .inner
            .store
            .get_by_key(parent_kind, parent_key)
            .await?
            .is_some()
        {
            return Ok(());
        }

        debug!(
            kind = %record.kind,
            key = %record.key,
            parent = %parent_key,
            "Resolving missing parent before write"
        );
        self.read_entity(parent_kind, parent_key, false)
            .await
            .map(|_| ())
            .map_err(|source| {
                JobError::Parent(ReadError::ParentUnresolved {
                    kind: parent_kind,
                    key: parent_key.to_string(),
                    source: Box::new(source),
                })
            })
    }

    // ------------------------------------------------------------------------
    // Child listings
    // ------------------------------------------------------------------------

    /// Read the `kind` children of an already resolved parent.
    ///
    /// Listings live in their own key space. A fetched listing is cached as
    /// of its fetch. Without a cached listing, freshness is that of the
    /// oldest stored child; no children at all counts as missing.
    pub async fn read_children(
        &self,
        kind: EntityKind,
        parent: &Record,
        force: bool,
    ) -> ReadResult<Read<Vec<Record>>> {
        if kind == EntityKind::AiSummary || kind.parent() != Some(parent.kind) {
            return Err(ReadError::NotFound {
                kind,
                key: parent.key.clone(),
                cause: FetchError::Invalid {
                    reason: format!("{} is not a child of {}", kind, parent.kind),
                },
            });
        }

        let cache_key = CacheKey::children(kind, parent.key.as_str());
        if !force {
            if let Some(listing) = self.cache_get::<Vec<Record>>(&cache_key).await {
                let oldest = oldest_refresh(&listing);
                return Ok(Read::new(listing, ReadSource::Cache, oldest));
            }
        }

        let stored = self.stored_children(kind, &parent.key).await?;
        let oldest = oldest_refresh(&stored);
        let freshness = evaluate(oldest, self.inner.config.ttl(kind), force, Utc::now());
        if let (Freshness::Fresh, Some(at)) = (freshness, oldest) {
            bump(&self.inner.counters.store_hits);
            self.cache_put(&cache_key, &stored, at).await;
            return Ok(Read::new(stored, ReadSource::Store, oldest));
        }

        debug!(kind = %kind, parent = %parent.key, ?freshness, force, "Listing refresh required");
        let ctl = self.clone();
        let owned_parent = parent.clone();
        let result = self
            .inner
            .listings
            .run(cache_key, move || ctl.children_job(kind, owned_parent, force))
            .await;

        match result {
            Ok(listing) => {
                let at = oldest_refresh(&listing).unwrap_or_else(Utc::now);
                Ok(Read::new(listing, ReadSource::Fetched, Some(at)))
            }
            Err(err) => {
                let fallback = oldest.map(|at| (stored, at));
                self.settle_failure(kind, &parent.key, force, fallback, err)
            }
        }
    }

    fn children_job(
        self,
        kind: EntityKind,
        parent: Record,
        force: bool,
    ) -> BoxFuture<'static, Result<Vec<Record>, JobError>> {
        async move {
            let inner = &self.inner;
            let max = inner.config.max_children;
            bump(&inner.counters.fetches);
            let ctx = FetchContext::new(inner.config.fetch_deadline, max)
                .forced(force)
                .with_parent(parent.clone());
            debug!(kind = %kind, parent = %parent.key, request_id = %ctx.request_id, "Fetching listing from source");

            let mut children = inner.fetcher.fetch_children(kind, &parent.key, &ctx).await?;
            if children.len() > max {
                debug!(kind = %kind, parent = %parent.key, fetched = children.len(), max, "Truncating listing");
                children.truncate(max);
            }

            let now = Utc::now();
            for child in &mut children {
                if child.kind != kind {
                    return Err(JobError::Fetch(FetchError::Invalid {
                        reason: format!("{} listing contained a {} record", kind, child.kind),
                    }));
                }
                child.set_parent_key(Some(parent.key.clone()));
                child.stamp(now);
            }
            if kind == EntityKind::Comment {
                children = repair_threads(inner.store.as_ref(), children).await?;
            }
            for child in &children {
                inner.store.upsert(child).await?;
            }

            // The listing is what the source returned, not every stored child.
            let order = listing_order(kind);
            children.sort_by(|a, b| compare_records(a, b, &order));
            let listing = children;
            self.cache_put(&CacheKey::children(kind, parent.key.as_str()), &listing, now)
                .await;
            info!(
                kind = %kind,
                parent = %parent.key,
                count = listing.len(),
                request_id = %ctx.request_id,
                "Refreshed listing from source"
            );
            Ok(listing)
        }
        .boxed()
    }

    async fn stored_children(
        &self,
        kind: EntityKind,
        parent_key: &str,
    ) -> Result<Vec<Record>, StoreError> {
        let Some(query) = StoreQuery::children_of(kind, parent_key) else {
            return Ok(Vec::new());
        };
        let query = listing_order(kind)
            .into_iter()
            .fold(query, StoreQuery::order_by)
            .window(0, self.inner.config.max_children);
        let (records, _) = self.inner.store.query_filtered(&query).await?;
        Ok(records)
    }

    // ------------------------------------------------------------------------
    // Summaries
    // ------------------------------------------------------------------------

    /// Read the summary of an already resolved page.
    ///
    /// The fingerprint is computed over the page and its latest stored posts
    /// as they are; this never refreshes them. A summary built from a
    /// different snapshot is stale however young it is.
    pub async fn read_summary(&self, page: &Record, force: bool) -> ReadResult<Read<Record>> {
        let kind = EntityKind::AiSummary;
        let posts_query = StoreQuery::new(EntityKind::Post)
            .filter(FilterExpr::eq("page_id", FilterValue::Text(page.key.clone())))
            .order_by(SortField::desc("published_at"))
            .window(0, self.inner.config.summary_post_limit);
        let (posts, _) = self.inner.store.query_filtered(&posts_query).await?;
        let fingerprint = snapshot_fingerprint(page, &posts);
        let ttl = self.inner.config.ttl(kind);

        let cache_key = CacheKey::entity(kind, page.key.as_str());
        if !force {
            if let Some(cached) = self.cache_get::<Record>(&cache_key).await {
                if summary_freshness(Some(&cached), &fingerprint, ttl, false).is_fresh() {
                    let at = cached.refreshed_at;
                    return Ok(Read::new(cached, ReadSource::Cache, Some(at)));
                }
                debug!(page = %page.key, "Cached summary no longer matches page snapshot");
            }
        }

        let stored = self.inner.store.get_by_key(kind, &page.key).await?;
        let freshness = summary_freshness(stored.as_ref(), &fingerprint, ttl, force);
        if let (Freshness::Fresh, Some(record)) = (freshness, stored.as_ref()) {
            bump(&self.inner.counters.store_hits);
            self.cache_put(&cache_key, record, record.refreshed_at).await;
            return Ok(Read::new(record.clone(), ReadSource::Store, Some(record.refreshed_at)));
        }

        debug!(page = %page.key, ?freshness, force, "Summary regeneration required");
        let ctl = self.clone();
        let owned_page = page.clone();
        let prior = stored.as_ref().map(|r| r.refreshed_at);
        let result = self
            .inner
            .entities
            .run(cache_key, move || {
                ctl.summary_job(owned_page, posts, fingerprint, prior)
            })
            .await;

        match result {
            Ok(record) => {
                let at = record.refreshed_at;
                Ok(Read::new(record, ReadSource::Fetched, Some(at)))
            }
            Err(err) => {
                let fallback = stored.map(|r| {
                    let at = r.refreshed_at;
                    (r, at)
                });
                self.settle_failure(kind, &page.key, force, fallback, err)
            }
        }
    }

    fn summary_job(
        self,
        page: Record,
        posts: Vec<Record>,
        fingerprint: Fingerprint,
        prior: Option<Timestamp>,
    ) -> BoxFuture<'static, Result<Record, JobError>> {
        async move {
            let inner = &self.inner;
            let Some(summarizer) = inner.summarizer.clone() else {
                return Err(JobError::Fetch(FetchError::SourceUnavailable {
                    reason: "summarizer not configured".to_string(),
                }));
            };
            bump(&inner.counters.fetches);

            let snapshot = PageSnapshot {
                page: page.decode::<Page>()?,
                posts: posts
                    .iter()
                    .map(|p| p.decode::<Post>())
                    .collect::<Result<Vec<_>, _>>()?,
                fingerprint: fingerprint.clone(),
            };
            debug!(page = %page.key, posts = snapshot.posts.len(), "Generating summary");
            let draft = summarizer.summarize(&page.key, &snapshot).await?;

            let summary = AiSummary {
                page_id: page.key.clone(),
                summary: draft.summary,
                follower_insights: draft.follower_insights,
                engagement_insights: draft.engagement_insights,
                content_insights: draft.content_insights,
                model: draft.model,
                fingerprint: fingerprint.to_string(),
                generated_at: next_stamp(prior),
            };
            let record = Record::from_entity(&summary).map_err(|e| FetchError::Invalid {
                reason: e.to_string(),
            })?;
            inner.store.upsert(&record).await?;
            self.cache_put(
                &CacheKey::entity(EntityKind::AiSummary, page.key.as_str()),
                &record,
                record.refreshed_at,
            )
            .await;
            info!(page = %page.key, fingerprint = %fingerprint, "Summary regenerated");
            Ok(record)
        }
        .boxed()
    }

    // ------------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------------

    /// Turn a failed refresh into a stale read or a typed error.
    fn settle_failure<T>(
        &self,
        kind: EntityKind,
        key: &str,
        force: bool,
        fallback: Option<(T, Timestamp)>,
        err: JobError,
    ) -> ReadResult<Read<T>> {
        let cause = match err {
            JobError::Store(e) => return Err(ReadError::StoreUnavailable(e)),
            JobError::Parent(e) => return Err(e),
            JobError::Fetch(e) => e,
        };
        bump(&self.inner.counters.fetch_failures);

        match fallback {
            Some((value, refreshed_at)) if !force => {
                warn!(kind = %kind, key = %key, error = %cause, "Serving stale data after failed refresh");
                bump(&self.inner.counters.stale_served);
                Ok(Read::new(value, ReadSource::StaleFallback, Some(refreshed_at)))
            }
            Some(_) => Err(ReadError::FetchFailed {
                kind,
                key: key.to_string(),
                source: cause,
            }),
            None => Err(ReadError::NotFound {
                kind,
                key: key.to_string(),
                cause,
            }),
        }
    }

    async fn cache_get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let counters = &self.inner.counters;
        match self.inner.cache.get(key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(decoded) => {
                    bump(&counters.cache_hits);
                    Some(decoded)
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Ignoring undecodable cache entry");
                    bump(&counters.cache_misses);
                    None
                }
            },
            Ok(None) => {
                bump(&counters.cache_misses);
                None
            }
            Err(e) => {
                self.cache_degraded(key, &e);
                None
            }
        }
    }

    /// Cache `value` for whatever is left of its kind's TTL.
    async fn cache_put<T: Serialize>(&self, key: &CacheKey, value: &T, refreshed_at: Timestamp) {
        let ttl = self.inner.config.ttl(key.kind());
        let Some(ttl) = remaining_ttl(refreshed_at, ttl, Utc::now()) else {
            return;
        };
        let value: Value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping cache write for unserializable value");
                return;
            }
        };
        if let Err(e) = self.inner.cache.set_with_ttl(key, &value, ttl).await {
            self.cache_degraded(key, &e);
        }
    }

    fn cache_degraded(&self, key: &CacheKey, err: &CacheError) {
        bump(&self.inner.counters.cache_errors);
        warn!(key = %key, error = %err, "Cache degraded, falling through");
    }
}

fn summary_freshness(
    record: Option<&Record>,
    current: &Fingerprint,
    ttl: Duration,
    force: bool,
) -> Freshness {
    let stored_fingerprint = record
        .and_then(|r| r.field("fingerprint"))
        .and_then(Value::as_str);
    evaluate_summary(
        record.map(|r| r.refreshed_at),
        stored_fingerprint,
        current,
        ttl,
        force,
        Utc::now(),
    )
}

/// Refresh timestamp for a new write, never behind the previous one.
fn next_stamp(prior: Option<Timestamp>) -> Timestamp {
    let now = Utc::now();
    prior.map_or(now, |prior| prior.max(now))
}

fn oldest_refresh(records: &[Record]) -> Option<Timestamp> {
    records.iter().map(|r| r.refreshed_at).min()
}

/// Time left before a record refreshed at `refreshed_at` goes stale.
fn remaining_ttl(refreshed_at: Timestamp, ttl: Duration, now: Timestamp) -> Option<Duration> {
    let age = (now - refreshed_at).to_std().unwrap_or(Duration::ZERO);
    ttl.checked_sub(age).filter(|left| !left.is_zero())
}
