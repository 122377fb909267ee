//! ORGPULSE Storage - Orchestration and Collaborators
//!
//! Decides, for every read, whether to answer from the cache, from the
//! entity store or from a fresh source fetch, and makes sure concurrent
//! readers of one key trigger at most one fetch.
//!
//! Stores, caches, fetchers and summarizers are traits; production
//! implementations live in `orgpulse-api` and `orgpulse-llm`, in-memory ones
//! here.

pub mod cache;
pub mod hierarchy;
pub mod memory;
pub mod query;
pub mod threads;
pub mod traits;

pub use cache::{
    evaluate, evaluate_summary, CacheAsideController, CacheClient, CacheKey, CacheStats,
    FlightStats, Freshness, InMemoryCache, KeyScope, LmdbCacheClient, LmdbCacheError,
    OrchestratorStats, Read, ReadSource, SingleFlight,
};
pub use hierarchy::{HierarchicalFetcher, ReadOptions, RefreshReport};
pub use memory::InMemoryEntityStore;
pub use query::{build_filters, listing_order, page_window, QueryEngine, QueryPage};
pub use traits::{
    EntityStore, FetchContext, PageSnapshot, SourceFetcher, Summarizer, SummaryDraft,
};
