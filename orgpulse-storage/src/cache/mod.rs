//! Cache layer: freshness policy, cache clients and the cache-aside read path.
//!
//! Staleness is never hidden. Reads return [`Read<T>`], which records where
//! the value came from, and a value served after a failed refresh is marked
//! [`ReadSource::StaleFallback`] rather than passed off as current.
//!
//! Concurrent refreshes of the same key are collapsed by [`SingleFlight`], so
//! a hot key going stale triggers one source fetch, not one per reader.

pub mod cache_key;
pub mod freshness;
pub mod lmdb_backend;
pub mod memory;
pub mod read_through;
pub mod single_flight;
pub mod traits;

pub use cache_key::{CacheKey, KeyScope};
pub use freshness::{evaluate, evaluate_summary, Freshness, Read, ReadSource};
pub use lmdb_backend::{LmdbCacheClient, LmdbCacheError};
pub use memory::InMemoryCache;
pub use read_through::{CacheAsideController, OrchestratorStats};
pub use single_flight::{FlightStats, SingleFlight};
pub use traits::{CacheClient, CacheStats};
