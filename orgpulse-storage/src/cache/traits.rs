//! Cache client trait and statistics.

use std::time::Duration;

use async_trait::async_trait;
use orgpulse_core::CacheError;
use serde::Serialize;
use serde_json::Value;

use super::cache_key::CacheKey;

/// Key-value cache with per-entry TTL.
///
/// Best-effort by contract: callers treat every error as a miss.
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Get a live (unexpired) value.
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>, CacheError>;

    /// Store a value that expires after `ttl`.
    async fn set_with_ttl(&self, key: &CacheKey, value: &Value, ttl: Duration)
        -> Result<(), CacheError>;

    /// Get cache statistics.
    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, expired entries included.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate payload size in bytes.
    pub memory_bytes: u64,
    /// Number of entries dropped on expiry.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
