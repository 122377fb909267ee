//! In-process TTL cache.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use orgpulse_core::CacheError;
use serde_json::Value;
use tokio::time::Instant;

use super::cache_key::CacheKey;
use super::traits::{CacheClient, CacheStats};

struct Entry {
    value: Value,
    expires_at: Instant,
    size_bytes: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, Entry>,
    stats: CacheStats,
}

/// `HashMap`-backed cache with lazy expiry.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<u64, CacheError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.expires_at > now);
        let removed = (before - inner.entries.len()) as u64;
        inner.stats.evictions += removed;
        refresh_sizes(&mut inner);
        Ok(removed)
    }
}

fn poisoned() -> CacheError {
    CacheError::new("cache lock poisoned")
}

fn refresh_sizes(inner: &mut Inner) {
    inner.stats.entry_count = inner.entries.len() as u64;
    inner.stats.memory_bytes = inner.entries.values().map(|e| e.size_bytes).sum();
}

#[async_trait]
impl CacheClient for InMemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>, CacheError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let now = Instant::now();
        let found = inner
            .entries
            .get(key)
            .map(|e| (e.expires_at > now, e.value.clone()));
        let live = match found {
            Some((true, value)) => Some(value),
            Some((false, _)) => {
                inner.entries.remove(key);
                inner.stats.evictions += 1;
                refresh_sizes(&mut inner);
                None
            }
            None => None,
        };
        match live {
            Some(_) => inner.stats.hits += 1,
            None => inner.stats.misses += 1,
        }
        Ok(live)
    }

    async fn set_with_ttl(
        &self,
        key: &CacheKey,
        value: &Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let size_bytes = value.to_string().len() as u64;
        inner.entries.insert(
            key.clone(),
            Entry {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
                size_bytes,
            },
        );
        refresh_sizes(&mut inner);
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgpulse_core::EntityKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = InMemoryCache::new();
        let key = CacheKey::entity(EntityKind::Page, "acme");
        cache
            .set_with_ttl(&key, &json!({"name": "Acme"}), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), Some(json!({"name": "Acme"})));

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = InMemoryCache::new();
        let key = CacheKey::children(EntityKind::Post, "acme");
        cache
            .set_with_ttl(&key, &json!([]), Duration::from_secs(5))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get(&key).await.unwrap(), None);

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = InMemoryCache::new();
        let short = CacheKey::entity(EntityKind::Post, "a");
        let long = CacheKey::entity(EntityKind::Post, "b");
        cache.set_with_ttl(&short, &json!(1), Duration::from_secs(1)).await.unwrap();
        cache.set_with_ttl(&long, &json!(2), Duration::from_secs(100)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert_eq!(cache.get(&long).await.unwrap(), Some(json!(2)));
    }
}
