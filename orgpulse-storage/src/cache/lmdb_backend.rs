//! LMDB-backed cache client.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a persistent,
//! memory-mapped TTL cache that survives process restarts.
//!
//! # Value Layout
//!
//! Each value is stored as `[expires_at: 8 bytes LE millis][json]`. Expiry is
//! wall-clock based, so entries written before a restart keep their deadline.
//! Expired entries are treated as misses and deleted on read.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use orgpulse_core::CacheError;
use serde_json::Value;

use super::cache_key::CacheKey;
use super::traits::{CacheClient, CacheStats};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::new(e.to_string())
    }
}

/// LMDB-backed TTL cache.
///
/// # Example
///
/// ```ignore
/// use orgpulse_storage::cache::{CacheClient, CacheKey, LmdbCacheClient};
///
/// let cache = LmdbCacheClient::new("/var/cache/orgpulse", 256)?;
/// let key = CacheKey::entity(EntityKind::Page, "acme");
/// cache.set_with_ttl(&key, &value, Duration::from_secs(300)).await?;
/// ```
pub struct LmdbCacheClient {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Hit/miss/eviction counters.
    stats: Arc<RwLock<CacheStats>>,
}

impl LmdbCacheClient {
    /// Create a new LMDB cache client.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment directory is owned by this process and not
        // opened twice within it.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        })
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }

    fn delete_keys(&self, keys: &[Vec<u8>]) -> Result<u64, LmdbCacheError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in keys {
            if self
                .db
                .delete(&mut wtxn, key.as_slice())
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        Ok(deleted)
    }

    /// Delete every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<u64, LmdbCacheError> {
        let now_ms = Utc::now().timestamp_millis();
        let expired = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            let iter = self
                .db
                .iter(&rtxn)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

            let mut keys = Vec::new();
            for result in iter {
                let (key, bytes) = result.map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
                if decode_expiry(bytes).map(|exp| exp <= now_ms).unwrap_or(true) {
                    keys.push(key.to_vec());
                }
            }
            keys
        };

        let deleted = self.delete_keys(&expired)?;
        self.record(|s| s.evictions += deleted);
        Ok(deleted)
    }

    fn entry_count(&self) -> Result<u64, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        self.db
            .len(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))
    }
}

fn decode_expiry(bytes: &[u8]) -> Option<i64> {
    let header: [u8; 8] = bytes.get(0..8)?.try_into().ok()?;
    Some(i64::from_le_bytes(header))
}

#[async_trait]
impl CacheClient for LmdbCacheClient {
    async fn get(&self, key: &CacheKey) -> Result<Option<Value>, CacheError> {
        let encoded_key = key.encode();

        // Decode inside the read transaction, the borrowed bytes die with it.
        let lookup = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

            match self.db.get(&rtxn, encoded_key.as_slice()) {
                Ok(Some(bytes)) => {
                    let expires_at = decode_expiry(bytes).ok_or_else(|| {
                        LmdbCacheError::Deserialization("Invalid expiry header".into())
                    })?;
                    if expires_at <= Utc::now().timestamp_millis() {
                        Some(None)
                    } else {
                        let value: Value = serde_json::from_slice(&bytes[8..])
                            .map_err(|e| LmdbCacheError::Deserialization(e.to_string()))?;
                        Some(Some(value))
                    }
                }
                Ok(None) => None,
                Err(e) => {
                    self.record(|s| s.misses += 1);
                    return Err(LmdbCacheError::Transaction(e.to_string()).into());
                }
            }
        };

        match lookup {
            Some(Some(value)) => {
                self.record(|s| s.hits += 1);
                Ok(Some(value))
            }
            Some(None) => {
                let deleted = self.delete_keys(&[encoded_key])?;
                self.record(|s| {
                    s.misses += 1;
                    s.evictions += deleted;
                });
                Ok(None)
            }
            None => {
                self.record(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn set_with_ttl(
        &self,
        key: &CacheKey,
        value: &Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let encoded_key = key.encode();

        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_ms);
        let value_bytes =
            serde_json::to_vec(value).map_err(|e| LmdbCacheError::Serialization(e.to_string()))?;

        let mut full_bytes = Vec::with_capacity(8 + value_bytes.len());
        full_bytes.extend_from_slice(&expires_at.to_le_bytes());
        full_bytes.extend_from_slice(&value_bytes);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, encoded_key.as_slice(), full_bytes.as_slice())
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.record(|s| s.memory_bytes += full_bytes.len() as u64);
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.entry_count = self.entry_count()?;
        Ok(stats)
    }
}
