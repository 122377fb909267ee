//! Error types for ORGPULSE operations

use std::time::Duration;
use thiserror::Error;

use crate::EntityKind;

/// Source fetcher errors.
///
/// Cloneable because a single fetch result is fanned out to every caller
/// waiting on the same key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Source unavailable: {reason}")]
    SourceUnavailable { reason: String },

    #[error("Source has no {kind} with key {key}")]
    NotFound { kind: EntityKind, key: String },

    #[error("Rate limited by source, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Fetch deadline of {deadline:?} exceeded")]
    DeadlineExceeded { deadline: Duration },

    #[error("Invalid payload from source: {reason}")]
    Invalid { reason: String },

    #[error("Fetch task aborted: {reason}")]
    Aborted { reason: String },
}

/// Entity store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store connection failed: {reason}")]
    Connection { reason: String },

    #[error("Store query failed: {reason}")]
    Query { reason: String },

    #[error("Corrupt {kind} record {key}: {reason}")]
    Corrupt {
        kind: EntityKind,
        key: String,
        reason: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Cache client errors. Never surfaced past the controller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cache degraded: {reason}")]
pub struct CacheError {
    pub reason: String,
}

impl CacheError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Errors surfaced by the read paths.
#[derive(Debug, Clone, Error)]
pub enum ReadError {
    /// No record exists and the fetch failed or was never attempted.
    #[error("{kind} {key} not found: {cause}")]
    NotFound {
        kind: EntityKind,
        key: String,
        cause: FetchError,
    },

    /// Fetch failed and no usable stale record can stand in.
    #[error("Fetching {kind} {key} failed: {source}")]
    FetchFailed {
        kind: EntityKind,
        key: String,
        #[source]
        source: FetchError,
    },

    /// The parent of a child read could not be resolved.
    #[error("Parent {kind} {key} unresolved: {source}")]
    ParentUnresolved {
        kind: EntityKind,
        key: String,
        #[source]
        source: Box<ReadError>,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl ReadError {
    /// Stable machine-readable name of the error kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ReadError::NotFound { .. } => "not_found",
            ReadError::FetchFailed { .. } => "fetch_failed",
            ReadError::ParentUnresolved { .. } => "parent_unresolved",
            ReadError::StoreUnavailable(_) => "store_unavailable",
        }
    }

    /// Innermost cause, following parent chains.
    pub fn root(&self) -> &ReadError {
        match self {
            ReadError::ParentUnresolved { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias for read operations.
pub type ReadResult<T> = Result<T, ReadError>;

// =============================================================================
// TESTS
// =============================================================================
