//! Freshness decisions and read results.
//!
//! [`evaluate`] is the single place that decides whether stored data may be
//! served. It is pure: no clocks are read and no I/O happens here, callers
//! pass `now` in.

use std::time::Duration;

use chrono::TimeDelta;
use orgpulse_core::{Fingerprint, Timestamp};
use serde::Serialize;

/// Outcome of a freshness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// No record exists.
    Missing,
    /// A record exists but must be refreshed.
    Stale,
    /// The record may be served as is.
    Fresh,
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// Decide freshness from a record timestamp.
///
/// A forced read is always `Stale` when a record exists. Records stamped in
/// the future (clock skew) count as fresh.
pub fn evaluate(
    record_timestamp: Option<Timestamp>,
    ttl: Duration,
    force: bool,
    now: Timestamp,
) -> Freshness {
    let Some(ts) = record_timestamp else {
        return Freshness::Missing;
    };
    if force {
        return Freshness::Stale;
    }
    // A TTL too large for chrono never expires.
    let expired = TimeDelta::from_std(ttl)
        .map(|ttl| now - ts > ttl)
        .unwrap_or(false);
    if expired {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}

/// Freshness of a stored summary.
///
/// Same as [`evaluate`], and additionally `Stale` when the stored fingerprint
/// differs from the fingerprint of the current page and posts, however young
/// the summary is.
pub fn evaluate_summary(
    generated_at: Option<Timestamp>,
    stored_fingerprint: Option<&str>,
    current: &Fingerprint,
    ttl: Duration,
    force: bool,
    now: Timestamp,
) -> Freshness {
    match evaluate(generated_at, ttl, force, now) {
        Freshness::Fresh => match stored_fingerprint {
            Some(stored) if current.matches(stored) => Freshness::Fresh,
            _ => Freshness::Stale,
        },
        other => other,
    }
}

/// Where a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadSource {
    /// Cache hit.
    Cache,
    /// Fresh record from the entity store.
    Store,
    /// Just fetched from the source.
    Fetched,
    /// Stale record served because the refresh failed.
    StaleFallback,
}

impl ReadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadSource::Cache => "cache",
            ReadSource::Store => "store",
            ReadSource::Fetched => "fetched",
            ReadSource::StaleFallback => "stale_fallback",
        }
    }
}

/// Result of a read, carrying staleness metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Read<T> {
    value: T,
    source: ReadSource,
    refreshed_at: Option<Timestamp>,
}

impl<T> Read<T> {
    pub fn new(value: T, source: ReadSource, refreshed_at: Option<Timestamp>) -> Self {
        Self {
            value,
            source,
            refreshed_at,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Get a reference to the underlying value.
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    /// True when the value is a stale fallback for a failed refresh.
    pub fn is_stale(&self) -> bool {
        self.source == ReadSource::StaleFallback
    }

    /// When the underlying data was last refreshed from the source.
    pub fn refreshed_at(&self) -> Option<Timestamp> {
        self.refreshed_at
    }

    /// Age of the data as of `now`.
    pub fn age(&self, now: Timestamp) -> Option<Duration> {
        self.refreshed_at
            .and_then(|ts| (now - ts).to_std().ok())
    }

    /// Map the value while preserving metadata.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Read<U> {
        Read {
            value: f(self.value),
            source: self.source,
            refreshed_at: self.refreshed_at,
        }
    }
}
