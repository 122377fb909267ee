//! ORGPULSE LLM - page summarizers
//!
//! Implementations of the storage crate's `Summarizer` trait backed by
//! hosted language models, plus token usage accounting.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod providers;

pub use providers::anthropic::summarization::{build_prompt, parse_reply, DEFAULT_MODEL};
pub use providers::{AnthropicClient, AnthropicSummarizer};

// ============================================================================
// USAGE TRACKER
// ============================================================================

/// Tracks completion requests and token usage.
/// Thread-safe via atomic operations.
pub struct UsageTracker {
    requests: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

/// Point-in-time copy of a [`UsageTracker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
        }
    }

    /// Record one completed request.
    pub fn record(&self, input_tokens: u64, output_tokens: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.input_tokens.fetch_add(input_tokens, Ordering::Relaxed);
        self.output_tokens.fetch_add(output_tokens, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.input_tokens.store(0, Ordering::Relaxed);
        self.output_tokens.store(0, Ordering::Relaxed);
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UsageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("UsageTracker")
            .field("requests", &snapshot.requests)
            .field("input_tokens", &snapshot.input_tokens)
            .field("output_tokens", &snapshot.output_tokens)
            .finish()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_tracker_accumulates() {
        let tracker = UsageTracker::new();
        tracker.record(100, 20);
        tracker.record(50, 5);
        assert_eq!(
            tracker.snapshot(),
            UsageSnapshot {
                requests: 2,
                input_tokens: 150,
                output_tokens: 25,
            }
        );
    }

    #[test]
    fn test_usage_tracker_reset() {
        let tracker = UsageTracker::default();
        tracker.record(1, 1);
        tracker.reset();
        assert_eq!(tracker.snapshot(), UsageSnapshot::default());
    }

    #[test]
    fn test_summarizer_shares_usage_handle() {
        let summarizer = AnthropicSummarizer::with_default_model("k");
        let usage = summarizer.usage();
        usage.record(3, 4);
        assert_eq!(summarizer.usage().snapshot().requests, 1);
    }
}
