//! Prometheus Metrics Definitions
//!
//! HTTP request metrics plus gauges mirroring the orchestrator, cache and
//! summarizer counters. Gauges are refreshed on every `/metrics` scrape.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use orgpulse_llm::UsageSnapshot;
use orgpulse_storage::{CacheStats, OrchestratorStats};
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge_vec, CounterVec, Encoder,
    HistogramVec, IntGaugeVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s, 30s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<OrgpulseMetrics>> = Lazy::new(OrgpulseMetrics::new);

/// Container for all ORGPULSE metrics.
#[derive(Clone)]
pub struct OrgpulseMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Orchestrator counters - labels: event
    pub orchestrator: IntGaugeVec,

    /// Cache client statistics - labels: stat
    pub cache: IntGaugeVec,

    /// Summarizer usage - labels: counter
    pub summarizer: IntGaugeVec,
}

fn gauge_value(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl OrgpulseMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "orgpulse_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "orgpulse_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            orchestrator: register_int_gauge_vec!(
                "orgpulse_orchestrator",
                "Cache-aside controller counters since startup",
                &["event"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register orchestrator: {}", e)))?,

            cache: register_int_gauge_vec!(
                "orgpulse_cache",
                "Cache client statistics",
                &["stat"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache: {}", e)))?,

            summarizer: register_int_gauge_vec!(
                "orgpulse_summarizer",
                "Summarizer requests and token usage since startup",
                &["counter"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register summarizer: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn observe_orchestrator(&self, stats: &OrchestratorStats) {
        let events = [
            ("cache_hits", stats.cache_hits),
            ("cache_misses", stats.cache_misses),
            ("cache_errors", stats.cache_errors),
            ("store_hits", stats.store_hits),
            ("fetches", stats.fetches),
            ("fetch_failures", stats.fetch_failures),
            ("stale_served", stats.stale_served),
            ("flight_joins", stats.flight_joins),
            ("flight_timeouts", stats.flight_timeouts),
            ("in_flight", stats.in_flight as u64),
        ];
        for (event, value) in events {
            self.orchestrator
                .with_label_values(&[event])
                .set(gauge_value(value));
        }
    }

    pub fn observe_cache(&self, stats: &CacheStats) {
        let values = [
            ("hits", stats.hits),
            ("misses", stats.misses),
            ("entries", stats.entry_count),
            ("bytes", stats.memory_bytes),
            ("evictions", stats.evictions),
        ];
        for (stat, value) in values {
            self.cache.with_label_values(&[stat]).set(gauge_value(value));
        }
    }

    pub fn observe_usage(&self, usage: &UsageSnapshot) {
        let values = [
            ("requests", usage.requests),
            ("input_tokens", usage.input_tokens),
            ("output_tokens", usage.output_tokens),
        ];
        for (counter, value) in values {
            self.summarizer
                .with_label_values(&[counter])
                .set(gauge_value(value));
        }
    }
}

/// Copy current orchestrator, cache and summarizer counters into gauges.
async fn refresh_gauges(metrics: &OrgpulseMetrics, state: &AppState) {
    metrics.observe_orchestrator(&state.controller().stats());
    match state.cache.stats().await {
        Ok(stats) => metrics.observe_cache(&stats),
        Err(e) => tracing::debug!(error = %e, "Cache stats unavailable"),
    }
    if let Some(usage) = &state.usage {
        metrics.observe_usage(&usage.snapshot());
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    if let Ok(metrics) = METRICS.as_ref() {
        refresh_gauges(metrics, &state).await;
    }

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
