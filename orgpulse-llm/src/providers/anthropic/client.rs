//! Anthropic HTTP client with rate limiting

use super::types::{ApiError, MessageRequest, MessageResponse};
use orgpulse_core::FetchError;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const API_VERSION: &str = "2023-06-01";

/// Retry hint used when a 429 carries no usable `retry-after` header.
const DEFAULT_RETRY_AFTER_MS: u64 = 60_000;

/// Anthropic API client with rate limiting.
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    rate_limiter: Arc<Semaphore>,
    last_request: Arc<Mutex<Option<Instant>>>,
    min_request_interval: Duration,
}

impl AnthropicClient {
    /// Create a new Anthropic client.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key
    /// * `requests_per_minute` - Maximum requests per minute
    pub fn new(api_key: impl Into<String>, requests_per_minute: u32) -> Self {
        let requests_per_minute = requests_per_minute.max(1);
        let permits = requests_per_minute as usize;
        let min_interval_ms = (60_000 / u64::from(requests_per_minute)).max(10);

        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            rate_limiter: Arc::new(Semaphore::new(permits)),
            last_request: Arc::new(Mutex::new(None)),
            min_request_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Point the client at a different API root (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a Messages API request with automatic rate limiting.
    pub async fn messages(&self, body: &MessageRequest) -> Result<MessageResponse, FetchError> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| FetchError::SourceUnavailable {
                reason: format!("anthropic rate limiter closed: {}", e),
            })?;

        // Enforce minimum interval between requests
        {
            let mut last = self.last_request.lock().await;
            if let Some(previous) = *last {
                let elapsed = previous.elapsed();
                if elapsed < self.min_request_interval {
                    tokio::time::sleep(self.min_request_interval - elapsed).await;
                }
            }
            *last = Some(Instant::now());
        }

        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| FetchError::SourceUnavailable {
                reason: format!("anthropic request failed: {}", e),
            })?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| FetchError::Invalid {
                reason: format!("anthropic response unreadable: {}", e),
            });
        }

        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(|secs| secs.saturating_mul(1_000))
            .unwrap_or(DEFAULT_RETRY_AFTER_MS);
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        Err(status_error(status, &error_text, retry_after_ms))
    }
}

/// Map a non-success status and body to a fetch error.
fn status_error(status: StatusCode, body: &str, retry_after_ms: u64) -> FetchError {
    let message = match serde_json::from_str::<ApiError>(body) {
        Ok(api_error) => format!("{}: {}", api_error.error.r#type, api_error.error.message),
        Err(_) => body.to_string(),
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { retry_after_ms },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::SourceUnavailable {
            reason: "anthropic rejected the API key".to_string(),
        },
        StatusCode::BAD_REQUEST => FetchError::Invalid {
            reason: format!("anthropic rejected the request: {}", message),
        },
        _ => FetchError::SourceUnavailable {
            reason: format!("anthropic returned {}: {}", status.as_u16(), message),
        },
    }
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("min_request_interval", &self.min_request_interval)
            .finish()
    }
}
