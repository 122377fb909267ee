//! HTTP client for the external scraper service.
//!
//! The scraper owns browser automation and DOM parsing; this client only
//! asks it for one entity or one parent's children and validates the JSON
//! it returns against the typed entity models.

use async_trait::async_trait;
use orgpulse_core::{Comment, Employee, Entity, EntityKind, FetchError, Page, Post, Record};
use orgpulse_storage::{FetchContext, SourceFetcher};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Retry hint used when a 429 carries no usable `retry-after` header.
const DEFAULT_RETRY_AFTER_MS: u64 = 30_000;

/// Scraper service client with concurrency limiting.
pub struct ScraperClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    permits: Arc<Semaphore>,
}

impl ScraperClient {
    /// # Arguments
    /// * `base_url` - Scraper root, e.g. `http://scraper:8100`
    /// * `max_concurrent` - Scrapes allowed to run at once
    pub fn new(base_url: impl Into<String>, max_concurrent: u32) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            permits: Arc::new(Semaphore::new((max_concurrent as usize).max(1))),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, url: String, ctx: &FetchContext) -> RequestBuilder {
        let request = self
            .client
            .get(url)
            .timeout(ctx.deadline)
            .header("x-request-id", ctx.request_id.to_string());
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        kind: EntityKind,
        key: &str,
        ctx: &FetchContext,
    ) -> Result<Value, FetchError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| FetchError::SourceUnavailable {
                reason: format!("scraper limiter closed: {}", e),
            })?;

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::DeadlineExceeded {
                    deadline: ctx.deadline,
                }
            } else {
                FetchError::SourceUnavailable {
                    reason: format!("scraper request failed: {}", e),
                }
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|e| FetchError::Invalid {
                reason: format!("scraper response unreadable: {}", e),
            });
        }

        let retry_after_ms = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(|secs| secs.saturating_mul(1_000));
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, kind, key, retry_after_ms, &body))
    }
}

/// Path of a single entity on the scraper.
pub fn entity_path(kind: EntityKind, key: &str) -> Option<String> {
    let collection = match kind {
        EntityKind::Page => "pages",
        EntityKind::Post => "posts",
        EntityKind::Employee => "employees",
        EntityKind::Comment => "comments",
        EntityKind::AiSummary => return None,
    };
    Some(format!("/{}/{}", collection, encode_segment(key)))
}

/// Path of a child listing on the scraper.
pub fn children_path(kind: EntityKind, parent_key: &str, limit: usize) -> Option<String> {
    let (parent, children) = match kind {
        EntityKind::Post => ("pages", "posts"),
        EntityKind::Employee => ("pages", "employees"),
        EntityKind::Comment => ("posts", "comments"),
        EntityKind::Page | EntityKind::AiSummary => return None,
    };
    Some(format!(
        "/{}/{}/{}?limit={}",
        parent,
        encode_segment(parent_key),
        children,
        limit
    ))
}

/// Percent-encode everything outside the unreserved set.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

fn status_error(
    status: StatusCode,
    kind: EntityKind,
    key: &str,
    retry_after_ms: Option<u64>,
    body: &str,
) -> FetchError {
    match status {
        StatusCode::NOT_FOUND => FetchError::NotFound {
            kind,
            key: key.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited {
            retry_after_ms: retry_after_ms.unwrap_or(DEFAULT_RETRY_AFTER_MS),
        },
        StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => FetchError::Invalid {
            reason: format!("scraper rejected {} {}: {}", kind, key, body.trim()),
        },
        _ => FetchError::SourceUnavailable {
            reason: format!("scraper returned {} for {} {}", status.as_u16(), kind, key),
        },
    }
}

fn typed<E: Entity>(value: Value) -> Result<Record, FetchError> {
    let entity: E = serde_json::from_value(value).map_err(|e| FetchError::Invalid {
        reason: format!("malformed {}: {}", E::KIND, e),
    })?;
    Record::from_entity(&entity).map_err(|e| FetchError::Invalid {
        reason: format!("unencodable {}: {}", E::KIND, e),
    })
}

/// Validate a scraped JSON body as an entity of `kind`.
pub fn decode_entity(kind: EntityKind, value: Value) -> Result<Record, FetchError> {
    match kind {
        EntityKind::Page => typed::<Page>(value),
        EntityKind::Post => typed::<Post>(value),
        EntityKind::Employee => typed::<Employee>(value),
        EntityKind::Comment => typed::<Comment>(value),
        EntityKind::AiSummary => Err(FetchError::Invalid {
            reason: "summaries are not scraped".to_string(),
        }),
    }
}

/// Validate a scraped listing. Accepts a bare array or `{ "items": [...] }`.
pub fn decode_children(kind: EntityKind, value: Value) -> Result<Vec<Record>, FetchError> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(FetchError::Invalid {
                    reason: format!("{} listing has no items array", kind),
                })
            }
        },
        _ => {
            return Err(FetchError::Invalid {
                reason: format!("{} listing is not an array", kind),
            })
        }
    };
    items
        .into_iter()
        .map(|item| decode_entity(kind, item))
        .collect()
}

#[async_trait]
impl SourceFetcher for ScraperClient {
    async fn fetch(
        &self,
        kind: EntityKind,
        key: &str,
        ctx: &FetchContext,
    ) -> Result<Record, FetchError> {
        let path = entity_path(kind, key).ok_or_else(|| FetchError::Invalid {
            reason: format!("{} cannot be scraped", kind),
        })?;
        tracing::debug!(kind = %kind, key = %key, request_id = %ctx.request_id, "Scraping entity");
        let body = self
            .send(self.get(format!("{}{}", self.base_url, path), ctx), kind, key, ctx)
            .await?;
        decode_entity(kind, body)
    }

    async fn fetch_children(
        &self,
        kind: EntityKind,
        parent_key: &str,
        ctx: &FetchContext,
    ) -> Result<Vec<Record>, FetchError> {
        let path = children_path(kind, parent_key, ctx.limit).ok_or_else(|| FetchError::Invalid {
            reason: format!("{} has no scraped listing", kind),
        })?;
        tracing::debug!(
            kind = %kind,
            parent = %parent_key,
            limit = ctx.limit,
            request_id = %ctx.request_id,
            "Scraping listing"
        );
        let parent_kind = kind.parent().unwrap_or(EntityKind::Page);
        let body = self
            .send(
                self.get(format!("{}{}", self.base_url, path), ctx),
                parent_kind,
                parent_key,
                ctx,
            )
            .await?;
        decode_children(kind, body)
    }
}

impl std::fmt::Debug for ScraperClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScraperClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
