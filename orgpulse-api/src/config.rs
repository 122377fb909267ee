//! API Configuration Module
//!
//! Server, CORS, cache backend and collaborator settings. Loaded from
//! `ORGPULSE_*` environment variables with defaults for local development.
//! Orchestration settings (TTLs, page sizes, deadlines) live in
//! `orgpulse_core::OrchestratorConfig`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use orgpulse_core::ConfigError;

// ============================================================================
// CACHE BACKEND
// ============================================================================

/// Which cache the controller talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    /// Process-local map; lost on restart.
    Memory,
    /// Memory-mapped LMDB environment at `path`.
    Lmdb { path: PathBuf, size_mb: usize },
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Interface to bind.
    pub host: String,
    pub port: u16,

    /// Allowed CORS origins. Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,
    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    /// Requests processed concurrently before callers queue.
    pub max_concurrent_requests: usize,

    pub cache_backend: CacheBackend,
    /// How often expired cache entries are purged.
    pub cache_purge_interval: Duration,

    /// Root URL of the scraper service.
    pub scraper_base_url: String,
    pub scraper_api_key: Option<String>,
    /// Scrapes allowed to run at once.
    pub scraper_max_concurrent: u32,

    /// Without a key the summary endpoint answers 503.
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub anthropic_requests_per_minute: u32,

    /// Emit JSON log lines instead of the human-readable format.
    pub log_json: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: Vec::new(),
            cors_max_age_secs: 86400,
            max_concurrent_requests: 256,
            cache_backend: CacheBackend::Memory,
            cache_purge_interval: Duration::from_secs(60),
            scraper_base_url: "http://localhost:8100".to_string(),
            scraper_api_key: None,
            scraper_max_concurrent: 4,
            anthropic_api_key: None,
            anthropic_model: orgpulse_llm::DEFAULT_MODEL.to_string(),
            anthropic_requests_per_minute: 50,
            log_json: false,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `ORGPULSE_API_HOST` / `ORGPULSE_API_PORT` (or `PORT`): bind address (default: 0.0.0.0:8000)
    /// - `ORGPULSE_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `ORGPULSE_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `ORGPULSE_MAX_CONCURRENT_REQUESTS`: in-flight request cap (default: 256)
    /// - `ORGPULSE_CACHE_BACKEND`: "memory" or "lmdb" (default: memory)
    /// - `ORGPULSE_CACHE_PATH`: LMDB directory (default: ./data/cache)
    /// - `ORGPULSE_CACHE_SIZE_MB`: LMDB map size (default: 256)
    /// - `ORGPULSE_CACHE_PURGE_SECS`: expired-entry sweep interval (default: 60)
    /// - `ORGPULSE_SCRAPER_URL`, `ORGPULSE_SCRAPER_API_KEY`, `ORGPULSE_SCRAPER_CONCURRENCY`
    /// - `ANTHROPIC_API_KEY`, `ORGPULSE_SUMMARY_MODEL`, `ORGPULSE_SUMMARY_RPM`
    /// - `ORGPULSE_LOG_JSON`: "true" for JSON logs
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let cors_origins = lookup("ORGPULSE_CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cache_backend = match lookup("ORGPULSE_CACHE_BACKEND")
            .map(|s| s.trim().to_lowercase())
            .as_deref()
        {
            None | Some("") | Some("memory") => CacheBackend::Memory,
            Some("lmdb") => CacheBackend::Lmdb {
                path: lookup("ORGPULSE_CACHE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/cache")),
                size_mb: parse_var(&lookup, "ORGPULSE_CACHE_SIZE_MB")?.unwrap_or(256),
            },
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    field: "ORGPULSE_CACHE_BACKEND".to_string(),
                    value: other.to_string(),
                    reason: "expected memory or lmdb".to_string(),
                })
            }
        };

        let port = match lookup("PORT") {
            Some(raw) => Some(raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "PORT".to_string(),
                value: raw.clone(),
                reason: "not a valid port".to_string(),
            })?),
            None => parse_var(&lookup, "ORGPULSE_API_PORT")?,
        };

        let config = Self {
            host: lookup("ORGPULSE_API_HOST").unwrap_or(defaults.host),
            port: port.unwrap_or(defaults.port),
            cors_origins,
            cors_max_age_secs: parse_var(&lookup, "ORGPULSE_CORS_MAX_AGE_SECS")?
                .unwrap_or(defaults.cors_max_age_secs),
            max_concurrent_requests: parse_var(&lookup, "ORGPULSE_MAX_CONCURRENT_REQUESTS")?
                .unwrap_or(defaults.max_concurrent_requests),
            cache_backend,
            cache_purge_interval: parse_var(&lookup, "ORGPULSE_CACHE_PURGE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_purge_interval),
            scraper_base_url: lookup("ORGPULSE_SCRAPER_URL").unwrap_or(defaults.scraper_base_url),
            scraper_api_key: lookup("ORGPULSE_SCRAPER_API_KEY").filter(|k| !k.trim().is_empty()),
            scraper_max_concurrent: parse_var(&lookup, "ORGPULSE_SCRAPER_CONCURRENCY")?
                .unwrap_or(defaults.scraper_max_concurrent),
            anthropic_api_key: lookup("ANTHROPIC_API_KEY").filter(|k| !k.trim().is_empty()),
            anthropic_model: lookup("ORGPULSE_SUMMARY_MODEL").unwrap_or(defaults.anthropic_model),
            anthropic_requests_per_minute: parse_var(&lookup, "ORGPULSE_SUMMARY_RPM")?
                .unwrap_or(defaults.anthropic_requests_per_minute),
            log_json: lookup("ORGPULSE_LOG_JSON")
                .map(|s| s.eq_ignore_ascii_case("true") || s == "1")
                .unwrap_or(false),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_requests".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.cache_purge_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "cache_purge_interval".to_string(),
                value: "0".to_string(),
                reason: "interval must be positive".to_string(),
            });
        }
        if !self.scraper_base_url.starts_with("http://")
            && !self.scraper_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue {
                field: "scraper_base_url".to_string(),
                value: self.scraper_base_url.clone(),
                reason: "must be an http(s) URL".to_string(),
            });
        }
        Ok(())
    }

    /// Socket address to bind.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ConfigError::InvalidValue {
            field: "bind address".to_string(),
            value: addr.clone(),
            reason: "not a socket address".to_string(),
        })
    }

    /// Whether summaries can be generated.
    pub fn summaries_enabled(&self) -> bool {
        self.anthropic_api_key.is_some()
    }
}

fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: "not a valid number".to_string(),
            }),
    }
}
