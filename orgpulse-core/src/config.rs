//! Orchestration configuration
//!
//! Loaded from `ORGPULSE_*` environment variables with defaults that mirror
//! the production deployment (5 minute TTLs, 10/100 page sizes).

use std::time::Duration;

use crate::error::ConfigError;
use crate::EntityKind;

/// Default TTL applied to every kind unless overridden.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Per-kind time-to-live values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindTtls {
    pub page: Duration,
    pub post: Duration,
    pub employee: Duration,
    pub comment: Duration,
    pub ai_summary: Duration,
}

impl KindTtls {
    pub fn uniform(ttl: Duration) -> Self {
        Self {
            page: ttl,
            post: ttl,
            employee: ttl,
            comment: ttl,
            ai_summary: ttl,
        }
    }

    pub fn get(&self, kind: EntityKind) -> Duration {
        match kind {
            EntityKind::Page => self.page,
            EntityKind::Post => self.post,
            EntityKind::Employee => self.employee,
            EntityKind::Comment => self.comment,
            EntityKind::AiSummary => self.ai_summary,
        }
    }

    fn slot(&mut self, kind: EntityKind) -> &mut Duration {
        match kind {
            EntityKind::Page => &mut self.page,
            EntityKind::Post => &mut self.post,
            EntityKind::Employee => &mut self.employee,
            EntityKind::Comment => &mut self.comment,
            EntityKind::AiSummary => &mut self.ai_summary,
        }
    }
}

impl Default for KindTtls {
    fn default() -> Self {
        Self::uniform(DEFAULT_TTL)
    }
}

/// Configuration for the orchestration layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// TTL per entity kind; also used as the cache entry TTL.
    pub ttls: KindTtls,
    /// Page size used when a query does not specify one.
    pub default_page_size: usize,
    /// Upper clamp for query page sizes.
    pub max_page_size: usize,
    /// Deadline applied to every source fetch.
    pub fetch_deadline: Duration,
    /// Maximum children requested per listing fetch.
    pub max_children: usize,
    /// Whether a forced child read also forces its parent.
    pub cascade_force: bool,
    /// Posts included in a summary snapshot.
    pub summary_post_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ttls: KindTtls::default(),
            default_page_size: 10,
            max_page_size: 100,
            fetch_deadline: Duration::from_secs(30),
            max_children: 15,
            cascade_force: false,
            summary_post_limit: 5,
        }
    }
}

impl OrchestratorConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// TTL for a kind.
    pub fn ttl(&self, kind: EntityKind) -> Duration {
        self.ttls.get(kind)
    }

    /// Set the TTL for one kind.
    pub fn with_ttl(mut self, kind: EntityKind, ttl: Duration) -> Self {
        *self.ttls.slot(kind) = ttl;
        self
    }

    /// Set the same TTL for every kind.
    pub fn with_uniform_ttl(mut self, ttl: Duration) -> Self {
        self.ttls = KindTtls::uniform(ttl);
        self
    }

    pub fn with_page_sizes(mut self, default_page_size: usize, max_page_size: usize) -> Self {
        self.default_page_size = default_page_size;
        self.max_page_size = max_page_size;
        self
    }

    pub fn with_fetch_deadline(mut self, deadline: Duration) -> Self {
        self.fetch_deadline = deadline;
        self
    }

    pub fn with_max_children(mut self, max: usize) -> Self {
        self.max_children = max;
        self
    }

    pub fn with_cascade_force(mut self, enabled: bool) -> Self {
        self.cascade_force = enabled;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `ORGPULSE_CACHE_TTL_SECS`: TTL for every kind (default: 300)
    /// - `ORGPULSE_TTL_<KIND>_SECS`: per-kind override, e.g. `ORGPULSE_TTL_AI_SUMMARY_SECS`
    /// - `ORGPULSE_DEFAULT_PAGE_SIZE`: default query page size (default: 10)
    /// - `ORGPULSE_MAX_PAGE_SIZE`: page size clamp (default: 100)
    /// - `ORGPULSE_FETCH_DEADLINE_SECS`: per-fetch deadline (default: 30)
    /// - `ORGPULSE_MAX_CHILDREN`: children per listing fetch (default: 15)
    /// - `ORGPULSE_CASCADE_FORCE`: "true" to force parents of forced reads (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let uniform = parse_var(&lookup, "ORGPULSE_CACHE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TTL);
        let mut ttls = KindTtls::uniform(uniform);
        for kind in EntityKind::ALL {
            let name = format!("ORGPULSE_TTL_{}_SECS", kind.as_str().to_uppercase());
            if let Some(secs) = parse_var(&lookup, &name)? {
                *ttls.slot(kind) = Duration::from_secs(secs);
            }
        }

        let config = Self {
            ttls,
            default_page_size: parse_var(&lookup, "ORGPULSE_DEFAULT_PAGE_SIZE")?
                .unwrap_or(defaults.default_page_size),
            max_page_size: parse_var(&lookup, "ORGPULSE_MAX_PAGE_SIZE")?
                .unwrap_or(defaults.max_page_size),
            fetch_deadline: parse_var(&lookup, "ORGPULSE_FETCH_DEADLINE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.fetch_deadline),
            max_children: parse_var(&lookup, "ORGPULSE_MAX_CHILDREN")?
                .unwrap_or(defaults.max_children),
            cascade_force: lookup("ORGPULSE_CASCADE_FORCE")
                .map(|s| s.eq_ignore_ascii_case("true") || s == "1")
                .unwrap_or(defaults.cascade_force),
            summary_post_limit: parse_var(&lookup, "ORGPULSE_SUMMARY_POST_LIMIT")?
                .unwrap_or(defaults.summary_post_limit),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in EntityKind::ALL {
            if self.ttl(kind).is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: format!("ttl.{}", kind),
                    value: "0".to_string(),
                    reason: "TTL must be positive".to_string(),
                });
            }
        }
        if self.max_page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_page_size".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(ConfigError::InvalidValue {
                field: "default_page_size".to_string(),
                value: self.default_page_size.to_string(),
                reason: format!("must be between 1 and max_page_size ({})", self.max_page_size),
            });
        }
        if self.fetch_deadline.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "fetch_deadline".to_string(),
                value: "0".to_string(),
                reason: "deadline must be positive".to_string(),
            });
        }
        if self.max_children == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_children".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
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
