//! ORGPULSE Core - Entity Types
//!
//! Pure data structures shared by every other crate: the entity model,
//! the record envelope persisted by stores and caches, filter expressions,
//! error enums and orchestration configuration.
//!
//! This crate performs no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod config;
pub mod entities;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod record;

pub use config::OrchestratorConfig;
pub use entities::{AiSummary, Comment, Employee, Entity, Industry, Page, Post, PostType, Reactions};
pub use error::{CacheError, ConfigError, FetchError, ReadError, ReadResult, StoreError};
pub use filter::{FilterExpr, FilterOperator, FilterValue, SortDirection, SortField, StoreQuery};
pub use fingerprint::{snapshot_fingerprint, Fingerprint};
pub use record::Record;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Externally assigned entity identifier (page slug, post urn, ...).
pub type EntityKey = String;

// ============================================================================
// ENTITY KIND
// ============================================================================

/// Discriminator for every entity the orchestration layer manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Page,
    Post,
    Employee,
    Comment,
    AiSummary,
}

impl EntityKind {
    /// All kinds, in parent-before-child order.
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Page,
        EntityKind::Post,
        EntityKind::Employee,
        EntityKind::Comment,
        EntityKind::AiSummary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Page => "page",
            EntityKind::Post => "post",
            EntityKind::Employee => "employee",
            EntityKind::Comment => "comment",
            EntityKind::AiSummary => "ai_summary",
        }
    }

    /// The kind this kind hangs off, if any.
    pub fn parent(&self) -> Option<EntityKind> {
        match self {
            EntityKind::Page => None,
            EntityKind::Post | EntityKind::Employee | EntityKind::AiSummary => {
                Some(EntityKind::Page)
            }
            EntityKind::Comment => Some(EntityKind::Post),
        }
    }

    /// Body field holding the parent key.
    pub fn parent_field(&self) -> Option<&'static str> {
        match self {
            EntityKind::Page => None,
            EntityKind::Post => Some("page_id"),
            EntityKind::Employee => Some("company_page_id"),
            EntityKind::Comment => Some("post_id"),
            EntityKind::AiSummary => Some("page_id"),
        }
    }

    /// Body field mirroring the record's refresh timestamp.
    pub fn refresh_field(&self) -> &'static str {
        match self {
            EntityKind::AiSummary => "generated_at",
            _ => "last_refreshed",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown entity kind: {}", s))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>(), Ok(kind));
        }
        assert!("group".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_parent_fields_exist_for_child_kinds() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.parent().is_some(), kind.parent_field().is_some());
        }
        assert_eq!(EntityKind::Comment.parent(), Some(EntityKind::Post));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&EntityKind::AiSummary).unwrap();
        assert_eq!(json, "\"ai_summary\"");
    }
}
