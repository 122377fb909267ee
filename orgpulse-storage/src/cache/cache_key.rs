//! Cache keys for entities and child listings.
//!
//! A key is either a single entity (`page:acme`) or the child listing of a
//! parent (`post@acme`, the posts of page `acme`). The two key spaces never
//! collide, and the same key doubles as the single-flight slot identifier.

use std::fmt;

use orgpulse_core::EntityKind;

/// Separator byte between the header and the key text.
const SEPARATOR: u8 = 0xFF;

/// Which key space a cache key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyScope {
    /// One entity addressed by its own key.
    Entity,
    /// All children of the given kind under a parent key.
    Children,
}

/// Key for cache entries and in-flight fetch slots.
///
/// # Binary Format
///
/// - Byte 0: entity kind discriminant
/// - Byte 1: scope (0 = entity, 1 = children)
/// - Byte 2: separator (0xFF)
/// - Bytes 3..: key as UTF-8
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: EntityKind,
    scope: KeyScope,
    key: String,
}

impl CacheKey {
    /// Key for a single entity.
    pub fn entity(kind: EntityKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            scope: KeyScope::Entity,
            key: key.into(),
        }
    }

    /// Key for the `kind` children of `parent_key`.
    pub fn children(kind: EntityKind, parent_key: impl Into<String>) -> Self {
        Self {
            kind,
            scope: KeyScope::Children,
            key: parent_key.into(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn scope(&self) -> KeyScope {
        self.scope
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Encode to bytes for LMDB storage.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(3 + self.key.len());
        bytes.push(kind_to_byte(self.kind));
        bytes.push(match self.scope {
            KeyScope::Entity => 0,
            KeyScope::Children => 1,
        });
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(self.key.as_bytes());
        bytes
    }

    /// Decode a key from bytes. `None` on malformed input.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 3 || bytes[2] != SEPARATOR {
            return None;
        }
        let kind = byte_to_kind(bytes[0])?;
        let scope = match bytes[1] {
            0 => KeyScope::Entity,
            1 => KeyScope::Children,
            _ => return None,
        };
        let key = std::str::from_utf8(&bytes[3..]).ok()?.to_string();
        Some(Self { kind, scope, key })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            KeyScope::Entity => write!(f, "{}:{}", self.kind, self.key),
            KeyScope::Children => write!(f, "{}@{}", self.kind, self.key),
        }
    }
}

fn kind_to_byte(kind: EntityKind) -> u8 {
    match kind {
        EntityKind::Page => 1,
        EntityKind::Post => 2,
        EntityKind::Employee => 3,
        EntityKind::Comment => 4,
        EntityKind::AiSummary => 5,
    }
}

fn byte_to_kind(byte: u8) -> Option<EntityKind> {
    match byte {
        1 => Some(EntityKind::Page),
        2 => Some(EntityKind::Post),
        3 => Some(EntityKind::Employee),
        4 => Some(EntityKind::Comment),
        5 => Some(EntityKind::AiSummary),
        _ => None,
    }
}
