//! Record envelope persisted by stores and caches.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::Entity;
use crate::error::StoreError;
use crate::{EntityKind, Timestamp};

/// Kind-tagged envelope around an entity's JSON body.
///
/// `refreshed_at` is authoritative; the body's refresh field is kept in sync
/// by [`Record::stamp`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub kind: EntityKind,
    pub key: String,
    pub parent_key: Option<String>,
    pub refreshed_at: Timestamp,
    pub body: Value,
}

impl Record {
    pub fn from_entity<E: Entity>(entity: &E) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: E::KIND,
            key: entity.key().to_string(),
            parent_key: entity.parent_key().map(str::to_string),
            refreshed_at: entity.refreshed_at(),
            body: serde_json::to_value(entity)?,
        })
    }

    /// Decode the body into a typed entity.
    pub fn decode<E: Entity>(&self) -> Result<E, StoreError> {
        if self.kind != E::KIND {
            return Err(StoreError::Corrupt {
                kind: self.kind,
                key: self.key.clone(),
                reason: format!("expected {} record", E::KIND),
            });
        }
        serde_json::from_value(self.body.clone()).map_err(|e| StoreError::Corrupt {
            kind: self.kind,
            key: self.key.clone(),
            reason: e.to_string(),
        })
    }

    /// Set the refresh timestamp on both the envelope and the body.
    pub fn stamp(&mut self, at: Timestamp) {
        self.refreshed_at = at;
        if let Value::Object(map) = &mut self.body {
            if let Ok(ts) = serde_json::to_value(at) {
                map.insert(self.kind.refresh_field().to_string(), ts);
            }
        }
    }

    /// Look up a dotted path (`reactions.total_count`) in the body.
    pub fn field(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.body, |value, segment| value.get(segment))
    }

    /// Set the parent key on both the envelope and the body.
    pub fn set_parent_key(&mut self, parent: Option<String>) {
        if let (Some(field), Value::Object(map)) = (self.kind.parent_field(), &mut self.body) {
            map.insert(
                field.to_string(),
                parent.clone().map(Value::String).unwrap_or(Value::Null),
            );
        }
        self.parent_key = parent;
    }
}
