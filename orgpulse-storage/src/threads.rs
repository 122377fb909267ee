//! Comment reply threads.
//!
//! Threads are an adjacency relation: each comment names at most one parent
//! comment by key. Nothing here holds a tree in memory. Walking a thread is a
//! sequence of lookups, bounded by [`MAX_THREAD_DEPTH`].

use std::collections::HashMap;

use orgpulse_core::{EntityKind, Record, StoreError};
use serde_json::Value;
use tracing::warn;

use crate::traits::EntityStore;

/// Longest reply chain followed before giving up.
pub const MAX_THREAD_DEPTH: usize = 64;

const PARENT_FIELD: &str = "parent_comment_id";

/// Parent comment key of a comment record, if any.
pub fn parent_comment(record: &Record) -> Option<&str> {
    record
        .field(PARENT_FIELD)
        .and_then(Value::as_str)
        .filter(|key| !key.is_empty())
}

fn clear_parent(record: &mut Record) {
    if let Value::Object(map) = &mut record.body {
        map.insert(PARENT_FIELD.to_string(), Value::Null);
    }
}

/// Make a freshly fetched comment batch safe to persist.
///
/// Parent keys that point at the comment itself, at a comment that is neither
/// in the batch nor in the store, or that would close a reply cycle are
/// cleared. The batch is returned parents-first, so writing it in order never
/// persists a reply before the comment it answers.
pub async fn repair_threads(
    store: &dyn EntityStore,
    comments: Vec<Record>,
) -> Result<Vec<Record>, StoreError> {
    let mut parents: HashMap<String, Option<String>> = comments
        .iter()
        .map(|c| (c.key.clone(), parent_comment(c).map(str::to_string)))
        .collect();

    let mut repaired = comments;
    for comment in &mut repaired {
        let Some(parent) = parents.get(&comment.key).cloned().flatten() else {
            continue;
        };
        let problem = if parent == comment.key {
            Some("self reply")
        } else if !parents.contains_key(&parent)
            && store.get_by_key(EntityKind::Comment, &parent).await?.is_none()
        {
            Some("unknown parent")
        } else if closes_cycle(store, &parents, &comment.key, &parent).await? {
            Some("reply cycle")
        } else {
            None
        };

        if let Some(problem) = problem {
            warn!(
                comment = %comment.key,
                parent = %parent,
                problem,
                "Clearing unresolvable parent comment"
            );
            clear_parent(comment);
            parents.insert(comment.key.clone(), None);
        }
    }

    repaired.sort_by_key(|c| batch_depth(&parents, &c.key));
    Ok(repaired)
}

/// Whether following parents from `parent` leads back to `start`.
///
/// Chains longer than [`MAX_THREAD_DEPTH`] count as cycles.
async fn closes_cycle(
    store: &dyn EntityStore,
    batch: &HashMap<String, Option<String>>,
    start: &str,
    parent: &str,
) -> Result<bool, StoreError> {
    let mut current = parent.to_string();
    for _ in 0..MAX_THREAD_DEPTH {
        if current == start {
            return Ok(true);
        }
        let next = match batch.get(&current) {
            Some(next) => next.clone(),
            None => store
                .get_by_key(EntityKind::Comment, &current)
                .await?
                .and_then(|r| parent_comment(&r).map(str::to_string)),
        };
        match next {
            Some(next) => current = next,
            None => return Ok(false),
        }
    }
    Ok(true)
}

/// Number of ancestors a comment has inside the batch.
fn batch_depth(batch: &HashMap<String, Option<String>>, key: &str) -> usize {
    let mut depth = 0;
    let mut current = key;
    while let Some(Some(parent)) = batch.get(current) {
        if !batch.contains_key(parent.as_str()) || depth >= MAX_THREAD_DEPTH {
            break;
        }
        depth += 1;
        current = parent;
    }
    depth
}
