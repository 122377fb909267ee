//! Snapshot fingerprints for generated summaries.
//!
//! A fingerprint is the SHA-256 of a canonical rendering of a page and its
//! posts. Refresh timestamps are stripped before hashing, so re-scraping
//! identical facts keeps the fingerprint stable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::Record;

/// Hex-encoded SHA-256 fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a stored fingerprint string.
    pub fn matches(&self, stored: &str) -> bool {
        self.0 == stored
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint a page and its posts. Post order does not matter.
pub fn snapshot_fingerprint(page: &Record, posts: &[Record]) -> Fingerprint {
    let mut sorted: Vec<&Record> = posts.iter().collect();
    sorted.sort_by(|a, b| a.key.cmp(&b.key));

    let mut hasher = Sha256::new();
    hasher.update(b"page\n");
    hasher.update(canonical_body(page).as_bytes());
    for post in sorted {
        hasher.update(b"\npost\n");
        hasher.update(canonical_body(post).as_bytes());
    }
    Fingerprint(hex::encode(hasher.finalize()))
}

fn canonical_body(record: &Record) -> String {
    let mut body = record.body.clone();
    if let Value::Object(map) = &mut body {
        map.remove(record.kind.refresh_field());
    }
    let mut out = String::new();
    write_canonical(&body, &mut out);
    out
}

/// Render JSON with object keys sorted, independent of map ordering.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Industry, Page, Post, PostType, Reactions};
    use chrono::{Duration, TimeZone, Utc};

    fn page(followers: i64) -> Record {
        Record::from_entity(&Page {
            page_id: "acme".into(),
            url: "https://www.linkedin.com/company/acme/".into(),
            name: "Acme".into(),
            description: None,
            industry: Industry::Technology,
            follower_count: followers,
            head_count: Some(50),
            specialities: vec!["rockets".into()],
            last_refreshed: Utc::now(),
        })
        .unwrap()
    }

    fn post(id: &str, likes: i64) -> Record {
        Record::from_entity(&Post {
            post_id: id.into(),
            page_id: "acme".into(),
            url: None,
            post_type: PostType::Text,
            content: format!("post {}", id),
            media_urls: vec![],
            reactions: Reactions::new(likes, 0, 0),
            published_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            last_refreshed: Utc::now(),
        })
        .unwrap()
    }

    #[test]
    fn test_fingerprint_ignores_refresh_time() {
        let a = page(100);
        let mut b = a.clone();
        b.stamp(Utc::now() + Duration::hours(1));
        assert_eq!(snapshot_fingerprint(&a, &[]), snapshot_fingerprint(&b, &[]));
    }

    #[test]
    fn test_fingerprint_ignores_post_order() {
        let p = page(100);
        let x = snapshot_fingerprint(&p, &[post("1", 1), post("2", 2)]);
        let y = snapshot_fingerprint(&p, &[post("2", 2), post("1", 1)]);
        assert_eq!(x, y);
    }

    #[test]
    fn test_fingerprint_changes_with_facts() {
        let base = snapshot_fingerprint(&page(100), &[post("1", 1)]);
        assert_ne!(base, snapshot_fingerprint(&page(101), &[post("1", 1)]));
        assert_ne!(base, snapshot_fingerprint(&page(100), &[post("1", 2)]));
        assert_ne!(base, snapshot_fingerprint(&page(100), &[]));
        assert_eq!(base.as_str().len(), 64);
    }

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn prop_fingerprint_independent_of_post_order(
                likes in prop::collection::vec(0i64..1_000, 0..8),
                rotate in 0usize..8,
            ) {
                let posts: Vec<Record> = likes
                    .iter()
                    .enumerate()
                    .map(|(i, l)| post(&format!("post-{}", i), *l))
                    .collect();
                let mut shuffled = posts.clone();
                if !shuffled.is_empty() {
                    let n = rotate % shuffled.len();
                    shuffled.rotate_left(n);
                }
                let p = page(10);
                prop_assert_eq!(snapshot_fingerprint(&p, &posts), snapshot_fingerprint(&p, &shuffled));
            }
        }
    }

    #[test]
    fn test_canonical_sorts_keys() {
        let mut out = String::new();
        write_canonical(&serde_json::json!({"b": 1, "a": [true, null]}), &mut out);
        assert_eq!(out, r#"{"a":[true,null],"b":1}"#);
    }
}
