//! Entity definitions for organizational data.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{EntityKind, Timestamp};

/// Common surface of every persisted entity.
///
/// The orchestration layer works on [`crate::Record`] envelopes; this trait is
/// what turns a typed entity into one.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn key(&self) -> &str;

    fn parent_key(&self) -> Option<&str>;

    fn refreshed_at(&self) -> Timestamp;
}

// ============================================================================
// ENUMS
// ============================================================================

/// Industry classification of a company page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Industry {
    Technology,
    Finance,
    Healthcare,
    Education,
    Retail,
    Manufacturing,
    Consulting,
    Media,
    Marketing,
    #[default]
    Other,
}

impl Industry {
    pub fn as_str(&self) -> &'static str {
        match self {
            Industry::Technology => "Technology",
            Industry::Finance => "Finance",
            Industry::Healthcare => "Healthcare",
            Industry::Education => "Education",
            Industry::Retail => "Retail",
            Industry::Manufacturing => "Manufacturing",
            Industry::Consulting => "Consulting",
            Industry::Media => "Media",
            Industry::Marketing => "Marketing",
            Industry::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    #[default]
    Text,
    Image,
    Video,
    Article,
    Document,
    Poll,
    Other,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Text => "text",
            PostType::Image => "image",
            PostType::Video => "video",
            PostType::Article => "article",
            PostType::Document => "document",
            PostType::Poll => "poll",
            PostType::Other => "other",
        }
    }
}

/// Reaction counters on a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Reactions {
    pub like_count: i64,
    pub comment_count: i64,
    pub share_count: i64,
    pub total_count: i64,
}

impl Reactions {
    /// Build counters with `total_count` derived from the parts.
    pub fn new(like_count: i64, comment_count: i64, share_count: i64) -> Self {
        Self {
            like_count,
            comment_count,
            share_count,
            total_count: like_count + comment_count + share_count,
        }
    }
}

// ============================================================================
// ENTITIES
// ============================================================================

/// A company page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub page_id: String,
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub industry: Industry,
    pub follower_count: i64,
    #[serde(default)]
    pub head_count: Option<i64>,
    #[serde(default)]
    pub specialities: Vec<String>,
    pub last_refreshed: Timestamp,
}

/// A post published by a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub post_id: String,
    pub page_id: String,
    #[serde(default)]
    pub url: Option<String>,
    pub post_type: PostType,
    pub content: String,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub reactions: Reactions,
    pub published_at: Timestamp,
    pub last_refreshed: Timestamp,
}

/// A person listed as working at a page's company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub user_id: String,
    pub company_page_id: String,
    pub name: String,
    /// Job title or profile headline.
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub last_refreshed: Timestamp,
}

/// A comment on a post, optionally replying to another comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub comment_id: String,
    pub post_id: String,
    #[serde(default)]
    pub parent_comment_id: Option<String>,
    pub author_id: String,
    pub content: String,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub reply_count: i64,
    #[serde(default)]
    pub published_at: Option<Timestamp>,
    pub last_refreshed: Timestamp,
}

/// Generated summary of a page, tied to the snapshot it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiSummary {
    pub page_id: String,
    pub summary: String,
    #[serde(default)]
    pub follower_insights: Option<String>,
    #[serde(default)]
    pub engagement_insights: Option<String>,
    #[serde(default)]
    pub content_insights: Option<String>,
    pub model: String,
    /// Fingerprint of the page and posts snapshot used for generation.
    pub fingerprint: String,
    pub generated_at: Timestamp,
}

impl Entity for Page {
    const KIND: EntityKind = EntityKind::Page;

    fn key(&self) -> &str {
        &self.page_id
    }

    fn parent_key(&self) -> Option<&str> {
        None
    }

    fn refreshed_at(&self) -> Timestamp {
        self.last_refreshed
    }
}

impl Entity for Post {
    const KIND: EntityKind = EntityKind::Post;

    fn key(&self) -> &str {
        &self.post_id
    }

    fn parent_key(&self) -> Option<&str> {
        Some(&self.page_id)
    }

    fn refreshed_at(&self) -> Timestamp {
        self.last_refreshed
    }
}

impl Entity for Employee {
    const KIND: EntityKind = EntityKind::Employee;

    fn key(&self) -> &str {
        &self.user_id
    }

    fn parent_key(&self) -> Option<&str> {
        Some(&self.company_page_id)
    }

    fn refreshed_at(&self) -> Timestamp {
        self.last_refreshed
    }
}

impl Entity for Comment {
    const KIND: EntityKind = EntityKind::Comment;

    fn key(&self) -> &str {
        &self.comment_id
    }

    fn parent_key(&self) -> Option<&str> {
        Some(&self.post_id)
    }

    fn refreshed_at(&self) -> Timestamp {
        self.last_refreshed
    }
}

impl Entity for AiSummary {
    const KIND: EntityKind = EntityKind::AiSummary;

    fn key(&self) -> &str {
        &self.page_id
    }

    fn parent_key(&self) -> Option<&str> {
        Some(&self.page_id)
    }

    fn refreshed_at(&self) -> Timestamp {
        self.generated_at
    }
}
