//! Anthropic (Claude) page summarizer

use super::client::AnthropicClient;
use super::types::{Message, MessageRequest, MessageResponse};
use crate::UsageTracker;
use async_trait::async_trait;
use orgpulse_core::{FetchError, Page, Post};
use orgpulse_storage::{PageSnapshot, Summarizer, SummaryDraft};
use serde::Deserialize;
use std::sync::Arc;

pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

/// Characters of post content included in the prompt.
const POST_EXCERPT_CHARS: usize = 200;

const SYSTEM_PROMPT: &str = "You are an expert business analyst reviewing LinkedIn company pages. \
     Respond with a single JSON object and nothing else. \
     The object has the string fields summary, follower_insights, engagement_insights and content_insights.";

/// Page summarizer backed by Claude models.
pub struct AnthropicSummarizer {
    client: AnthropicClient,
    model: String,
    max_tokens: u32,
    usage: Arc<UsageTracker>,
}

impl AnthropicSummarizer {
    /// Create a new Anthropic summarizer.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key
    /// * `model` - Model name (e.g., "claude-3-5-haiku-latest")
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_client(AnthropicClient::new(api_key, 50), model)
    }

    /// Create a summarizer with the default model.
    pub fn with_default_model(api_key: impl Into<String>) -> Self {
        Self::new(api_key, DEFAULT_MODEL)
    }

    pub fn with_client(client: AnthropicClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: 1024,
            usage: Arc::new(UsageTracker::new()),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Token usage accumulated across calls.
    pub fn usage(&self) -> Arc<UsageTracker> {
        Arc::clone(&self.usage)
    }

    fn request(&self, snapshot: &PageSnapshot) -> MessageRequest {
        MessageRequest {
            model: self.model.clone(),
            system: Some(SYSTEM_PROMPT.to_string()),
            messages: vec![Message::user(build_prompt(&snapshot.page, &snapshot.posts))],
            max_tokens: self.max_tokens,
            temperature: Some(0.3),
        }
    }
}

#[async_trait]
impl Summarizer for AnthropicSummarizer {
    async fn summarize(
        &self,
        page_key: &str,
        snapshot: &PageSnapshot,
    ) -> Result<SummaryDraft, FetchError> {
        tracing::debug!(
            page = %page_key,
            posts = snapshot.posts.len(),
            fingerprint = %snapshot.fingerprint,
            model = %self.model,
            "Requesting page summary"
        );

        let response: MessageResponse = self.client.messages(&self.request(snapshot)).await?;
        self.usage
            .record(response.usage.input_tokens, response.usage.output_tokens);

        let model = if response.model.is_empty() {
            self.model.clone()
        } else {
            response.model.clone()
        };
        let draft = parse_reply(&response.text(), model)?;
        if response.stop_reason.as_deref() == Some("max_tokens") {
            tracing::warn!(page = %page_key, "Summary reply truncated at max_tokens");
        }
        Ok(draft)
    }
}

impl std::fmt::Debug for AnthropicSummarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicSummarizer")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Render page facts and the most recent posts into the user prompt.
pub fn build_prompt(page: &Page, posts: &[Post]) -> String {
    let mut prompt = String::new();
    prompt.push_str("Analyze this LinkedIn page and provide a concise assessment.\n\n");
    prompt.push_str("Page information:\n");
    prompt.push_str(&format!("- Name: {}\n", page.name));
    prompt.push_str(&format!("- Industry: {}\n", page.industry.as_str()));
    prompt.push_str(&format!("- Follower count: {}\n", page.follower_count));
    match page.head_count {
        Some(count) => prompt.push_str(&format!("- Employee count: {}\n", count)),
        None => prompt.push_str("- Employee count: unknown\n"),
    }
    if page.specialities.is_empty() {
        prompt.push_str("- Specialities: none specified\n");
    } else {
        prompt.push_str(&format!("- Specialities: {}\n", page.specialities.join(", ")));
    }
    prompt.push_str("\nDescription:\n");
    prompt.push_str(page.description.as_deref().unwrap_or("(none)"));
    prompt.push_str("\n\n");

    prompt.push_str(&format!("Recent posts ({}):\n", posts.len()));
    for post in posts {
        prompt.push_str(&format!(
            "- [{}] {} reactions, published {}: {}\n",
            post.post_type.as_str(),
            post.reactions.total_count,
            post.published_at.format("%Y-%m-%d"),
            excerpt(&post.content),
        ));
    }

    prompt.push_str(
        "\nProvide:\n\
         1. summary: the company in 3-4 sentences\n\
         2. follower_insights: the follower count against industry norms\n\
         3. engagement_insights: engagement levels of the posts\n\
         4. content_insights: which content types perform best\n",
    );
    prompt
}

fn excerpt(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= POST_EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(POST_EXCERPT_CHARS).collect();
    format!("{}...", cut.trim_end())
}

#[derive(Debug, Deserialize)]
struct SummaryJson {
    summary: Option<String>,
    follower_insights: Option<String>,
    engagement_insights: Option<String>,
    content_insights: Option<String>,
}

/// Turn a completion into a draft.
///
/// A JSON object (optionally fenced) fills the individual fields; any other
/// non-empty text becomes the summary as-is.
pub fn parse_reply(text: &str, model: String) -> Result<SummaryDraft, FetchError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(FetchError::Invalid {
            reason: "summarizer returned an empty completion".to_string(),
        });
    }

    let structured = json_object(trimmed)
        .and_then(|candidate| serde_json::from_str::<SummaryJson>(candidate).ok())
        .and_then(|parsed| {
            let summary = parsed.summary.filter(|s| !s.trim().is_empty())?;
            Some(SummaryDraft {
                summary,
                follower_insights: non_blank(parsed.follower_insights),
                engagement_insights: non_blank(parsed.engagement_insights),
                content_insights: non_blank(parsed.content_insights),
                model: model.clone(),
            })
        });

    match structured {
        Some(draft) => Ok(draft),
        None => {
            tracing::warn!("Summary reply was not structured JSON, keeping raw text");
            Ok(SummaryDraft {
                summary: trimmed.to_string(),
                model,
                ..SummaryDraft::default()
            })
        }
    }
}

fn json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
