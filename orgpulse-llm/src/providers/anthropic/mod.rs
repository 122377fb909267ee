//! Anthropic (Claude) provider implementation
//!
//! Claude-backed page summaries.

pub mod client;
pub mod summarization;
pub mod types;

pub use client::AnthropicClient;
pub use summarization::AnthropicSummarizer;
