//! Summarizer provider implementations
//!
//! Concrete implementations of the storage crate's `Summarizer` trait.

pub mod anthropic;

pub use anthropic::{AnthropicClient, AnthropicSummarizer};
