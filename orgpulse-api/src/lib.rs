//! ORGPULSE API - REST Layer over the Orchestration Core
//!
//! Serves LinkedIn page, post, employee and comment data plus AI page
//! summaries. Every read goes through the cache-aside controller in
//! `orgpulse-storage`; this crate supplies its production collaborators:
//! a PostgreSQL entity store, an HTTP scraper client and the Axum routes.

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod scraper;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::{ApiConfig, CacheBackend};
pub use db::{DbConfig, PgEntityStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::{create_api_router, ListResponse, ReadResponse};
pub use scraper::ScraperClient;
pub use state::AppState;
