//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use orgpulse_llm::UsageTracker;
use orgpulse_storage::{
    CacheAsideController, CacheClient, EntityStore, HierarchicalFetcher, QueryEngine,
};

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Parent-first read path over the cache-aside controller.
    pub hierarchy: HierarchicalFetcher,
    /// Filtered, paginated listings straight from the store.
    pub queries: QueryEngine,
    /// Same cache the controller uses; read for stats only.
    pub cache: Arc<dyn CacheClient>,
    /// Token usage of the summarizer, when one is configured.
    pub usage: Option<Arc<UsageTracker>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(controller: CacheAsideController, cache: Arc<dyn CacheClient>) -> Self {
        let queries = QueryEngine::new(controller.store().clone(), controller.config().clone());
        Self {
            hierarchy: HierarchicalFetcher::new(controller),
            queries,
            cache,
            usage: None,
            start_time: Instant::now(),
        }
    }

    pub fn with_usage(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn controller(&self) -> &CacheAsideController {
        self.hierarchy.controller()
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        self.controller().store()
    }
}
