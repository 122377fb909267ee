//! ORGPULSE API Server Entry Point
//!
//! Loads configuration, connects the entity store, picks the cache backend,
//! wires the scraper and optional summarizer into the controller and starts
//! the Axum HTTP server.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use orgpulse_api::{
    create_api_router, ApiConfig, ApiError, ApiResult, AppState, CacheBackend, DbConfig,
    PgEntityStore, ScraperClient,
};
use orgpulse_api::telemetry::{init_tracing, TelemetryConfig};
use orgpulse_core::OrchestratorConfig;
use orgpulse_llm::{AnthropicClient, AnthropicSummarizer};
use orgpulse_storage::{
    CacheAsideController, CacheClient, InMemoryCache, LmdbCacheClient, Summarizer,
};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let api_config = ApiConfig::from_env()?;
    let telemetry_config = TelemetryConfig {
        json: api_config.log_json,
        ..TelemetryConfig::default()
    };
    init_tracing(&telemetry_config)?;

    let orchestrator_config = OrchestratorConfig::from_env()?;

    let db_config = DbConfig::from_env();
    let store = PgEntityStore::from_config(&db_config)?;
    store.migrate().await?;
    tracing::info!(pool_size = store.pool_size(), "Entity store ready");

    let cache = build_cache(&api_config)?;

    let fetcher = ScraperClient::new(
        api_config.scraper_base_url.clone(),
        api_config.scraper_max_concurrent,
    )
    .with_api_key(api_config.scraper_api_key.clone());
    tracing::info!(scraper = %fetcher.base_url(), "Scraper client configured");

    let (summarizer, usage) = match &api_config.anthropic_api_key {
        Some(key) => {
            let client = AnthropicClient::new(key.clone(), api_config.anthropic_requests_per_minute);
            let summarizer = AnthropicSummarizer::with_client(client, api_config.anthropic_model.clone());
            tracing::info!(model = %summarizer.model(), "Summaries enabled");
            let usage = summarizer.usage();
            (Some(Arc::new(summarizer) as Arc<dyn Summarizer>), Some(usage))
        }
        None => {
            tracing::warn!("ANTHROPIC_API_KEY not set; summary endpoint will answer 503");
            (None, None)
        }
    };

    let controller = CacheAsideController::new(
        Arc::new(store),
        cache.clone(),
        Arc::new(fetcher),
        summarizer,
        orchestrator_config,
    );

    let mut state = AppState::new(controller, cache);
    if let Some(usage) = usage {
        state = state.with_usage(usage);
    }

    let app: Router = create_api_router(state, &api_config);

    let addr = api_config.bind_addr()?;
    tracing::info!(
        %addr,
        service = %telemetry_config.service_name,
        environment = %telemetry_config.environment,
        "Starting ORGPULSE API server"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

/// Open the configured cache and start its expiry sweep.
fn build_cache(config: &ApiConfig) -> ApiResult<Arc<dyn CacheClient>> {
    let interval = config.cache_purge_interval;
    match &config.cache_backend {
        CacheBackend::Memory => {
            let cache = Arc::new(InMemoryCache::new());
            let sweeper = Arc::clone(&cache);
            spawn_purge(interval, move || {
                sweeper.purge_expired().map_err(|e| e.to_string())
            });
            tracing::info!("Using in-memory cache");
            Ok(cache as Arc<dyn CacheClient>)
        }
        CacheBackend::Lmdb { path, size_mb } => {
            let cache = Arc::new(LmdbCacheClient::new(path, *size_mb).map_err(|e| {
                ApiError::internal_error(format!("Failed to open LMDB cache: {}", e))
            })?);
            let sweeper = Arc::clone(&cache);
            spawn_purge(interval, move || {
                sweeper.purge_expired().map_err(|e| e.to_string())
            });
            tracing::info!(path = %path.display(), size_mb = *size_mb, "Using LMDB cache");
            Ok(cache as Arc<dyn CacheClient>)
        }
    }
}

fn spawn_purge<F>(interval: Duration, purge: F)
where
    F: Fn() -> Result<u64, String> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match purge() {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Expired cache entries purged"),
                Err(e) => tracing::warn!(error = %e, "Cache purge failed"),
            }
        }
    });
}
