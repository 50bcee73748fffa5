//! LogVault - e-commerce log ingestion and cached search analytics

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use log_vault::cache::{Cache, MemoryCache, RedisCache};
use log_vault::config::Config;
use log_vault::db::Database;
use log_vault::engine::ElasticsearchClient;
use log_vault::routes;
use log_vault::shipper::HttpLogSink;
use log_vault::state::AppState;

/// Upper bound on a single cache round trip
const CACHE_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    log_vault::init_tracing("log_vault=info,tower_http=info", config.json_logs);

    // Document store
    let db = Database::new(&config.database_url)
        .await
        .context("connecting to the document store")?;
    db.migrate().await?;

    // Search engine and pipeline
    let engine = ElasticsearchClient::new(config.elasticsearch_node.clone(), config.query_timeout)?;
    let sink = HttpLogSink::new(config.logstash_url.clone(), config.delivery_timeout)?;

    // Shared cache, in-process when Redis is not configured
    let cache: Arc<dyn Cache> = match &config.redis_url {
        Some(url) => match RedisCache::new(url, CACHE_TIMEOUT) {
            Ok(redis) => {
                info!("Cache: redis");
                Arc::new(redis)
            }
            Err(e) => {
                warn!(error = %e, "Invalid REDIS_URL, falling back to in-process cache");
                Arc::new(MemoryCache::new())
            }
        },
        None => {
            info!("REDIS_URL not set, using in-process cache");
            Arc::new(MemoryCache::new())
        }
    };

    let state = AppState::new(
        &config,
        Arc::new(engine),
        cache,
        Arc::new(db),
        Arc::new(sink),
    );
    let app = routes::router(state);

    info!("LogVault v{} starting on {}", env!("CARGO_PKG_VERSION"), config.listen_addr);
    info!("Database: {}", config.database_url.split('@').last().unwrap_or("***"));
    info!("Search engine: {}", config.elasticsearch_node);
    info!("Pipeline: {}", config.logstash_url);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
