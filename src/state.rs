//! Application state shared across handlers

use std::sync::Arc;

use crate::analytics::AnalyticsService;
use crate::cache::{Cache, QueryCache};
use crate::config::Config;
use crate::engine::SearchEngine;
use crate::ingest::IngestionOrchestrator;
use crate::metrics::Metrics;
use crate::shipper::{LogShipper, LogSink};
use crate::store::DocumentStore;
use crate::uploads::UploadService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Cached read side over the search engine
    pub analytics: AnalyticsService,
    /// Per-type file ingestion into the pipeline
    pub orchestrator: IngestionOrchestrator,
    /// Ad-hoc deliveries (single record and batch)
    pub shipper: LogShipper,
    pub uploads: UploadService,
    /// Upload metadata, transactions and search history
    pub store: Arc<dyn DocumentStore>,
    pub cache: QueryCache,
    /// Application metrics for Prometheus
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire the services around the external collaborators
    pub fn new(
        config: &Config,
        engine: Arc<dyn SearchEngine>,
        cache: Arc<dyn Cache>,
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        let cache = QueryCache::new(cache, Arc::clone(&metrics));
        let shipper = LogShipper::new(sink)
            .with_concurrency(config.ship_concurrency)
            .with_metrics(Arc::clone(&metrics));

        Self {
            analytics: AnalyticsService::new(engine, cache.clone(), Arc::clone(&store)),
            orchestrator: IngestionOrchestrator::new(&config.logs_dir, shipper.clone()),
            uploads: UploadService::new(
                Arc::clone(&store),
                &config.upload_dir,
                config.max_upload_bytes,
                shipper.clone(),
            ),
            shipper,
            store,
            cache,
            metrics,
        }
    }
}
