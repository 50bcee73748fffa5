//! HTTP surface

pub mod analytics;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod search;
pub mod stats;
pub mod uploads;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::Cached;
use crate::metrics::Metrics;
use crate::state::AppState;

/// Headroom for multipart framing on top of the file size limit
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Success envelope shared by the JSON endpoints
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
            cached: None,
        })
    }

    pub fn cached(result: Cached<T>) -> Json<Self> {
        Json(Self {
            success: true,
            data: result.value,
            cached: Some(result.cached),
        })
    }
}

async fn count_requests(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    metrics.inc_requests();
    next.run(request).await
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let upload_limit = usize::try_from(state.uploads.max_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        // Health and metrics (Kubernetes probes + Prometheus)
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/metrics", get(metrics::prometheus_metrics))
        // Ingestion
        .route("/api/logs/ingest", post(ingest::ingest_all))
        .route("/api/logs/ingest/:log_type", post(ingest::ingest_type))
        .route("/api/logs/send", post(ingest::send_log))
        .route("/api/logs/batch", post(ingest::send_batch))
        // Uploads
        .route(
            "/api/upload",
            post(uploads::upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/upload/files", get(uploads::list_files))
        .route("/api/upload/history", get(uploads::upload_history))
        .route("/api/upload/:id", get(uploads::get_upload))
        .route("/api/upload/:id/process", post(uploads::process_upload))
        // Search
        .route("/api/search", get(search::search))
        .route("/api/search/history", get(search::search_history))
        .route("/api/search/popular", get(search::popular_searches))
        .route("/api/search/stats", get(search::cluster_stats))
        .route("/api/search/timeline", get(search::timeline))
        .route("/api/search/top-users", get(search::top_users))
        .route("/api/search/log/:id", get(search::log_by_id))
        // Dashboard statistics
        .route("/api/stats", get(stats::dashboard))
        .route("/api/stats/detailed", get(stats::detailed))
        // Transaction analytics
        .route("/api/analytics/stats", get(analytics::transaction_stats))
        .route("/api/analytics/search", get(analytics::search_transactions))
        .route("/api/analytics/user/:user_id", get(analytics::user_behavior))
        .route(
            "/api/analytics/transactions",
            get(analytics::list_transactions).post(analytics::create_transaction),
        )
        // State and middleware
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.metrics),
            count_requests,
        ))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
