//! Health and readiness endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub engine: CheckStatus,
    pub cache: CheckStatus,
    pub store: CheckStatus,
}

#[derive(Debug, Serialize)]
pub struct CheckStatus {
    pub healthy: bool,
    pub message: String,
}

/// GET /health
///
/// Basic health check - returns 200 if the server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /ready
///
/// Readiness check - engine and document store must answer.
/// A cache outage is reported but does not fail readiness.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let (engine, cache, store) = tokio::join!(
        state.analytics.health(),
        state.cache.ping(),
        state.store.ping(),
    );

    let engine_check = match engine {
        Ok(cluster) if cluster.status != "red" => CheckStatus {
            healthy: true,
            message: format!("Cluster {} is {}", cluster.cluster_name, cluster.status),
        },
        Ok(cluster) => CheckStatus {
            healthy: false,
            message: format!("Cluster {} is red", cluster.cluster_name),
        },
        Err(e) => CheckStatus {
            healthy: false,
            message: format!("Unreachable: {}", e),
        },
    };

    let cache_check = match cache {
        Ok(()) => CheckStatus {
            healthy: true,
            message: "Connected".to_string(),
        },
        Err(e) => CheckStatus {
            healthy: false,
            message: format!("Degraded, computing uncached: {}", e),
        },
    };

    let store_check = match store {
        Ok(()) => CheckStatus {
            healthy: true,
            message: "Connected".to_string(),
        },
        Err(e) => CheckStatus {
            healthy: false,
            message: format!("Connection failed: {}", e),
        },
    };

    let all_healthy = engine_check.healthy && store_check.healthy;
    let status = if all_healthy { "ready" } else { "not_ready" };
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(ReadinessResponse {
            status,
            checks: ReadinessChecks {
                engine: engine_check,
                cache: cache_check,
                store: store_check,
            },
        }),
    )
}
