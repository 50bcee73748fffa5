//! Prometheus metrics endpoint

use axum::{extract::State, response::IntoResponse};

use crate::state::AppState;

/// GET /metrics
///
/// Prometheus text exposition format
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let output = state.metrics.snapshot().render();

    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        output,
    )
}
