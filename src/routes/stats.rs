//! Dashboard statistics endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::compose::{DashboardStats, DetailedStats};
use crate::error::Result;
use crate::query::DateRange;
use crate::routes::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// GET /api/stats
pub async fn dashboard(State(state): State<AppState>) -> Result<Json<ApiResponse<DashboardStats>>> {
    let stats = state.analytics.dashboard_stats().await?;
    Ok(ApiResponse::cached(stats))
}

/// GET /api/stats/detailed
///
/// Defaults to the last seven days when `startDate` is absent.
pub async fn detailed(
    State(state): State<AppState>,
    Query(params): Query<DetailedParams>,
) -> Result<Json<ApiResponse<DetailedStats>>> {
    let range = DateRange::parse(params.start_date.as_deref(), params.end_date.as_deref())?;
    let stats = state.analytics.detailed_stats(range).await?;
    Ok(ApiResponse::cached(stats))
}
