//! Log search endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::analytics::{SearchPage, TimelineParams};
use crate::compose::{ClusterStats, Timeline, TopUser};
use crate::engine::SearchHit;
use crate::error::Result;
use crate::models::{PopularSearch, SearchHistoryEntry};
use crate::query::{DateRange, SearchParams};
use crate::routes::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IndexParams {
    pub index: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUsersParams {
    pub size: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// GET /api/search
///
/// Free text (`q` or `query`) with filters, sorting and pagination.
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ApiResponse<SearchPage>>> {
    let page = state.analytics.search(&params).await?;
    Ok(ApiResponse::ok(page))
}

/// GET /api/search/history
pub async fn search_history(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<ApiResponse<Vec<SearchHistoryEntry>>>> {
    let history = state.analytics.search_history(params.limit.as_deref()).await?;
    Ok(ApiResponse::ok(history))
}

/// GET /api/search/popular
pub async fn popular_searches(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<ApiResponse<Vec<PopularSearch>>>> {
    let popular = state.analytics.popular_searches(params.limit.as_deref()).await?;
    Ok(ApiResponse::ok(popular))
}

/// GET /api/search/stats
pub async fn cluster_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ClusterStats>>> {
    let stats = state.analytics.cluster_stats().await?;
    Ok(ApiResponse::ok(stats))
}

/// GET /api/search/timeline
pub async fn timeline(
    State(state): State<AppState>,
    Query(params): Query<TimelineParams>,
) -> Result<Json<ApiResponse<Timeline>>> {
    let timeline = state.analytics.logs_by_hour(&params).await?;
    Ok(ApiResponse::ok(timeline))
}

/// GET /api/search/top-users
pub async fn top_users(
    State(state): State<AppState>,
    Query(params): Query<TopUsersParams>,
) -> Result<Json<ApiResponse<Vec<TopUser>>>> {
    let range = DateRange::parse(params.start_date.as_deref(), params.end_date.as_deref())?;
    let users = state
        .analytics
        .top_users(params.size.as_deref(), range)
        .await?;
    Ok(ApiResponse::ok(users))
}

/// GET /api/search/log/:id
pub async fn log_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<IndexParams>,
) -> Result<Json<ApiResponse<SearchHit>>> {
    let hit = state
        .analytics
        .log_by_id(&id, params.index.as_deref())
        .await?;
    Ok(ApiResponse::ok(hit))
}
