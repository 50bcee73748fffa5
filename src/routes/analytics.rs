//! Transaction analytics endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analytics::TransactionFilters;
use crate::compose::{TransactionSearch, TransactionStats, UserBehavior};
use crate::error::Result;
use crate::models::{NewTransaction, Transaction};
use crate::query::{Pagination, DEFAULT_PAGE_SIZE};
use crate::routes::ApiResponse;
use crate::state::AppState;

/// Page size of the stored transaction listing
const TRANSACTIONS_PAGE_SIZE: u32 = 10;

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionSearchParams {
    #[serde(alias = "query")]
    pub q: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    pub total_pages: u64,
    pub current_page: u32,
    pub total: u64,
}

/// GET /api/analytics/stats
pub async fn transaction_stats(
    State(state): State<AppState>,
    Query(filters): Query<TransactionFilters>,
) -> Result<Json<ApiResponse<TransactionStats>>> {
    let stats = state.analytics.transaction_stats(&filters).await?;
    Ok(ApiResponse::cached(stats))
}

/// GET /api/analytics/search
pub async fn search_transactions(
    State(state): State<AppState>,
    Query(params): Query<TransactionSearchParams>,
) -> Result<Json<ApiResponse<TransactionSearch>>> {
    let pagination = Pagination::parse(
        params.page.as_deref(),
        params.limit.as_deref(),
        DEFAULT_PAGE_SIZE,
    )?;
    let found = state
        .analytics
        .search_transactions(params.q.as_deref(), pagination)
        .await?;
    Ok(ApiResponse::ok(found))
}

/// GET /api/analytics/user/:user_id
pub async fn user_behavior(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<ApiResponse<UserBehavior>>> {
    let behavior = state.analytics.user_behavior(&user_id).await?;
    Ok(ApiResponse::cached(behavior))
}

/// GET /api/analytics/transactions
///
/// Stored transactions, newest first.
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<TransactionPage>> {
    let pagination = Pagination::parse(
        params.page.as_deref(),
        params.limit.as_deref(),
        TRANSACTIONS_PAGE_SIZE,
    )?;
    let (transactions, total) = tokio::try_join!(
        state
            .store
            .list_transactions(pagination.offset(), pagination.limit),
        state.store.count_transactions(),
    )?;

    Ok(Json(TransactionPage {
        transactions,
        total_pages: pagination.total_pages(total),
        current_page: pagination.page,
        total,
    }))
}

/// POST /api/analytics/transactions
pub async fn create_transaction(
    State(state): State<AppState>,
    Json(payload): Json<NewTransaction>,
) -> Result<(StatusCode, Json<ApiResponse<Transaction>>)> {
    payload.validate()?;
    let transaction = payload.into_transaction();
    state.store.insert_transaction(&transaction).await?;

    info!(
        transaction_id = %transaction.transaction_id,
        user_id = %transaction.user_id,
        "Transaction stored"
    );
    Ok((StatusCode::CREATED, ApiResponse::ok(transaction)))
}
