//! Pipeline ingestion endpoints

use std::str::FromStr;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::{AppError, Result};
use crate::models::{report_totals, IngestionReport, IngestionTally, LogRecord, LogType};
use crate::routes::ApiResponse;
use crate::shipper::BatchOutcome;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct IngestionSummary {
    pub results: IngestionReport,
    pub totals: IngestionTally,
}

impl From<IngestionReport> for IngestionSummary {
    fn from(results: IngestionReport) -> Self {
        let totals = report_totals(&results);
        Self { results, totals }
    }
}

fn into_record(value: Value) -> Result<LogRecord> {
    match value {
        Value::Object(map) => Ok(LogRecord::new(map)),
        _ => Err(AppError::Validation("Each log must be a JSON object".into())),
    }
}

/// POST /api/logs/ingest
///
/// Ships every log type found in the logs directory.
pub async fn ingest_all(
    State(state): State<AppState>,
) -> Json<ApiResponse<IngestionSummary>> {
    let report = state.orchestrator.run(None).await;
    ApiResponse::ok(report.into())
}

/// POST /api/logs/ingest/:log_type
pub async fn ingest_type(
    State(state): State<AppState>,
    Path(log_type): Path<String>,
) -> Result<Json<ApiResponse<IngestionSummary>>> {
    let log_type = LogType::from_str(&log_type)?;
    let report = state.orchestrator.run(Some(log_type)).await;
    Ok(ApiResponse::ok(report.into()))
}

/// POST /api/logs/send
///
/// Delivers one record; a missing timestamp is filled in.
pub async fn send_log(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<ApiResponse<LogRecord>>> {
    let record = into_record(payload)?;
    let delivered = state.shipper.deliver_one(record).await?;
    Ok(ApiResponse::ok(delivered))
}

/// POST /api/logs/batch
///
/// Body: `{"logs": [...]}`. Failures are reported, not raised.
pub async fn send_batch(
    State(state): State<AppState>,
    Json(mut payload): Json<Value>,
) -> Result<Json<ApiResponse<BatchOutcome>>> {
    let logs = match payload.get_mut("logs").map(Value::take) {
        Some(Value::Array(logs)) => logs,
        _ => return Err(AppError::Validation("logs must be an array".into())),
    };
    let records = logs
        .into_iter()
        .map(into_record)
        .collect::<Result<Vec<_>>>()?;

    let outcome = state.shipper.deliver_batch(records).await;
    info!(
        total = outcome.total,
        success = outcome.success,
        failed = outcome.failed,
        "Batch delivered"
    );
    Ok(ApiResponse::ok(outcome))
}
