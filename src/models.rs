//! Core domain models for LogVault

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::AppError;

/// Marker stamped on every record shipped by the ingestion pipeline
pub const INGESTION_SOURCE: &str = "api-ingestion";

/// Kind of e-commerce log a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Transaction,
    Error,
    Fraud,
    Performance,
    UserBehavior,
}

impl LogType {
    pub const ALL: [LogType; 5] = [
        LogType::Transaction,
        LogType::Error,
        LogType::Fraud,
        LogType::Performance,
        LogType::UserBehavior,
    ];

    /// Value stamped into the record's `type` field
    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::Transaction => "transaction",
            LogType::Error => "error",
            LogType::Fraud => "fraud",
            LogType::Performance => "performance",
            LogType::UserBehavior => "user_behavior",
        }
    }

    /// File stem of the per-type source files (`<stem>.json`, `<stem>.csv`)
    pub fn file_stem(&self) -> &'static str {
        match self {
            LogType::Transaction => "transactions",
            LogType::Error => "errors",
            LogType::Fraud => "fraud",
            LogType::Performance => "performance",
            LogType::UserBehavior => "user_behavior",
        }
    }

    /// Engine index holding this type's documents
    pub fn index_name(&self) -> &'static str {
        match self {
            LogType::Transaction => "ecommerce-transactions",
            LogType::Error => "ecommerce-errors",
            LogType::Fraud => "ecommerce-fraud",
            LogType::Performance => "ecommerce-performance",
            LogType::UserBehavior => "ecommerce-user-behavior",
        }
    }

    /// Every index known to the analytics side, in a stable order
    pub fn all_indices() -> Vec<String> {
        Self::ALL.iter().map(|t| t.index_name().to_string()).collect()
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogType {
    type Err = AppError;

    /// Accepts the stamped name, the file stem, or the upload subsystem's `behavior`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transaction" | "transactions" => Ok(LogType::Transaction),
            "error" | "errors" => Ok(LogType::Error),
            "fraud" => Ok(LogType::Fraud),
            "performance" => Ok(LogType::Performance),
            "user_behavior" | "behavior" => Ok(LogType::UserBehavior),
            other => Err(AppError::Validation(format!(
                "Invalid log type '{}'. Valid types: {}",
                other,
                LogType::ALL
                    .iter()
                    .map(|t| t.file_stem())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

/// A single log record with an open-ended field set.
///
/// Only `timestamp`, `type` and `source` are guaranteed, and only once the
/// record has been stamped for delivery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogRecord(Map<String, Value>);

impl LogRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Existing timestamp, if present and non-empty
    pub fn timestamp(&self) -> Option<&str> {
        self.0
            .get("timestamp")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Whether the record carries a usable timestamp of any JSON type.
    ///
    /// `null`, `false`, `""` and `0` count as missing.
    pub fn has_timestamp(&self) -> bool {
        match self.0.get("timestamp") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Number(n)) => n.as_f64().map_or(true, |v| v != 0.0),
            Some(_) => true,
        }
    }

    /// Copy of this record tagged for delivery.
    ///
    /// `type` and `source` always overwrite; `timestamp` is only filled in when absent.
    pub fn stamped(&self, log_type: Option<LogType>, now: DateTime<Utc>) -> LogRecord {
        let mut fields = self.0.clone();
        if let Some(log_type) = log_type {
            fields.insert("type".into(), Value::String(log_type.as_str().into()));
            fields.insert("source".into(), Value::String(INGESTION_SOURCE.into()));
        }
        if !self.has_timestamp() {
            fields.insert(
                "timestamp".into(),
                Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        LogRecord(fields)
    }
}

impl From<Map<String, Value>> for LogRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Delivery tally for one log type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionTally {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}

impl IngestionTally {
    pub fn merge(&mut self, other: IngestionTally) {
        self.total += other.total;
        self.success += other.success;
        self.failed += other.failed;
    }
}

/// Result of one ingestion run, keyed by log type
pub type IngestionReport = BTreeMap<LogType, IngestionTally>;

/// Sum every per-type tally of a run
pub fn report_totals(report: &IngestionReport) -> IngestionTally {
    report.values().fold(IngestionTally::default(), |mut acc, t| {
        acc.merge(*t);
        acc
    })
}

/// File formats accepted by the reader and the upload subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Csv,
    Json,
    Ndjson,
    Txt,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Csv => "csv",
            FileType::Json => "json",
            FileType::Ndjson => "ndjson",
            FileType::Txt => "txt",
        }
    }
}

impl FromStr for FileType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(FileType::Csv),
            "json" => Ok(FileType::Json),
            "ndjson" => Ok(FileType::Ndjson),
            "txt" => Ok(FileType::Txt),
            other => Err(AppError::Validation(format!("Unknown file type '{}'", other))),
        }
    }
}

/// Processing status of an uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Processed,
    Error,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Processed => "processed",
            UploadStatus::Error => "error",
        }
    }
}

impl FromStr for UploadStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "processed" => Ok(UploadStatus::Processed),
            "error" => Ok(UploadStatus::Error),
            other => Err(AppError::Validation(format!("Invalid upload status '{}'", other))),
        }
    }
}

/// Log category recorded on an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadLogType {
    Transaction,
    Error,
    Fraud,
    Performance,
    Behavior,
}

impl UploadLogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadLogType::Transaction => "transaction",
            UploadLogType::Error => "error",
            UploadLogType::Fraud => "fraud",
            UploadLogType::Performance => "performance",
            UploadLogType::Behavior => "behavior",
        }
    }

    /// Pipeline type used when the upload is shipped
    pub fn log_type(&self) -> LogType {
        match self {
            UploadLogType::Transaction => LogType::Transaction,
            UploadLogType::Error => LogType::Error,
            UploadLogType::Fraud => LogType::Fraud,
            UploadLogType::Performance => LogType::Performance,
            UploadLogType::Behavior => LogType::UserBehavior,
        }
    }
}

impl FromStr for UploadLogType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transaction" => Ok(UploadLogType::Transaction),
            "error" => Ok(UploadLogType::Error),
            "fraud" => Ok(UploadLogType::Fraud),
            "performance" => Ok(UploadLogType::Performance),
            "behavior" => Ok(UploadLogType::Behavior),
            other => Err(AppError::Validation(format!("Invalid upload log type '{}'", other))),
        }
    }
}

/// Persistent metadata for an uploaded log file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub id: Uuid,
    pub filename: String,
    pub file_type: FileType,
    pub size: u64,
    pub upload_date: DateTime<Utc>,
    pub status: UploadStatus,
    pub log_type: UploadLogType,
    pub document_count: u64,
    pub error_message: Option<String>,
}

impl UploadMetadata {
    /// Fresh pending record for a file that was just saved
    pub fn pending(
        filename: String,
        file_type: FileType,
        size: u64,
        log_type: UploadLogType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename,
            file_type,
            size,
            upload_date: Utc::now(),
            status: UploadStatus::Pending,
            log_type,
            document_count: 0,
            error_message: None,
        }
    }
}

/// Filter for upload listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadFilter {
    pub status: Option<UploadStatus>,
    pub log_type: Option<UploadLogType>,
}

/// Sortable upload columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UploadSortField {
    UploadDate,
    Filename,
    Size,
    DocumentCount,
}

impl UploadSortField {
    pub fn column(&self) -> &'static str {
        match self {
            UploadSortField::UploadDate => "upload_date",
            UploadSortField::Filename => "filename",
            UploadSortField::Size => "size",
            UploadSortField::DocumentCount => "document_count",
        }
    }
}

/// Sort direction shared by engine and store queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl FromStr for SortOrder {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(AppError::Validation(format!(
                "Invalid sort order '{}'. Valid options: asc, desc",
                other
            ))),
        }
    }
}

/// Status of a stored transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(AppError::Validation(format!("Invalid transaction status '{}'", other))),
        }
    }
}

/// A transaction kept in the document store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub transaction_id: String,
    pub user_id: String,
    pub product_id: Option<String>,
    pub amount: Option<f64>,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Request payload for creating a transaction
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTransaction {
    pub transaction_id: String,
    pub user_id: String,
    pub product_id: Option<String>,
    pub amount: Option<f64>,
    #[serde(default)]
    pub status: TransactionStatus,
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewTransaction {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.transaction_id.trim().is_empty() {
            return Err(AppError::Validation("transactionId is required".into()));
        }
        if self.user_id.trim().is_empty() {
            return Err(AppError::Validation("userId is required".into()));
        }
        Ok(())
    }

    pub fn into_transaction(self) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: Uuid::new_v4(),
            transaction_id: self.transaction_id,
            user_id: self.user_id,
            product_id: self.product_id,
            amount: self.amount,
            status: self.status,
            timestamp: self.timestamp.unwrap_or(now),
            created_at: now,
        }
    }
}

/// One recorded free-text search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHistoryEntry {
    pub query: String,
    pub filters: Value,
    pub page: u32,
    pub size: u32,
    pub results_count: u64,
    pub execution_time_ms: u64,
    pub search_date: DateTime<Utc>,
}

/// Aggregated popularity of a search query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularSearch {
    pub query: String,
    pub count: u64,
    pub last_search: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(value: Value) -> LogRecord {
        match value {
            Value::Object(map) => LogRecord::new(map),
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn test_stamp_fills_missing_timestamp() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let stamped = record(json!({"amount": 10})).stamped(Some(LogType::Fraud), now);

        assert_eq!(stamped.get("type"), Some(&json!("fraud")));
        assert_eq!(stamped.get("source"), Some(&json!(INGESTION_SOURCE)));
        assert_eq!(stamped.timestamp(), Some("2024-03-01T12:00:00.000Z"));
    }

    #[test]
    fn test_stamp_keeps_existing_timestamp() {
        let now = Utc::now();
        let original = record(json!({"timestamp": "2023-01-01T00:00:00Z", "type": "bogus"}));
        let stamped = original.stamped(Some(LogType::Error), now);

        assert_eq!(stamped.timestamp(), Some("2023-01-01T00:00:00Z"));
        assert_eq!(stamped.get("type"), Some(&json!("error")));
        // the source record is untouched
        assert_eq!(original.get("type"), Some(&json!("bogus")));
    }

    #[test]
    fn test_empty_timestamp_counts_as_missing() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let stamped = record(json!({"timestamp": ""})).stamped(None, now);
        assert_eq!(stamped.timestamp(), Some("2024-01-01T00:00:00.000Z"));
        assert!(stamped.get("source").is_none());
    }

    #[test]
    fn test_stamp_keeps_numeric_timestamp() {
        let now = Utc::now();
        let original = record(json!({"timestamp": 1714557600000u64, "amount": 5}));
        let stamped = original.stamped(Some(LogType::Transaction), now);
        assert_eq!(stamped.get("timestamp"), Some(&json!(1714557600000u64)));
    }

    #[test]
    fn test_zero_and_null_timestamps_count_as_missing() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for missing in [json!(0), json!(null), json!(false)] {
            let stamped = record(json!({ "timestamp": missing })).stamped(None, now);
            assert_eq!(stamped.timestamp(), Some("2024-01-01T00:00:00.000Z"));
        }
    }

    #[test]
    fn test_log_type_parsing() {
        assert_eq!("transactions".parse::<LogType>().unwrap(), LogType::Transaction);
        assert_eq!("behavior".parse::<LogType>().unwrap(), LogType::UserBehavior);
        let err = "metrics".parse::<LogType>().unwrap_err();
        assert!(err.to_string().contains("transactions, errors, fraud"));
    }

    #[test]
    fn test_report_totals() {
        let mut report = IngestionReport::new();
        report.insert(LogType::Error, IngestionTally { total: 10, success: 7, failed: 3 });
        report.insert(LogType::Fraud, IngestionTally { total: 2, success: 2, failed: 0 });

        assert_eq!(
            report_totals(&report),
            IngestionTally { total: 12, success: 9, failed: 3 }
        );
    }
}
