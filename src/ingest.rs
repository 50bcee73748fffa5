//! Ingestion orchestrator - finds per-type log files and ships them

use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::error::{AppError, Result};
use crate::models::{report_totals, IngestionReport, LogRecord, LogType};
use crate::reader::{self, FileFormat};
use crate::shipper::LogShipper;

/// Read a whole file off the async runtime
pub async fn read_file(path: PathBuf, format: FileFormat) -> Result<Vec<LogRecord>> {
    tokio::task::spawn_blocking(move || reader::read_all(&path, format))
        .await
        .map_err(|e| AppError::Internal(format!("reader task failed: {}", e)))?
}

/// Drives reader and shipper over `<logs_dir>/<stem>.json` and `<stem>.csv`.
///
/// Holds no state between runs; re-running ships the same records again.
#[derive(Clone)]
pub struct IngestionOrchestrator {
    logs_dir: PathBuf,
    shipper: LogShipper,
}

impl IngestionOrchestrator {
    pub fn new(logs_dir: impl Into<PathBuf>, shipper: LogShipper) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            shipper,
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Ingest one type, or all five when `only` is `None`.
    ///
    /// Missing or unparsable files contribute no records; the run itself never fails.
    pub async fn run(&self, only: Option<LogType>) -> IngestionReport {
        let types = match only {
            Some(log_type) => vec![log_type],
            None => LogType::ALL.to_vec(),
        };

        info!(dir = %self.logs_dir.display(), types = types.len(), "Starting ingestion");

        let mut report = IngestionReport::new();
        for log_type in types {
            let records = self.collect(log_type).await;
            let tally = self.shipper.ship(records, log_type).await;
            info!(
                log_type = %log_type,
                total = tally.total,
                success = tally.success,
                failed = tally.failed,
                "Ingested log type"
            );
            report.insert(log_type, tally);
        }

        let totals = report_totals(&report);
        info!(
            total = totals.total,
            success = totals.success,
            failed = totals.failed,
            "Ingestion finished"
        );
        report
    }

    /// JSON records first, then CSV records
    async fn collect(&self, log_type: LogType) -> Vec<LogRecord> {
        let mut records = Vec::new();

        for (extension, format) in [("json", FileFormat::Json), ("csv", FileFormat::Csv)] {
            let path = self
                .logs_dir
                .join(format!("{}.{}", log_type.file_stem(), extension));

            match read_file(path.clone(), format).await {
                Ok(mut batch) => {
                    if !batch.is_empty() {
                        info!(path = %path.display(), records = batch.len(), "Read log file");
                    }
                    records.append(&mut batch);
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Skipping unreadable log file");
                }
            }
        }

        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IngestionTally;
    use crate::testing::FakeSink;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn orchestrator(dir: &TempDir, sink: Arc<FakeSink>) -> IngestionOrchestrator {
        IngestionOrchestrator::new(dir.path(), LogShipper::new(sink))
    }

    #[tokio::test]
    async fn test_no_files_is_zero_tally() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(FakeSink::default());

        let report = orchestrator(&dir, sink.clone()).run(None).await;

        assert_eq!(report.len(), 5);
        for tally in report.values() {
            assert_eq!(*tally, IngestionTally::default());
        }
        assert_eq!(sink.attempts(), 0);
    }

    #[tokio::test]
    async fn test_json_then_csv_concatenated() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("transactions.json"),
            "{\"transaction_id\":\"j-1\"}\n{\"transaction_id\":\"j-2\"}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("transactions.csv"),
            "transaction_id,amount\nc-1,10\n",
        )
        .unwrap();
        let sink = Arc::new(FakeSink::default());

        let report = orchestrator(&dir, sink.clone())
            .run(Some(LogType::Transaction))
            .await;

        assert_eq!(report.len(), 1);
        assert_eq!(
            report[&LogType::Transaction],
            IngestionTally { total: 3, success: 3, failed: 0 }
        );
        let ids: Vec<_> = sink
            .delivered()
            .iter()
            .map(|r| r.get("transaction_id").cloned())
            .collect();
        assert_eq!(
            ids,
            vec![Some(json!("j-1")), Some(json!("j-2")), Some(json!("c-1"))]
        );
    }

    #[tokio::test]
    async fn test_partial_delivery_failure() {
        let dir = TempDir::new().unwrap();
        let lines: String = (0..10).map(|i| format!("{{\"seq\":{}}}\n", i)).collect();
        std::fs::write(dir.path().join("errors.json"), lines).unwrap();
        let sink = Arc::new(FakeSink::failing_on(&[1, 4, 8]));

        let report = orchestrator(&dir, sink.clone())
            .run(Some(LogType::Error))
            .await;

        assert_eq!(
            report[&LogType::Error],
            IngestionTally { total: 10, success: 7, failed: 3 }
        );
        assert_eq!(sink.attempts(), 10);
    }

    #[tokio::test]
    async fn test_malformed_file_skipped_run_continues() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("fraud.json"), "{\"a\":1}\nnot json\n").unwrap();
        std::fs::write(dir.path().join("fraud.csv"), "score\n0.9\n").unwrap();
        std::fs::write(dir.path().join("performance.json"), "{\"latency_ms\":12}\n").unwrap();
        let sink = Arc::new(FakeSink::default());

        let report = orchestrator(&dir, sink).run(None).await;

        assert_eq!(report[&LogType::Fraud].total, 1);
        assert_eq!(report[&LogType::Performance].success, 1);
        assert_eq!(report_totals(&report).total, 2);
    }
}
