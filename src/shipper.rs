//! Log shipper - delivers records one at a time to the ingestion pipeline

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{translate_transport, AppError, Result};
use crate::metrics::Metrics;
use crate::models::{IngestionTally, LogRecord, LogType};

/// How often (in delivered records) progress is logged
const PROGRESS_EVERY: usize = 100;

/// Maximum number of per-record errors echoed back from a batch delivery
const MAX_REPORTED_ERRORS: usize = 5;

/// External sink accepting individual log records
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Deliver a single record; an `Err` means the sink did not accept it
    async fn deliver(&self, record: &LogRecord) -> Result<()>;
}

/// Pipeline endpoint reached over HTTP (e.g. a Logstash http input)
pub struct HttpLogSink {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpLogSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build pipeline client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl LogSink for HttpLogSink {
    async fn deliver(&self, record: &LogRecord) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(record)
            .send()
            .await
            .map_err(|e| translate_transport(e, self.timeout))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(AppError::Engine {
            kind: format!("pipeline_http_{}", status.as_u16()),
            reason: body.chars().take(256).collect(),
        })
    }
}

/// Outcome of a caller-supplied batch delivery
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    /// First few failures only
    pub errors: Vec<BatchFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub log: LogRecord,
    pub error: String,
}

/// Best-effort delivery of records to a [`LogSink`].
///
/// A failed record is counted and logged, never retried, and never stops
/// the records after it. With the default concurrency of 1 exactly one
/// delivery is in flight at a time.
#[derive(Clone)]
pub struct LogShipper {
    sink: Arc<dyn LogSink>,
    concurrency: usize,
    metrics: Option<Arc<Metrics>>,
}

impl LogShipper {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            concurrency: 1,
            metrics: None,
        }
    }

    /// Count delivered and failed records in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record(&self, success: usize, failed: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.add_shipped(success as u64, failed as u64);
        }
    }

    /// Allow up to `concurrency` deliveries in flight; counts are unaffected
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Stamp each record with `log_type`, `source` and a timestamp, then deliver.
    pub async fn ship(&self, records: Vec<LogRecord>, log_type: LogType) -> IngestionTally {
        let total = records.len();
        let sink = Arc::clone(&self.sink);

        let mut outcomes = stream::iter(records)
            .map(|record| {
                let sink = Arc::clone(&sink);
                async move {
                    let stamped = record.stamped(Some(log_type), Utc::now());
                    sink.deliver(&stamped).await
                }
            })
            .buffered(self.concurrency);

        let mut tally = IngestionTally {
            total,
            ..IngestionTally::default()
        };

        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Ok(()) => {
                    tally.success += 1;
                    if tally.success % PROGRESS_EVERY == 0 {
                        info!(
                            log_type = %log_type,
                            delivered = tally.success,
                            total = total,
                            "Delivery progress"
                        );
                    }
                }
                Err(e) => {
                    tally.failed += 1;
                    warn!(log_type = %log_type, error = %e, "Failed to deliver log record");
                }
            }
        }

        debug!(
            log_type = %log_type,
            total = tally.total,
            success = tally.success,
            failed = tally.failed,
            "Shipping finished"
        );
        self.record(tally.success, tally.failed);

        tally
    }

    /// Deliver one ad-hoc record, filling in a missing timestamp
    pub async fn deliver_one(&self, record: LogRecord) -> Result<LogRecord> {
        let stamped = record.stamped(None, Utc::now());
        match self.sink.deliver(&stamped).await {
            Ok(()) => {
                self.record(1, 0);
                Ok(stamped)
            }
            Err(e) => {
                self.record(0, 1);
                Err(e)
            }
        }
    }

    /// Deliver a caller-supplied batch sequentially, reporting the first failures
    pub async fn deliver_batch(&self, records: Vec<LogRecord>) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            total: records.len(),
            success: 0,
            failed: 0,
            errors: Vec::new(),
        };

        for record in records {
            let stamped = record.stamped(None, Utc::now());
            match self.sink.deliver(&stamped).await {
                Ok(()) => outcome.success += 1,
                Err(e) => {
                    outcome.failed += 1;
                    warn!(error = %e, "Failed to deliver batch record");
                    if outcome.errors.len() < MAX_REPORTED_ERRORS {
                        outcome.errors.push(BatchFailure {
                            log: stamped,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }
        self.record(outcome.success, outcome.failed);

        outcome
    }
}
