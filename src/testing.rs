//! In-memory fakes for the external collaborators

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::cache::{Cache, CacheError};
use crate::engine::{ClusterHealth, SearchEngine, SearchResult};
use crate::error::{AppError, Result};
use crate::models::{
    LogRecord, PopularSearch, SearchHistoryEntry, SortOrder, Transaction, UploadMetadata,
    UploadSortField, UploadStatus,
};
use crate::shipper::LogSink;
use crate::store::{DocumentStore, UploadOutcome, UploadQuery};

/// Sink that records deliveries and fails chosen attempts (0-based)
#[derive(Default)]
pub struct FakeSink {
    fail_on: HashSet<usize>,
    delay: Option<Duration>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delivered: Mutex<Vec<LogRecord>>,
}

impl FakeSink {
    pub fn failing_on(attempts: &[usize]) -> Self {
        Self {
            fail_on: attempts.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<LogRecord> {
        self.delivered.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogSink for FakeSink {
    async fn deliver(&self, record: &LogRecord) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on.contains(&attempt) {
            return Err(AppError::Connection("pipeline refused connection".into()));
        }
        self.delivered.lock().push(record.clone());
        Ok(())
    }
}

type SearchFn = Box<dyn Fn(&[String], &Value) -> Result<SearchResult> + Send + Sync>;
type CountFn = Box<dyn Fn(&Value) -> Result<u64> + Send + Sync>;

/// Engine answering from closures and recording every request body
pub struct FakeEngine {
    search: SearchFn,
    count: CountFn,
    searches: Mutex<Vec<(Vec<String>, Value)>>,
    counts: Mutex<Vec<Value>>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            search: Box::new(|_, _| Ok(SearchResult::default())),
            count: Box::new(|_| Ok(0)),
            searches: Mutex::new(Vec::new()),
            counts: Mutex::new(Vec::new()),
        }
    }
}

impl FakeEngine {
    pub fn on_search(
        mut self,
        f: impl Fn(&[String], &Value) -> Result<SearchResult> + Send + Sync + 'static,
    ) -> Self {
        self.search = Box::new(f);
        self
    }

    pub fn on_count(mut self, f: impl Fn(&Value) -> Result<u64> + Send + Sync + 'static) -> Self {
        self.count = Box::new(f);
        self
    }

    /// Every call fails with a connection error
    pub fn unreachable() -> Self {
        Self::default()
            .on_search(|_, _| Err(AppError::Connection("connect ECONNREFUSED".into())))
            .on_count(|_| Err(AppError::Connection("connect ECONNREFUSED".into())))
    }

    pub fn searches(&self) -> Vec<(Vec<String>, Value)> {
        self.searches.lock().clone()
    }

    pub fn counts(&self) -> Vec<Value> {
        self.counts.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.searches.lock().len() + self.counts.lock().len()
    }
}

/// Search result carrying only aggregations
pub fn aggregations(total: u64, aggs: Value) -> SearchResult {
    SearchResult {
        total,
        hits: Vec::new(),
        aggregations: Some(aggs),
    }
}

#[async_trait]
impl SearchEngine for FakeEngine {
    async fn search(&self, indices: &[String], body: &Value) -> Result<SearchResult> {
        self.searches.lock().push((indices.to_vec(), body.clone()));
        (self.search)(indices, body)
    }

    async fn count(&self, _indices: &[String], query: &Value) -> Result<u64> {
        self.counts.lock().push(query.clone());
        (self.count)(query)
    }

    async fn health(&self) -> Result<ClusterHealth> {
        Ok(ClusterHealth {
            status: "green".into(),
            cluster_name: "test-cluster".into(),
            number_of_nodes: 1,
            active_shards: 5,
            version: Some("8.11.0".into()),
        })
    }
}

/// Cache whose backend is always down
pub struct FailingCache;

#[async_trait]
impl Cache for FailingCache {
    async fn get(&self, _key: &str) -> std::result::Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn set(
        &self,
        _key: &str,
        _value: &str,
        _ttl_secs: u64,
    ) -> std::result::Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn ping(&self) -> std::result::Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

/// Document store kept in memory
#[derive(Default)]
pub struct MemoryStore {
    uploads: Mutex<Vec<UploadMetadata>>,
    transactions: Mutex<Vec<Transaction>>,
    searches: Mutex<Vec<SearchHistoryEntry>>,
    fail_history: bool,
}

impl MemoryStore {
    /// Store that rejects search-history writes
    pub fn failing_history() -> Self {
        Self {
            fail_history: true,
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> Vec<UploadMetadata> {
        self.uploads.lock().clone()
    }

    pub fn recorded_searches(&self) -> Vec<SearchHistoryEntry> {
        self.searches.lock().clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_upload(&self, upload: &UploadMetadata) -> Result<()> {
        self.uploads.lock().push(upload.clone());
        Ok(())
    }

    async fn get_upload(&self, id: Uuid) -> Result<UploadMetadata> {
        self.uploads
            .lock()
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Upload {} not found", id)))
    }

    async fn list_uploads(&self, query: UploadQuery<'_>) -> Result<Vec<UploadMetadata>> {
        let mut matching: Vec<UploadMetadata> = self
            .uploads
            .lock()
            .iter()
            .filter(|u| query.filter.status.map_or(true, |s| u.status == s))
            .filter(|u| query.filter.log_type.map_or(true, |t| u.log_type == t))
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            let ordering = match query.sort {
                UploadSortField::UploadDate => a.upload_date.cmp(&b.upload_date),
                UploadSortField::Filename => a.filename.cmp(&b.filename),
                UploadSortField::Size => a.size.cmp(&b.size),
                UploadSortField::DocumentCount => a.document_count.cmp(&b.document_count),
            };
            match query.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        Ok(matching
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn count_uploads(&self, filter: &crate::models::UploadFilter) -> Result<u64> {
        Ok(self
            .uploads
            .lock()
            .iter()
            .filter(|u| filter.status.map_or(true, |s| u.status == s))
            .filter(|u| filter.log_type.map_or(true, |t| u.log_type == t))
            .count() as u64)
    }

    async fn complete_upload(&self, id: Uuid, outcome: UploadOutcome) -> Result<UploadMetadata> {
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Upload {} not found", id)))?;

        if upload.status != UploadStatus::Pending {
            return Err(AppError::Validation(format!(
                "Upload {} is already {}",
                id,
                upload.status.as_str()
            )));
        }

        match outcome {
            UploadOutcome::Processed { document_count } => {
                upload.status = UploadStatus::Processed;
                upload.document_count = document_count;
            }
            UploadOutcome::Failed { message } => {
                upload.status = UploadStatus::Error;
                upload.error_message = Some(message);
            }
        }
        Ok(upload.clone())
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
        let mut transactions = self.transactions.lock();
        if transactions
            .iter()
            .any(|t| t.transaction_id == transaction.transaction_id)
        {
            return Err(AppError::Validation(format!(
                "Transaction {} already exists",
                transaction.transaction_id
            )));
        }
        transactions.push(transaction.clone());
        Ok(())
    }

    async fn list_transactions(&self, offset: u64, limit: u32) -> Result<Vec<Transaction>> {
        let mut transactions = self.transactions.lock().clone();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transactions
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_transactions(&self) -> Result<u64> {
        Ok(self.transactions.lock().len() as u64)
    }

    async fn record_search(&self, entry: &SearchHistoryEntry) -> Result<()> {
        if self.fail_history {
            return Err(AppError::Database("history table unavailable".into()));
        }
        self.searches.lock().push(entry.clone());
        Ok(())
    }

    async fn search_history(&self, limit: u32) -> Result<Vec<SearchHistoryEntry>> {
        let mut entries = self.searches.lock().clone();
        entries.sort_by(|a, b| b.search_date.cmp(&a.search_date));
        entries.truncate(limit as usize);
        Ok(entries)
    }

    async fn popular_searches(&self, limit: u32) -> Result<Vec<PopularSearch>> {
        let mut grouped: BTreeMap<String, PopularSearch> = BTreeMap::new();
        for entry in self.searches.lock().iter() {
            grouped
                .entry(entry.query.clone())
                .and_modify(|p| {
                    p.count += 1;
                    p.last_search = p.last_search.max(entry.search_date);
                })
                .or_insert_with(|| PopularSearch {
                    query: entry.query.clone(),
                    count: 1,
                    last_search: entry.search_date,
                });
        }
        let mut popular: Vec<PopularSearch> = grouped.into_values().collect();
        popular.sort_by(|a, b| b.count.cmp(&a.count));
        popular.truncate(limit as usize);
        Ok(popular)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
