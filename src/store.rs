//! Document store interface for upload metadata, transactions and search history

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    PopularSearch, SearchHistoryEntry, SortOrder, Transaction, UploadFilter, UploadMetadata,
    UploadSortField,
};

/// Final state of an upload after processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Processed { document_count: u64 },
    Failed { message: String },
}

/// One page of an upload listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadQuery<'a> {
    pub filter: &'a UploadFilter,
    pub sort: UploadSortField,
    pub order: SortOrder,
    pub offset: u64,
    pub limit: u32,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert_upload(&self, upload: &UploadMetadata) -> Result<()>;

    /// `NotFound` when no upload has this id
    async fn get_upload(&self, id: Uuid) -> Result<UploadMetadata>;

    async fn list_uploads(&self, query: UploadQuery<'_>) -> Result<Vec<UploadMetadata>>;

    async fn count_uploads(&self, filter: &UploadFilter) -> Result<u64>;

    /// Move a pending upload to its final state.
    ///
    /// Only `pending` uploads transition; anything else is a `Validation` error.
    async fn complete_upload(&self, id: Uuid, outcome: UploadOutcome) -> Result<UploadMetadata>;

    /// `Validation` error when the transaction id already exists
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()>;

    /// Newest first
    async fn list_transactions(&self, offset: u64, limit: u32) -> Result<Vec<Transaction>>;

    async fn count_transactions(&self) -> Result<u64>;

    async fn record_search(&self, entry: &SearchHistoryEntry) -> Result<()>;

    /// Most recent searches first
    async fn search_history(&self, limit: u32) -> Result<Vec<SearchHistoryEntry>>;

    /// Queries grouped by text, most frequent first
    async fn popular_searches(&self, limit: u32) -> Result<Vec<PopularSearch>>;

    async fn ping(&self) -> Result<()>;
}
