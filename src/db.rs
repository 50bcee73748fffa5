//! Document store backed by PostgreSQL through SQLx

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    FileType, PopularSearch, SearchHistoryEntry, Transaction, TransactionStatus, UploadFilter,
    UploadLogType, UploadMetadata, UploadStatus,
};
use crate::store::{DocumentStore, UploadOutcome, UploadQuery};

const UPLOAD_COLUMNS: &str = "id, filename, file_type, size, upload_date, status, log_type, \
                              document_count, error_message";

const TRANSACTION_COLUMNS: &str =
    "id, transaction_id, user_id, product_id, amount, status, timestamp, created_at";

/// Database connection pool and operations
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(50)
            .min_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect(connection_string)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect: {}", e)))?;

        info!("Database connection pool established");
        Ok(Self { pool })
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Migration failed: {}", e)))?;
        info!("Database schema up to date");
        Ok(())
    }
}

/// Columns and values bound by an upload filter, starting at `$first`
fn filter_clause(filter: &UploadFilter, first: usize) -> (String, Vec<&'static str>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();

    if let Some(status) = filter.status {
        conditions.push(format!("status = ${}", first + values.len()));
        values.push(status.as_str());
    }
    if let Some(log_type) = filter.log_type {
        conditions.push(format!("log_type = ${}", first + values.len()));
        values.push(log_type.as_str());
    }

    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!("WHERE {}", conditions.join(" AND ")), values)
    }
}

fn upload_from_row(row: &PgRow) -> Result<UploadMetadata> {
    let file_type: String = row.get("file_type");
    let status: String = row.get("status");
    let log_type: String = row.get("log_type");
    let size: i64 = row.get("size");
    let document_count: i64 = row.get("document_count");

    Ok(UploadMetadata {
        id: row.get("id"),
        filename: row.get("filename"),
        file_type: FileType::from_str(&file_type)?,
        size: size.max(0) as u64,
        upload_date: row.get("upload_date"),
        status: UploadStatus::from_str(&status)?,
        log_type: UploadLogType::from_str(&log_type)?,
        document_count: document_count.max(0) as u64,
        error_message: row.get("error_message"),
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let status: String = row.get("status");
    Ok(Transaction {
        id: row.get("id"),
        transaction_id: row.get("transaction_id"),
        user_id: row.get("user_id"),
        product_id: row.get("product_id"),
        amount: row.get("amount"),
        status: TransactionStatus::from_str(&status)?,
        timestamp: row.get("timestamp"),
        created_at: row.get("created_at"),
    })
}

fn history_from_row(row: &PgRow) -> SearchHistoryEntry {
    let page: i32 = row.get("page");
    let size: i32 = row.get("size");
    let results_count: i64 = row.get("results_count");
    let execution_time_ms: i64 = row.get("execution_time_ms");
    SearchHistoryEntry {
        query: row.get("query"),
        filters: row.get("filters"),
        page: page.max(0) as u32,
        size: size.max(0) as u32,
        results_count: results_count.max(0) as u64,
        execution_time_ms: execution_time_ms.max(0) as u64,
        search_date: row.get("search_date"),
    }
}

#[async_trait]
impl DocumentStore for Database {
    async fn insert_upload(&self, upload: &UploadMetadata) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO uploads (
                id, filename, file_type, size, upload_date, status,
                log_type, document_count, error_message
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(upload.id)
        .bind(&upload.filename)
        .bind(upload.file_type.as_str())
        .bind(upload.size as i64)
        .bind(upload.upload_date)
        .bind(upload.status.as_str())
        .bind(upload.log_type.as_str())
        .bind(upload.document_count as i64)
        .bind(&upload.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_upload(&self, id: Uuid) -> Result<UploadMetadata> {
        let query = format!("SELECT {} FROM uploads WHERE id = $1", UPLOAD_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Upload {} not found", id)))?;

        upload_from_row(&row)
    }

    async fn list_uploads(&self, query: UploadQuery<'_>) -> Result<Vec<UploadMetadata>> {
        let (clause, values) = filter_clause(query.filter, 1);
        let next = values.len() + 1;

        // Sort column and direction come from closed enums, never from input
        let sql = format!(
            "SELECT {} FROM uploads {} ORDER BY {} {} LIMIT ${} OFFSET ${}",
            UPLOAD_COLUMNS,
            clause,
            query.sort.column(),
            query.order.as_str().to_uppercase(),
            next,
            next + 1
        );

        let mut statement = sqlx::query(&sql);
        for value in values {
            statement = statement.bind(value);
        }
        let rows = statement
            .bind(query.limit as i64)
            .bind(query.offset as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(upload_from_row).collect()
    }

    async fn count_uploads(&self, filter: &UploadFilter) -> Result<u64> {
        let (clause, values) = filter_clause(filter, 1);
        let sql = format!("SELECT COUNT(*) AS total FROM uploads {}", clause);

        let mut statement = sqlx::query(&sql);
        for value in values {
            statement = statement.bind(value);
        }
        let row = statement.fetch_one(&self.pool).await?;
        let total: i64 = row.get("total");
        Ok(total.max(0) as u64)
    }

    async fn complete_upload(&self, id: Uuid, outcome: UploadOutcome) -> Result<UploadMetadata> {
        let (status, document_count, message) = match outcome {
            UploadOutcome::Processed { document_count } => {
                (UploadStatus::Processed, document_count as i64, None)
            }
            UploadOutcome::Failed { message } => (UploadStatus::Error, 0, Some(message)),
        };

        let sql = format!(
            r#"
            UPDATE uploads
            SET status = $2, document_count = $3, error_message = $4
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            UPLOAD_COLUMNS
        );
        let updated = sqlx::query(&sql)
            .bind(id)
            .bind(status.as_str())
            .bind(document_count)
            .bind(message)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(row) => upload_from_row(&row),
            None => {
                let current = self.get_upload(id).await?;
                Err(AppError::Validation(format!(
                    "Upload {} is already {}",
                    id,
                    current.status.as_str()
                )))
            }
        }
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions (
                id, transaction_id, user_id, product_id, amount,
                status, timestamp, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(transaction.id)
        .bind(&transaction.transaction_id)
        .bind(&transaction.user_id)
        .bind(&transaction.product_id)
        .bind(transaction.amount)
        .bind(transaction.status.as_str())
        .bind(transaction.timestamp)
        .bind(transaction.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(AppError::Validation(format!(
                    "Transaction {} already exists",
                    transaction.transaction_id
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_transactions(&self, offset: u64, limit: u32) -> Result<Vec<Transaction>> {
        let sql = format!(
            "SELECT {} FROM transactions ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn count_transactions(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM transactions")
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.get("total");
        Ok(total.max(0) as u64)
    }

    async fn record_search(&self, entry: &SearchHistoryEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO search_history (
                query, filters, page, size, results_count,
                execution_time_ms, search_date
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&entry.query)
        .bind(&entry.filters)
        .bind(entry.page as i32)
        .bind(entry.size as i32)
        .bind(entry.results_count as i64)
        .bind(entry.execution_time_ms as i64)
        .bind(entry.search_date)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn search_history(&self, limit: u32) -> Result<Vec<SearchHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT query, filters, page, size, results_count, execution_time_ms, search_date
            FROM search_history
            ORDER BY search_date DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(history_from_row).collect())
    }

    async fn popular_searches(&self, limit: u32) -> Result<Vec<PopularSearch>> {
        let rows = sqlx::query(
            r#"
            SELECT query, COUNT(*) AS count, MAX(search_date) AS last_search
            FROM search_history
            GROUP BY query
            ORDER BY count DESC, last_search DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let count: i64 = row.get("count");
                PopularSearch {
                    query: row.get("query"),
                    count: count.max(0) as u64,
                    last_search: row.get("last_search"),
                }
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
