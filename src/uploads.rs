//! Upload subsystem - stores log files and tracks their processing state

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::ingest::read_file;
use crate::models::{
    FileType, IngestionTally, LogRecord, SortOrder, UploadFilter, UploadLogType, UploadMetadata,
    UploadSortField, UploadStatus,
};
use crate::query::{parse_positive, Pagination, MAX_PAGE_SIZE};
use crate::reader::FileFormat;
use crate::shipper::LogShipper;
use crate::store::{DocumentStore, UploadOutcome, UploadQuery};

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["csv", "ndjson", "json"];

const DEFAULT_FILES_PAGE_SIZE: u32 = 20;
const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Query parameters of the file listing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub status: Option<String>,
    pub log_type: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

/// Query parameters of the upload history
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub status: Option<String>,
    pub log_type: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl PageInfo {
    pub fn new(pagination: Pagination, total: u64) -> Self {
        let total_pages = pagination.total_pages(total);
        Self {
            total,
            page: pagination.page,
            limit: pagination.limit,
            total_pages,
            has_next_page: (pagination.page as u64) < total_pages,
            has_prev_page: pagination.page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FilePage {
    pub files: Vec<UploadMetadata>,
    pub pagination: PageInfo,
}

/// A freshly saved upload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedUpload {
    #[serde(flatten)]
    pub upload: UploadMetadata,
    pub original_name: String,
    pub path: String,
}

/// Result of shipping a stored upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadProcessing {
    pub upload: UploadMetadata,
    pub result: IngestionTally,
}

/// Log category guessed from a file name; unknown names are transactions
pub fn detect_log_type(filename: &str) -> UploadLogType {
    let name = filename.to_lowercase();
    if name.contains("transaction") {
        UploadLogType::Transaction
    } else if name.contains("error") {
        UploadLogType::Error
    } else if name.contains("fraud") {
        UploadLogType::Fraud
    } else if name.contains("performance") {
        UploadLogType::Performance
    } else if name.contains("behavior") || name.contains("behaviour") {
        UploadLogType::Behavior
    } else {
        UploadLogType::Transaction
    }
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn parse_sort_field(raw: &str) -> Result<UploadSortField> {
    match raw {
        "uploadDate" => Ok(UploadSortField::UploadDate),
        "filename" => Ok(UploadSortField::Filename),
        "size" => Ok(UploadSortField::Size),
        "documentCount" => Ok(UploadSortField::DocumentCount),
        other => Err(AppError::Validation(format!(
            "Invalid sort field '{}'. Valid options: uploadDate, filename, size, documentCount",
            other
        ))),
    }
}

fn parse_opt<T: FromStr<Err = AppError>>(raw: Option<&str>) -> Result<Option<T>> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(T::from_str)
        .transpose()
}

#[derive(Clone)]
pub struct UploadService {
    store: Arc<dyn DocumentStore>,
    upload_dir: PathBuf,
    max_bytes: u64,
    shipper: LogShipper,
}

impl UploadService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        upload_dir: impl Into<PathBuf>,
        max_bytes: u64,
        shipper: LogShipper,
    ) -> Self {
        Self {
            store,
            upload_dir: upload_dir.into(),
            max_bytes,
            shipper,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Check extension and size, reporting every violation at once
    pub fn validate_file(&self, filename: &str, size: u64) -> Result<FileType> {
        let mut problems = Vec::new();

        let extension = extension_of(filename);
        let allowed = extension
            .as_deref()
            .filter(|ext| ALLOWED_EXTENSIONS.contains(ext));
        if allowed.is_none() {
            problems.push(format!(
                "Extension not allowed. Accepted extensions: .{}",
                ALLOWED_EXTENSIONS.join(", .")
            ));
        }
        if size > self.max_bytes {
            problems.push(format!(
                "File too large. Max size: {}MB",
                self.max_bytes / (1024 * 1024)
            ));
        }

        match allowed {
            Some(ext) if problems.is_empty() => FileType::from_str(ext),
            _ => Err(AppError::Validation(problems.join(", "))),
        }
    }

    /// Write the file as `<stem>_<epoch millis><ext>` and record it as pending
    pub async fn save_file(&self, original_name: &str, bytes: &[u8]) -> Result<SavedUpload> {
        let base = Path::new(original_name)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AppError::Validation("A file name is required".into()))?;
        let file_type = self.validate_file(base, bytes.len() as u64)?;

        let path = Path::new(base);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("upload");
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let filename = format!("{}_{}.{}", stem, Utc::now().timestamp_millis(), ext);

        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let target = self.upload_dir.join(&filename);
        tokio::fs::write(&target, bytes).await?;
        info!(path = %target.display(), bytes = bytes.len(), "Saved upload");

        let upload = UploadMetadata::pending(
            filename,
            file_type,
            bytes.len() as u64,
            detect_log_type(base),
        );
        self.store.insert_upload(&upload).await?;
        info!(upload_id = %upload.id, log_type = upload.log_type.as_str(), "Recorded upload");

        Ok(SavedUpload {
            upload,
            original_name: base.to_string(),
            path: target.display().to_string(),
        })
    }

    pub async fn get_upload(&self, id: Uuid) -> Result<UploadMetadata> {
        self.store.get_upload(id).await
    }

    /// Filtered, sorted page of uploads with pagination metadata
    pub async fn list_files(&self, params: &ListFilesParams) -> Result<FilePage> {
        let pagination = Pagination::parse(
            params.page.as_deref(),
            params.limit.as_deref(),
            DEFAULT_FILES_PAGE_SIZE,
        )?;
        let filter = UploadFilter {
            status: parse_opt::<UploadStatus>(params.status.as_deref())?,
            log_type: parse_opt::<UploadLogType>(params.log_type.as_deref())?,
        };
        let sort = match params.sort_by.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => parse_sort_field(raw)?,
            _ => UploadSortField::UploadDate,
        };
        let order = parse_opt::<SortOrder>(params.sort_order.as_deref())?.unwrap_or_default();

        let query = UploadQuery {
            filter: &filter,
            sort,
            order,
            offset: pagination.offset(),
            limit: pagination.limit,
        };
        let (files, total) = tokio::try_join!(
            self.store.list_uploads(query),
            self.store.count_uploads(&filter),
        )?;

        Ok(FilePage {
            files,
            pagination: PageInfo::new(pagination, total),
        })
    }

    /// Most recent uploads first
    pub async fn upload_history(&self, params: &HistoryParams) -> Result<Vec<UploadMetadata>> {
        let filter = UploadFilter {
            status: parse_opt::<UploadStatus>(params.status.as_deref())?,
            log_type: parse_opt::<UploadLogType>(params.log_type.as_deref())?,
        };
        let limit = parse_positive("limit", params.limit.as_deref(), DEFAULT_HISTORY_LIMIT)?
            .min(MAX_PAGE_SIZE);

        self.store
            .list_uploads(UploadQuery {
                filter: &filter,
                sort: UploadSortField::UploadDate,
                order: SortOrder::Desc,
                offset: 0,
                limit,
            })
            .await
    }

    /// Ship a pending upload and move it to `processed` or `error`
    pub async fn process_upload(&self, id: Uuid) -> Result<UploadProcessing> {
        let upload = self.store.get_upload(id).await?;
        if upload.status != UploadStatus::Pending {
            return Err(AppError::Validation(format!(
                "Upload {} is already {}",
                id,
                upload.status.as_str()
            )));
        }

        let records = match self.read_upload(&upload).await {
            Ok(records) => records,
            Err(e) => {
                warn!(upload_id = %id, error = %e, "Upload could not be read");
                let upload = self
                    .store
                    .complete_upload(id, UploadOutcome::Failed { message: e.to_string() })
                    .await?;
                return Ok(UploadProcessing {
                    upload,
                    result: IngestionTally::default(),
                });
            }
        };

        let tally = self.shipper.ship(records, upload.log_type.log_type()).await;
        let outcome = if tally.total > 0 && tally.success == 0 {
            UploadOutcome::Failed {
                message: format!("All {} records failed delivery", tally.total),
            }
        } else {
            UploadOutcome::Processed {
                document_count: tally.success as u64,
            }
        };

        let upload = self.store.complete_upload(id, outcome).await?;
        info!(
            upload_id = %id,
            status = upload.status.as_str(),
            success = tally.success,
            failed = tally.failed,
            "Processed upload"
        );
        Ok(UploadProcessing {
            upload,
            result: tally,
        })
    }

    async fn read_upload(&self, upload: &UploadMetadata) -> Result<Vec<LogRecord>> {
        let format = FileFormat::try_from(upload.file_type)?;
        let path = self.upload_dir.join(&upload.filename);
        if !tokio::fs::try_exists(&path).await? {
            return Err(AppError::NotFound(format!(
                "Stored file {} is missing",
                upload.filename
            )));
        }
        read_file(path, format).await
    }
}
