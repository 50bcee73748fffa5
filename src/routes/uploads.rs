//! Upload endpoints

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::UploadMetadata;
use crate::routes::ApiResponse;
use crate::state::AppState;
use crate::uploads::{HistoryParams, ListFilesParams, PageInfo, SavedUpload, UploadProcessing};

const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub success: bool,
    pub data: Vec<UploadMetadata>,
    pub pagination: PageInfo,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub count: usize,
    pub data: Vec<UploadMetadata>,
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::Validation(format!("Invalid upload id '{}'", raw)))
}

/// POST /api/upload
///
/// Multipart form with a single `file` field.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<SavedUpload>>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed upload: {}", e)))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::Validation("A file name is required".into()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Malformed upload: {}", e)))?;

        let saved = state.uploads.save_file(&filename, &bytes).await?;
        return Ok((StatusCode::CREATED, ApiResponse::ok(saved)));
    }

    Err(AppError::Validation("No file uploaded".into()))
}

/// GET /api/upload/files
pub async fn list_files(
    State(state): State<AppState>,
    Query(params): Query<ListFilesParams>,
) -> Result<Json<FileListResponse>> {
    let page = state.uploads.list_files(&params).await?;
    Ok(Json(FileListResponse {
        success: true,
        data: page.files,
        pagination: page.pagination,
    }))
}

/// GET /api/upload/history
pub async fn upload_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>> {
    let uploads = state.uploads.upload_history(&params).await?;
    Ok(Json(HistoryResponse {
        success: true,
        count: uploads.len(),
        data: uploads,
    }))
}

/// GET /api/upload/:id
pub async fn get_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<UploadMetadata>>> {
    let upload = state.uploads.get_upload(parse_id(&id)?).await?;
    Ok(ApiResponse::ok(upload))
}

/// POST /api/upload/:id/process
///
/// Ships a pending upload and records its final state.
pub async fn process_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<UploadProcessing>>> {
    let processed = state.uploads.process_upload(parse_id(&id)?).await?;
    Ok(ApiResponse::ok(processed))
}
