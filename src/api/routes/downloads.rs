//! Stored download handlers: listing, file serving, deletion, conversion.

use super::{
    BatchConvertFailure, BatchConvertResponse, BatchDeleteResponse, BatchFileIdsRequest,
    DownloadsQuery, DownloadsResponse,
};
use crate::api::AppState;
use crate::error::Error;
use crate::types::FileId;
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tokio_util::io::ReaderStream;

/// GET /downloads - List stored files, optionally filtered by username
#[utoipa::path(
    get,
    path = "/api/v1/downloads",
    tag = "downloads",
    params(
        ("username" = Option<String>, Query, description = "Only this user's downloads")
    ),
    responses(
        (status = 200, description = "Downloads plus the known owners", body = DownloadsResponse)
    )
)]
pub async fn list_downloads(
    State(state): State<AppState>,
    Query(query): Query<DownloadsQuery>,
) -> impl IntoResponse {
    let store = state.engine.store();
    let downloads = store.list_downloads(query.username.as_deref()).await;
    let users = store.users().await;
    Json(DownloadsResponse { downloads, users })
}

/// GET /downloads/:id/file - Serve a stored audio file as an attachment
///
/// The download filename prefers the episode title; non-ASCII titles are
/// carried in the RFC 5987 `filename*` parameter.
#[utoipa::path(
    get,
    path = "/api/v1/downloads/{id}/file",
    tag = "downloads",
    params(
        ("id" = String, Path, description = "File ID")
    ),
    responses(
        (status = 200, description = "Audio file stream", content_type = "audio/mpeg"),
        (status = 404, description = "Unknown id or file missing from disk")
    )
)]
pub async fn serve_download(State(state): State<AppState>, Path(id): Path<FileId>) -> Response {
    let Some(record) = state.engine.store().get(&id).await else {
        return Error::NotFound(format!("no download with id {}", id)).into_response();
    };

    let file = match tokio::fs::File::open(&record.file_path).await {
        Ok(file) => file,
        Err(_) => {
            return Error::NotFound(format!("file missing from disk: {}", record.filename))
                .into_response();
        }
    };

    let extension = record
        .file_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("mp3");
    let content_type = match extension {
        "mp3" => "audio/mpeg",
        "m4a" | "m4b" => "audio/mp4",
        "aac" => "audio/aac",
        _ => "application/octet-stream",
    };

    // Prefer the episode title for the user-facing filename
    let display_name = record
        .episode
        .as_ref()
        .filter(|e| !e.title.is_empty())
        .map(|e| format!("{}.{}", e.title, extension))
        .unwrap_or_else(|| record.filename.clone());
    let ascii_fallback: String = display_name
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .collect();
    let disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_fallback,
        urlencoding::encode(&display_name)
    );

    let stream = ReaderStream::new(file);
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// DELETE /downloads/:id - Delete one stored file and its record
#[utoipa::path(
    delete,
    path = "/api/v1/downloads/{id}",
    tag = "downloads",
    params(
        ("id" = String, Path, description = "File ID")
    ),
    responses(
        (status = 200, description = "File deleted"),
        (status = 404, description = "Unknown id")
    )
)]
pub async fn delete_download(State(state): State<AppState>, Path(id): Path<FileId>) -> Response {
    match state.engine.store().delete_file(&id).await {
        Ok(true) => (StatusCode::OK, Json(json!({ "deleted": true }))).into_response(),
        Ok(false) => Error::NotFound(format!("no download with id {}", id)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /downloads/batch-delete - Delete several stored files
#[utoipa::path(
    post,
    path = "/api/v1/downloads/batch-delete",
    tag = "downloads",
    request_body = BatchFileIdsRequest,
    responses(
        (status = 200, description = "Deletion counts", body = BatchDeleteResponse),
        (status = 400, description = "Empty id list")
    )
)]
pub async fn batch_delete_downloads(
    State(state): State<AppState>,
    Json(request): Json<BatchFileIdsRequest>,
) -> Response {
    if request.file_ids.is_empty() {
        return Error::InvalidInput("file_ids is empty".to_string()).into_response();
    }
    let (deleted, failed) = state
        .engine
        .store()
        .delete_files_batch(&request.file_ids)
        .await;
    (StatusCode::OK, Json(BatchDeleteResponse { deleted, failed })).into_response()
}

/// POST /downloads/:id/convert - Convert one stored file to mp3
#[utoipa::path(
    post,
    path = "/api/v1/downloads/{id}/convert",
    tag = "downloads",
    params(
        ("id" = String, Path, description = "File ID")
    ),
    responses(
        (status = 200, description = "Updated record (already-mp3 files are returned unchanged)", body = crate::store::DownloadRecord),
        (status = 400, description = "Transcoder unavailable"),
        (status = 404, description = "Unknown id"),
        (status = 500, description = "Conversion failed")
    )
)]
pub async fn convert_download(State(state): State<AppState>, Path(id): Path<FileId>) -> Response {
    match state.engine.convert_download(&id).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /downloads/batch-convert - Convert several stored files to mp3
#[utoipa::path(
    post,
    path = "/api/v1/downloads/batch-convert",
    tag = "downloads",
    request_body = BatchFileIdsRequest,
    responses(
        (status = 200, description = "Per-file outcomes", body = BatchConvertResponse),
        (status = 400, description = "Empty id list")
    )
)]
pub async fn batch_convert_downloads(
    State(state): State<AppState>,
    Json(request): Json<BatchFileIdsRequest>,
) -> Response {
    if request.file_ids.is_empty() {
        return Error::InvalidInput("file_ids is empty".to_string()).into_response();
    }
    let (converted, failed) = state
        .engine
        .convert_downloads_batch(&request.file_ids)
        .await;
    let failed = failed
        .into_iter()
        .map(|(file_id, error)| BatchConvertFailure { file_id, error })
        .collect();
    (
        StatusCode::OK,
        Json(BatchConvertResponse { converted, failed }),
    )
        .into_response()
}
