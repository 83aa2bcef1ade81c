//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`episodes`] — Single-episode page resolution
//! - [`users`] — User profiles and OPML import
//! - [`tasks`] — Task creation and lifecycle
//! - [`downloads`] — Stored file listing, serving, deletion, conversion
//! - [`system`] — Health, transcoder info, events, OpenAPI

use crate::store::DownloadRecord;
use crate::types::{FileId, Subscription, TaskId};
use serde::{Deserialize, Serialize};

mod downloads;
mod episodes;
mod system;
mod tasks;
mod users;

// Re-export all handlers so `routes::function_name` continues to work
pub use downloads::*;
pub use episodes::*;
pub use system::*;
pub use tasks::*;
pub use users::*;

// ============================================================================
// Query/Request Types (shared across handlers)
// ============================================================================

/// Request body for the episode resolution endpoints
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct EpisodeUrlRequest {
    /// Episode page URL
    pub url: String,
}

/// Request body for POST /episodes/download
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct EpisodeDownloadRequest {
    /// Episode page URL, or a direct audio URL
    pub url: String,
    /// Stored filename override (the scraped title otherwise)
    #[serde(default)]
    pub filename: Option<String>,
    /// Whether to convert an m4a download to mp3 (default: false)
    #[serde(default)]
    pub convert: bool,
    /// User the download is recorded under (default: "default")
    #[serde(default)]
    pub username: Option<String>,
}

/// Request body for POST /users
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct CreateUserRequest {
    /// Username (letters, digits, '-' and '_')
    pub username: String,
}

/// Request body for POST /users/:username/download-latest
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct DownloadLatestRequest {
    /// Episodes to take per subscription (default: 5)
    #[serde(default = "default_count")]
    pub count: usize,
    /// Whether to convert downloaded m4a files to mp3 (default: false)
    #[serde(default)]
    pub convert: bool,
}

fn default_count() -> usize {
    5
}

/// Request body for POST /users/:username/monitor
#[derive(Debug, Default, Deserialize, Serialize, utoipa::ToSchema)]
pub struct MonitorRequest {
    /// Whether to convert downloaded m4a files to mp3 (default: false)
    #[serde(default)]
    pub convert: bool,
}

/// Request body for the batch download endpoints
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct BatchFileIdsRequest {
    /// File ids to operate on
    pub file_ids: Vec<FileId>,
}

/// Query parameters for GET /downloads
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct DownloadsQuery {
    /// Only list downloads belonging to this user
    pub username: Option<String>,
}

/// Response body for task-creating endpoints
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct TaskCreatedResponse {
    /// The created task's id
    pub task_id: TaskId,
}

/// Response body for POST /users/:username/opml
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct OpmlImportResponse {
    /// Number of subscriptions imported
    pub imported: usize,
    /// The imported subscription list
    pub subscriptions: Vec<Subscription>,
}

/// Response body for GET /downloads
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct DownloadsResponse {
    /// Stored files, newest first
    pub downloads: Vec<DownloadRecord>,
    /// Every username owning at least one download
    pub users: Vec<String>,
}

/// Response body for POST /downloads/batch-delete
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct BatchDeleteResponse {
    /// Number of files deleted
    pub deleted: usize,
    /// Ids with no matching record
    pub failed: Vec<FileId>,
}

/// One failed entry of a batch conversion
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct BatchConvertFailure {
    /// The file that failed to convert
    pub file_id: FileId,
    /// Error message
    pub error: String,
}

/// Response body for POST /downloads/batch-convert
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct BatchConvertResponse {
    /// Updated records for successful conversions
    pub converted: Vec<DownloadRecord>,
    /// Per-id failures
    pub failed: Vec<BatchConvertFailure>,
}

/// Response body for GET /transcoder
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct TranscoderInfo {
    /// Active transcoder implementation name
    pub name: String,
    /// Whether conversion is available
    pub available: bool,
}
