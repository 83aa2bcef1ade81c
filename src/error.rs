//! Error types for podcast-dl
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Transcode, Store, etc.)
//! - `#[from]` conversions for the underlying I/O, HTTP, and serde errors
//! - Context information (file path, task id, feed URL) where it helps

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for podcast-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for podcast-dl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_dir")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Requested entity (task, user, file) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller supplied invalid input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// OPML document could not be parsed
    #[error("invalid OPML: {0}")]
    InvalidOpml(String),

    /// Download of an audio file failed
    #[error("download error: {0}")]
    Download(String),

    /// Audio format conversion error
    #[error("transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors from the external audio transcoder (ffmpeg)
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// ffmpeg is not installed or not on PATH
    #[error("ffmpeg is not available")]
    Unavailable,

    /// Input file does not exist
    #[error("input file not found: {0}")]
    InputMissing(PathBuf),

    /// The file is not in a convertible source format
    #[error("unsupported source format for {path}: {format}")]
    UnsupportedFormat {
        /// The file whose format is not convertible
        path: PathBuf,
        /// Detected format tag (or "unknown")
        format: String,
    },

    /// ffmpeg exited non-zero
    #[error("conversion failed for {input}: {stderr}")]
    Failed {
        /// The input file being converted
        input: PathBuf,
        /// Captured stderr output from ffmpeg
        stderr: String,
    },

    /// ffmpeg exceeded the configured hard timeout
    #[error("conversion timed out after {seconds}s for {input}")]
    Timeout {
        /// The input file being converted
        input: PathBuf,
        /// The timeout that was exceeded, in seconds
        seconds: u64,
    },

    /// Failed to spawn or wait on the ffmpeg process
    #[error("failed to run ffmpeg: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Machine-readable error codes for API responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid request input
    InvalidInput,
    /// Entity not found
    NotFound,
    /// Transcoder unavailable or conversion failed
    TranscodeFailed,
    /// Download failed
    DownloadFailed,
    /// Internal server error
    Internal,
}

impl Error {
    /// Map an error to the HTTP status code and machine-readable code used by the API layer.
    pub fn http_status(&self) -> (u16, ErrorCode) {
        match self {
            Error::InvalidInput(_) | Error::InvalidOpml(_) | Error::Config { .. } => {
                (400, ErrorCode::InvalidInput)
            }
            Error::NotFound(_) => (404, ErrorCode::NotFound),
            Error::Transcode(TranscodeError::Unavailable) => (400, ErrorCode::TranscodeFailed),
            Error::Transcode(_) => (500, ErrorCode::TranscodeFailed),
            Error::Download(_) | Error::Network(_) => (500, ErrorCode::DownloadFailed),
            _ => (500, ErrorCode::Internal),
        }
    }
}
