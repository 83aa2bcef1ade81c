//! HTTP error response handling for the API
//!
//! Converts domain errors to HTTP responses with appropriate status codes
//! and JSON `{"error": {"code", "message"}}` bodies.

use crate::error::{Error, ErrorCode};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// JSON error envelope returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error payload
    pub error: ErrorDetail,
}

/// Machine-readable code plus human-readable message
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Stable error code
    pub code: ErrorCode,
    /// Human-readable description
    pub message: String,
}

impl From<&Error> for ApiError {
    fn from(error: &Error) -> Self {
        let (_, code) = error.http_status();
        Self {
            error: ErrorDetail {
                code,
                message: error.to_string(),
            },
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, _) = self.http_status();
        let status_code =
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ApiError::from(&self);
        (status_code, Json(body)).into_response()
    }
}
