//! Task creation and lifecycle handlers.

use super::{DownloadLatestRequest, MonitorRequest, TaskCreatedResponse};
use crate::api::AppState;
use crate::error::Error;
use crate::types::TaskId;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// POST /users/:username/download-latest - Create a one-shot task
/// downloading the latest N episodes of each of the user's subscriptions
#[utoipa::path(
    post,
    path = "/api/v1/users/{username}/download-latest",
    tag = "tasks",
    params(
        ("username" = String, Path, description = "Username")
    ),
    request_body = DownloadLatestRequest,
    responses(
        (status = 202, description = "Task created and dispatched", body = TaskCreatedResponse),
        (status = 400, description = "No subscriptions"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn create_download_latest(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(request): Json<DownloadLatestRequest>,
) -> Response {
    let profile = match state.users.get(&username).await {
        Ok(profile) => profile,
        Err(e) => return e.into_response(),
    };

    match state
        .engine
        .create_download_latest(
            &username,
            profile.subscriptions,
            request.count,
            request.convert,
        )
        .await
    {
        Ok(task_id) => {
            (StatusCode::ACCEPTED, Json(TaskCreatedResponse { task_id })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// POST /users/:username/monitor - Create a long-lived monitor task over
/// the user's subscriptions
#[utoipa::path(
    post,
    path = "/api/v1/users/{username}/monitor",
    tag = "tasks",
    params(
        ("username" = String, Path, description = "Username")
    ),
    request_body = MonitorRequest,
    responses(
        (status = 202, description = "Monitor task created", body = TaskCreatedResponse),
        (status = 400, description = "No subscriptions"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn create_monitor(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(request): Json<MonitorRequest>,
) -> Response {
    let profile = match state.users.get(&username).await {
        Ok(profile) => profile,
        Err(e) => return e.into_response(),
    };

    match state
        .engine
        .create_monitor(&username, profile.subscriptions, request.convert)
        .await
    {
        Ok(task_id) => {
            (StatusCode::ACCEPTED, Json(TaskCreatedResponse { task_id })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// GET /tasks - List every task record, newest first
#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    tag = "tasks",
    responses(
        (status = 200, description = "All task records", body = Vec<crate::types::Task>)
    )
)]
pub async fn list_tasks(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.get_all_tasks().await)
}

/// GET /tasks/:id - Point-in-time snapshot of one task
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{id}",
    tag = "tasks",
    params(
        ("id" = i64, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Task record", body = crate::types::Task),
        (status = 404, description = "Unknown task")
    )
)]
pub async fn get_task(State(state): State<AppState>, Path(id): Path<TaskId>) -> Response {
    match state.engine.get_task(id).await {
        Some(task) => (StatusCode::OK, Json(task)).into_response(),
        None => Error::NotFound(format!("no task with id {}", id)).into_response(),
    }
}

/// POST /tasks/:id/cancel - Cancel a pending or running task
#[utoipa::path(
    post,
    path = "/api/v1/tasks/{id}/cancel",
    tag = "tasks",
    params(
        ("id" = i64, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Cancel outcome; false for terminal tasks"),
        (status = 404, description = "Unknown task")
    )
)]
pub async fn cancel_task(State(state): State<AppState>, Path(id): Path<TaskId>) -> Response {
    if state.engine.get_task(id).await.is_none() {
        return Error::NotFound(format!("no task with id {}", id)).into_response();
    }
    let cancelled = state.engine.cancel_task(id).await;
    (StatusCode::OK, Json(json!({ "cancelled": cancelled }))).into_response()
}

/// POST /tasks/:id/check - Force an immediate check of one monitor task
#[utoipa::path(
    post,
    path = "/api/v1/tasks/{id}/check",
    tag = "tasks",
    params(
        ("id" = i64, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Episodes downloaded by this check"),
        (status = 400, description = "Not a running monitor task"),
        (status = 404, description = "Unknown task")
    )
)]
pub async fn check_task(State(state): State<AppState>, Path(id): Path<TaskId>) -> Response {
    match state.engine.check_task_now(id).await {
        Ok(downloaded) => (StatusCode::OK, Json(json!({ "downloaded": downloaded }))).into_response(),
        Err(e) => e.into_response(),
    }
}
