//! User profile and OPML import handlers.

use super::{CreateUserRequest, OpmlImportResponse};
use crate::api::AppState;
use crate::error::Error;
use crate::resolver::opml;
use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// POST /users - Create a user profile (idempotent)
#[utoipa::path(
    post,
    path = "/api/v1/users",
    tag = "users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User profile (created or pre-existing)", body = crate::users::UserProfile),
        (status = 400, description = "Invalid username")
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Response {
    match state.users.create_user(&request.username).await {
        Ok(profile) => (StatusCode::CREATED, Json(profile)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /users - List user profiles
#[utoipa::path(
    get,
    path = "/api/v1/users",
    tag = "users",
    responses(
        (status = 200, description = "User summaries", body = Vec<crate::users::UserSummary>),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_users(State(state): State<AppState>) -> Response {
    match state.users.list().await {
        Ok(summaries) => (StatusCode::OK, Json(summaries)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /users/:username/opml - Import a subscription list from an OPML file
///
/// Multipart upload; the first file part is parsed. Re-importing replaces
/// the subscription list wholesale.
#[utoipa::path(
    post,
    path = "/api/v1/users/{username}/opml",
    tag = "users",
    params(
        ("username" = String, Path, description = "Username")
    ),
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Import result", body = OpmlImportResponse),
        (status = 400, description = "Missing file or malformed OPML"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn import_opml(
    State(state): State<AppState>,
    Path(username): Path<String>,
    mut multipart: Multipart,
) -> Response {
    let mut content = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => match field.text().await {
                Ok(text) => {
                    content = Some(text);
                    break;
                }
                Err(e) => {
                    return Error::InvalidInput(format!("unreadable upload: {}", e))
                        .into_response();
                }
            },
            Ok(None) => break,
            Err(e) => {
                return Error::InvalidInput(format!("malformed multipart body: {}", e))
                    .into_response();
            }
        }
    }
    let Some(content) = content else {
        return Error::InvalidInput("no OPML file in request".to_string()).into_response();
    };

    let subscriptions = match opml::parse_opml(&content) {
        Ok(subs) => subs,
        Err(e) => return e.into_response(),
    };

    match state.users.set_subscriptions(&username, subscriptions).await {
        Ok(profile) => (
            StatusCode::OK,
            Json(OpmlImportResponse {
                imported: profile.subscriptions.len(),
                subscriptions: profile.subscriptions,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /users/:username/subscriptions - A user's subscription list
#[utoipa::path(
    get,
    path = "/api/v1/users/{username}/subscriptions",
    tag = "users",
    params(
        ("username" = String, Path, description = "Username")
    ),
    responses(
        (status = 200, description = "Subscriptions in OPML order", body = Vec<crate::types::Subscription>),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn list_subscriptions(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Response {
    match state.users.get(&username).await {
        Ok(profile) => (StatusCode::OK, Json(profile.subscriptions)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /users/:username/subscriptions/:index/episodes - Resolve one
/// subscription's feed to its episode list
#[utoipa::path(
    get,
    path = "/api/v1/users/{username}/subscriptions/{index}/episodes",
    tag = "users",
    params(
        ("username" = String, Path, description = "Username"),
        ("index" = usize, Path, description = "Zero-based subscription index")
    ),
    responses(
        (status = 200, description = "Episodes, feed order", body = Vec<crate::types::Episode>),
        (status = 404, description = "Unknown user or index out of range")
    )
)]
pub async fn subscription_episodes(
    State(state): State<AppState>,
    Path((username, index)): Path<(String, usize)>,
) -> Response {
    let profile = match state.users.get(&username).await {
        Ok(profile) => profile,
        Err(e) => return e.into_response(),
    };
    let Some(subscription) = profile.subscriptions.get(index) else {
        return Error::NotFound(format!(
            "user {} has no subscription at index {}",
            username, index
        ))
        .into_response();
    };

    let episodes = state.engine.resolve_feed(&subscription.feed_url).await;
    (StatusCode::OK, Json(episodes)).into_response()
}
