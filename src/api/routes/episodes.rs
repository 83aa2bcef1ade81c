//! Single-episode resolution handlers.

use super::{EpisodeDownloadRequest, EpisodeUrlRequest};
use crate::api::AppState;
use crate::error::Error;
use crate::resolver::{has_audio_extension, xiaoyuzhou};
use crate::types::Episode;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// POST /episodes/info - Scrape title, description, cover, and audio URL
/// from an episode page
#[utoipa::path(
    post,
    path = "/api/v1/episodes/info",
    tag = "episodes",
    request_body = EpisodeUrlRequest,
    responses(
        (status = 200, description = "Scraped episode information", body = crate::resolver::xiaoyuzhou::EpisodePage),
        (status = 400, description = "Missing or empty URL"),
        (status = 404, description = "Episode page not reachable")
    )
)]
pub async fn episode_info(
    State(state): State<AppState>,
    Json(request): Json<EpisodeUrlRequest>,
) -> Response {
    if request.url.is_empty() {
        return Error::InvalidInput("url is required".to_string()).into_response();
    }

    match xiaoyuzhou::episode_info(&state.http_client, &request.url).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /episodes/download-url - Resolve an episode page straight to its
/// audio URL
#[utoipa::path(
    post,
    path = "/api/v1/episodes/download-url",
    tag = "episodes",
    request_body = EpisodeUrlRequest,
    responses(
        (status = 200, description = "Resolved audio URL"),
        (status = 400, description = "Missing or empty URL"),
        (status = 404, description = "No audio URL found")
    )
)]
pub async fn episode_download_url(
    State(state): State<AppState>,
    Json(request): Json<EpisodeUrlRequest>,
) -> Response {
    if request.url.is_empty() {
        return Error::InvalidInput("url is required".to_string()).into_response();
    }

    match xiaoyuzhou::download_url(&state.http_client, &request.url).await {
        Some(audio_url) => (StatusCode::OK, Json(json!({ "audio_url": audio_url }))).into_response(),
        None => Error::NotFound(format!("no audio URL found for {}", request.url)).into_response(),
    }
}

/// POST /episodes/download - Fetch one episode into the content store
///
/// Accepts either an episode page URL (resolved to its audio URL first) or
/// a direct audio URL. The stored file is served afterwards through
/// `GET /downloads/:id/file`.
#[utoipa::path(
    post,
    path = "/api/v1/episodes/download",
    tag = "episodes",
    request_body = EpisodeDownloadRequest,
    responses(
        (status = 200, description = "Stored (and optionally converted) record", body = crate::store::DownloadRecord),
        (status = 400, description = "Missing URL, or conversion requested without a transcoder"),
        (status = 404, description = "Episode page not reachable or no audio URL found")
    )
)]
pub async fn download_episode(
    State(state): State<AppState>,
    Json(request): Json<EpisodeDownloadRequest>,
) -> Response {
    if request.url.is_empty() {
        return Error::InvalidInput("url is required".to_string()).into_response();
    }
    let username = request.username.as_deref().unwrap_or("default");

    // A direct audio URL needs no page scraping.
    let (audio_url, episode) = if has_audio_extension(&request.url) {
        (request.url.clone(), None)
    } else {
        let page = match xiaoyuzhou::episode_info(&state.http_client, &request.url).await {
            Ok(page) => page,
            Err(e) => return e.into_response(),
        };
        let Some(audio_url) = page.audio_url else {
            return Error::NotFound(format!("no audio URL found for {}", request.url))
                .into_response();
        };
        let episode = Episode {
            title: page.title,
            description: page.description,
            cover: page.cover,
            audio_url: audio_url.clone(),
            published: None,
            link: request.url.clone(),
        };
        (audio_url, Some(episode))
    };

    let hint = request
        .filename
        .clone()
        .or_else(|| episode.as_ref().map(|e| e.title.clone()))
        .filter(|h| !h.trim().is_empty())
        .map(|h| hint_with_extension(h.trim(), &audio_url));

    let record = match state
        .engine
        .store()
        .download(&audio_url, hint.as_deref(), episode, username)
        .await
    {
        Ok(record) => record,
        Err(e) => return e.into_response(),
    };

    if request.convert {
        // The stored original survives a failed conversion.
        return match state.engine.convert_download(&record.file_id).await {
            Ok(converted) => (StatusCode::OK, Json(converted)).into_response(),
            Err(e) => e.into_response(),
        };
    }
    (StatusCode::OK, Json(record)).into_response()
}

/// Append the audio URL's extension to a hint that lacks one
fn hint_with_extension(hint: &str, audio_url: &str) -> String {
    if hint.contains('.') {
        return hint.to_string();
    }
    let path = audio_url.split('?').next().unwrap_or(audio_url);
    match path.rsplit('.').next().filter(|e| {
        matches!(
            e.to_ascii_lowercase().as_str(),
            "mp3" | "m4a" | "m4b" | "aac"
        )
    }) {
        Some(ext) => format!("{}.{}", hint, ext),
        None => format!("{}.mp3", hint),
    }
}
