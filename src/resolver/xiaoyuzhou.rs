//! Episode page scraping for the Xiaoyuzhou FM podcast platform.
//!
//! Xiaoyuzhou episode pages do not expose a plain enclosure; the audio URL
//! lives in the page's embedded `__INITIAL_STATE__` JSON, in an inline script,
//! or behind a JSON API keyed by the episode id. This module probes those
//! locations in order of reliability.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use utoipa::ToSchema;

/// Candidate API endpoints probed when page scraping finds no audio URL
fn api_endpoints(episode_id: &str) -> [String; 3] {
    [
        format!("https://www.xiaoyuzhoufm.com/api/v1/episode/{}", episode_id),
        format!("https://api.xiaoyuzhoufm.com/v1/episode/{}", episode_id),
        format!("https://www.xiaoyuzhoufm.com/api/episode/{}", episode_id),
    ]
}

/// Information scraped from a single episode page
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct EpisodePage {
    /// Episode title
    pub title: String,

    /// Episode description (og:description)
    pub description: String,

    /// Cover image URL (og:image)
    pub cover: String,

    /// Resolved audio URL, if any probe succeeded
    pub audio_url: Option<String>,

    /// Platform episode id extracted from the page URL
    pub episode_id: Option<String>,
}

/// Extract the hex episode id from an episode page URL
pub fn extract_episode_id(url: &str) -> Option<String> {
    let re = Regex::new(r"/episode/([a-f0-9]+)").ok()?;
    re.captures(url).map(|caps| caps[1].to_string())
}

/// Fetch an episode page and scrape title, description, cover, and audio URL
///
/// # Errors
/// Returns error if the page cannot be fetched; scraping misses degrade to
/// empty fields rather than errors.
pub async fn episode_info(client: &reqwest::Client, episode_url: &str) -> Result<EpisodePage> {
    let response = client.get(episode_url).send().await?;
    if !response.status().is_success() {
        return Err(Error::NotFound(format!(
            "episode page returned HTTP {}: {}",
            response.status().as_u16(),
            episode_url
        )));
    }
    let html = response.text().await?;

    let episode_id = extract_episode_id(episode_url);
    let mut audio_url = audio_url_from_html(&html);

    // Fall back to the platform API when the page markup gave nothing.
    if audio_url.is_none()
        && let Some(id) = &episode_id
    {
        audio_url = audio_url_from_api(client, id).await;
    }

    Ok(EpisodePage {
        title: first_capture(&html, r"(?is)<h1[^>]*>(.*?)</h1>")
            .or_else(|| first_capture(&html, r"(?is)<title[^>]*>(.*?)</title>"))
            .map(|t| t.trim().to_string())
            .unwrap_or_else(|| "Untitled".to_string()),
        description: meta_content(&html, "og:description").unwrap_or_default(),
        cover: meta_content(&html, "og:image").unwrap_or_default(),
        audio_url,
        episode_id,
    })
}

/// Resolve an episode page URL directly to a downloadable audio URL
pub async fn download_url(client: &reqwest::Client, episode_url: &str) -> Option<String> {
    match episode_info(client, episode_url).await {
        Ok(page) if page.audio_url.is_some() => page.audio_url,
        Ok(page) => {
            // Page scrape found nothing; retry the API probes on their own.
            let id = page.episode_id?;
            audio_url_from_api(client, &id).await
        }
        Err(e) => {
            warn!(url = %episode_url, error = %e, "Failed to fetch episode page");
            let id = extract_episode_id(episode_url)?;
            audio_url_from_api(client, &id).await
        }
    }
}

/// Probe the page markup for an audio URL
fn audio_url_from_html(html: &str) -> Option<String> {
    // The embedded state blob is the most reliable source.
    if let Some(state) = first_capture(html, r#"(?s)window\.__INITIAL_STATE__\s*=\s*(\{.+?\});"#)
        && let Ok(data) = serde_json::from_str::<Value>(&state)
        && let Some(url) = audio_url_from_json(data.get("episode").unwrap_or(&data))
    {
        return Some(url);
    }

    // Otherwise look for a bare audio URL anywhere in inline scripts.
    first_capture(
        html,
        r#"["'](https?://[^"']*\.(?:mp3|m4a|aac|m3u8)[^"']*)["']"#,
    )
}

/// Probe the platform API endpoints for an audio URL
async fn audio_url_from_api(client: &reqwest::Client, episode_id: &str) -> Option<String> {
    for endpoint in api_endpoints(episode_id) {
        let response = match client.get(&endpoint).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!(url = %endpoint, status = r.status().as_u16(), "API probe rejected");
                continue;
            }
            Err(e) => {
                debug!(url = %endpoint, error = %e, "API probe failed");
                continue;
            }
        };

        let body: Value = match response.json().await {
            Ok(v) => v,
            Err(_) => continue,
        };

        let payload = body.get("data").unwrap_or(&body);
        if let Some(url) = audio_url_from_json(payload) {
            return Some(url);
        }
    }
    None
}

/// Try the known audio-URL field layouts inside a platform JSON object
fn audio_url_from_json(data: &Value) -> Option<String> {
    let candidates = [
        data.get("enclosure").and_then(|e| e.get("url")),
        data.get("audioUrl"),
        data.get("mediaUrl"),
        data.get("media").and_then(|m| m.get("url")),
        data.get("audio").and_then(|a| a.get("url")),
        data.get("audio").filter(|a| a.is_string()),
    ];

    candidates
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .find(|s| !s.is_empty())
        .map(String::from)
}

/// First capture group of `pattern` over `text`
fn first_capture(text: &str, pattern: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Content attribute of an og: meta tag, either attribute order
fn meta_content(html: &str, property: &str) -> Option<String> {
    let escaped = regex::escape(property);
    first_capture(
        html,
        &format!(r#"(?is)<meta[^>]*property=["']{escaped}["'][^>]*content=["']([^"']*)["']"#),
    )
    .or_else(|| {
        first_capture(
            html,
            &format!(r#"(?is)<meta[^>]*content=["']([^"']*)["'][^>]*property=["']{escaped}["']"#),
        )
    })
}
