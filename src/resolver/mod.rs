//! Episode resolution for podcast feeds and episode pages.
//!
//! This module turns a feed URL (or, for one specific platform, an episode
//! page URL) into a list of [`Episode`] descriptors. It supports RSS 2.0 and
//! Atom feeds, with an HTML fallback for pages that merely link to a feed or
//! embed raw audio links.
//!
//! Resolution never fails from the caller's point of view: an unreachable or
//! unparsable source degrades to an empty episode list and a warning in the
//! log. The task engine treats any failure as "zero episodes for that source".

pub mod opml;
pub mod xiaoyuzhou;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::Episode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, warn};

/// Maximum number of audio links harvested from a plain HTML page
const HTML_AUDIO_LINK_LIMIT: usize = 20;

/// Resolves a feed or page URL to a list of episodes.
///
/// Implementations must not error: any failure degrades to an empty list.
/// The production implementation is [`HttpResolver`]; tests inject mocks.
#[async_trait]
pub trait FeedResolver: Send + Sync {
    /// Resolve `source` to zero or more episodes, newest first where the
    /// feed defines an order.
    async fn resolve(&self, source: &str) -> Vec<Episode>;
}

/// HTTP-backed feed resolver
///
/// Fetches the source URL and tries, in order: RSS 2.0, Atom, and an HTML
/// heuristic pass (feed autodiscovery link, then raw audio anchors).
pub struct HttpResolver {
    /// HTTP client for fetching feeds and pages
    http_client: reqwest::Client,
}

#[async_trait]
impl FeedResolver for HttpResolver {
    async fn resolve(&self, source: &str) -> Vec<Episode> {
        self.resolve_inner(source, 0).await
    }
}

impl HttpResolver {
    /// Create a resolver using the configured HTTP timeout and user agent
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.download.http_timeout)
            .user_agent(config.download.user_agent.clone())
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    /// Access the underlying HTTP client (shared with the platform scraper)
    pub fn client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// Fetch and parse one source; `depth` limits HTML autodiscovery recursion
    async fn resolve_inner(&self, source: &str, depth: u8) -> Vec<Episode> {
        let response = match self.http_client.get(source).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url = %source, error = %e, "Failed to fetch feed");
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            warn!(
                url = %source,
                status = response.status().as_u16(),
                "Feed returned non-success status"
            );
            return Vec::new();
        }

        let content = match response.text().await {
            Ok(c) => c,
            Err(e) => {
                warn!(url = %source, error = %e, "Failed to read feed body");
                return Vec::new();
            }
        };

        match parse_as_rss(&content) {
            Ok(episodes) => {
                debug!(url = %source, count = episodes.len(), "Parsed source as RSS");
                return episodes;
            }
            Err(rss_err) => {
                debug!(url = %source, error = %rss_err, "Not RSS, trying Atom");
            }
        }

        match parse_as_atom(&content) {
            Ok(episodes) => {
                debug!(url = %source, count = episodes.len(), "Parsed source as Atom");
                return episodes;
            }
            Err(atom_err) => {
                debug!(url = %source, error = %atom_err, "Not Atom, trying HTML heuristics");
            }
        }

        // Autodiscovery: an HTML page may point at its feed; follow once.
        if depth == 0
            && let Some(feed_url) = discover_feed_link(source, &content)
        {
            debug!(url = %source, feed = %feed_url, "Following autodiscovered feed link");
            return Box::pin(self.resolve_inner(&feed_url, depth + 1)).await;
        }

        let episodes = scrape_audio_links(source, &content);
        if episodes.is_empty() {
            warn!(url = %source, "Source yielded no episodes");
        }
        episodes
    }
}

/// Parse a publish date in either RFC 2822 (RSS) or RFC 3339 (Atom) form
pub(crate) fn parse_publish_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse feed content as RSS 2.0
fn parse_as_rss(content: &str) -> Result<Vec<Episode>> {
    let channel = content
        .parse::<rss::Channel>()
        .map_err(|e| Error::Other(format!("RSS parse error: {}", e)))?;

    let episodes = channel
        .items()
        .iter()
        .map(|item| {
            let published = item.pub_date().and_then(parse_publish_date);

            // Audio URL: prefer an audio-typed enclosure, fall back to any
            // enclosure, then to a link that looks like an audio file.
            let audio_url = item
                .enclosure()
                .filter(|enc| enc.mime_type().starts_with("audio/") || enc.mime_type().is_empty())
                .map(|enc| enc.url().to_string())
                .or_else(|| item.enclosure().map(|enc| enc.url().to_string()))
                .or_else(|| {
                    item.link()
                        .filter(|link| has_audio_extension(link))
                        .map(|l| l.to_string())
                })
                .unwrap_or_default();

            let cover = item
                .itunes_ext()
                .and_then(|ext| ext.image())
                .unwrap_or_default()
                .to_string();

            Episode {
                title: item.title().unwrap_or("Untitled").to_string(),
                description: item
                    .description()
                    .or_else(|| item.content())
                    .unwrap_or("")
                    .to_string(),
                cover,
                audio_url,
                published,
                link: item.link().unwrap_or("").to_string(),
            }
        })
        .collect();

    Ok(episodes)
}

/// Parse feed content as Atom
fn parse_as_atom(content: &str) -> Result<Vec<Episode>> {
    let feed = atom_syndication::Feed::read_from(content.as_bytes())
        .map_err(|e| Error::Other(format!("Atom parse error: {}", e)))?;

    let episodes = feed
        .entries()
        .iter()
        .map(|entry| {
            // Prefer published, fall back to updated
            let published = entry
                .published()
                .copied()
                .or_else(|| Some(*entry.updated()))
                .map(|dt| dt.with_timezone(&Utc));

            let audio_url = entry
                .links()
                .iter()
                .find(|link| {
                    link.rel() == "enclosure"
                        || link
                            .mime_type()
                            .map(|m| m.starts_with("audio/"))
                            .unwrap_or(false)
                        || has_audio_extension(link.href())
                })
                .map(|link| link.href().to_string())
                .unwrap_or_default();

            let link = entry
                .links()
                .iter()
                .find(|l| l.rel() == "alternate")
                .or_else(|| entry.links().first())
                .map(|l| l.href().to_string())
                .unwrap_or_default();

            let description = entry
                .summary()
                .map(|s| s.as_str().to_string())
                .or_else(|| entry.content().and_then(|c| c.value().map(String::from)))
                .unwrap_or_default();

            Episode {
                title: entry.title().as_str().to_string(),
                description,
                cover: String::new(),
                audio_url,
                published,
                link,
            }
        })
        .collect();

    Ok(episodes)
}

/// Look for a `<link type="application/rss+xml" href="...">` autodiscovery tag
fn discover_feed_link(base_url: &str, html: &str) -> Option<String> {
    // Attribute order varies between generators; try href-after-type and
    // type-after-href.
    let patterns = [
        r#"(?is)<link[^>]*type=["']application/(?:rss|atom)\+xml["'][^>]*href=["']([^"']+)["']"#,
        r#"(?is)<link[^>]*href=["']([^"']+)["'][^>]*type=["']application/(?:rss|atom)\+xml["']"#,
    ];

    for pattern in patterns {
        let re = Regex::new(pattern).ok()?;
        if let Some(caps) = re.captures(html) {
            let href = caps.get(1)?.as_str();
            return absolutize(base_url, href);
        }
    }
    None
}

/// Harvest raw audio anchors from an HTML page as last-resort episodes
fn scrape_audio_links(base_url: &str, html: &str) -> Vec<Episode> {
    let re = match Regex::new(r#"(?is)<a\s[^>]*href=["']([^"']+)["'][^>]*>(.*?)</a>"#) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };

    re.captures_iter(html)
        .filter(|caps| {
            caps.get(1)
                .map(|href| has_audio_extension(href.as_str()))
                .unwrap_or(false)
        })
        .take(HTML_AUDIO_LINK_LIMIT)
        .filter_map(|caps| {
            let href = caps.get(1)?.as_str();
            let url = absolutize(base_url, href)?;
            let text = strip_tags(caps.get(2).map(|m| m.as_str()).unwrap_or(""));
            Some(Episode {
                title: if text.is_empty() {
                    "Untitled".to_string()
                } else {
                    text
                },
                description: String::new(),
                cover: String::new(),
                audio_url: url.clone(),
                published: None,
                link: url,
            })
        })
        .collect()
}

/// Whether a URL path looks like an audio file
pub(crate) fn has_audio_extension(url: &str) -> bool {
    let path = url.split('?').next().unwrap_or(url).to_ascii_lowercase();
    [".mp3", ".m4a", ".m4b", ".aac", ".m3u8"]
        .iter()
        .any(|ext| path.ends_with(ext))
        || path.contains("audio")
}

/// Resolve a possibly-relative href against its page URL
fn absolutize(base_url: &str, href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    url::Url::parse(base_url)
        .ok()?
        .join(href)
        .ok()
        .map(|u| u.to_string())
}

/// Remove markup from anchor text
fn strip_tags(html: &str) -> String {
    match Regex::new(r"(?s)<[^>]*>") {
        Ok(re) => re.replace_all(html, "").trim().to_string(),
        Err(_) => html.trim().to_string(),
    }
}
