//! Configuration types for podcast-dl

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

/// Download behavior configuration (directories, HTTP client, concurrency)
///
/// Groups settings related to how audio files are fetched and stored.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadConfig {
    /// Download directory (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// User profile directory (default: "./users")
    #[serde(default = "default_users_dir")]
    pub users_dir: PathBuf,

    /// HTTP request timeout for feed fetches and downloads (default: 30s)
    #[serde(default = "default_http_timeout")]
    pub http_timeout: Duration,

    /// User-Agent header sent on outbound requests
    ///
    /// Some podcast CDNs reject requests without a browser-like agent.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum concurrent download-latest workers (default: 4)
    ///
    /// Additional tasks are accepted immediately but wait for a pool slot
    /// before their worker starts.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            users_dir: default_users_dir(),
            http_timeout: default_http_timeout(),
            user_agent: default_user_agent(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
        }
    }
}

/// Audio transcoder configuration (ffmpeg)
///
/// Groups settings for the external encoder binary.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TranscodeConfig {
    /// Path to ffmpeg executable (auto-detected if None)
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Whether to search PATH for ffmpeg if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Audio quality for libmp3lame, 0 (best) to 9 (worst) (default: 5)
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Encoder thread count (default: 8)
    #[serde(default = "default_threads")]
    pub threads: u32,

    /// Hard timeout per ffmpeg invocation (default: 1 hour)
    ///
    /// A timed-out conversion fails that call only; the downloaded file is kept.
    #[serde(default = "default_transcode_timeout")]
    pub timeout: Duration,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            search_path: true,
            quality: default_quality(),
            threads: default_threads(),
            timeout: default_transcode_timeout(),
        }
    }
}

/// Background poller configuration
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct MonitorConfig {
    /// Interval between monitor-task poll passes (default: 60s)
    #[serde(default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// Event broadcast channel capacity (default: 1000)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// REST API server configuration
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Bind address for the API server (default: 127.0.0.1:6780)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Whether to enable CORS (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins ("*" for any; default: any)
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Whether to serve the interactive Swagger UI (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

/// Main configuration for the podcast download manager
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) — directories, HTTP client, worker pool
/// - [`transcode`](TranscodeConfig) — ffmpeg path and encoding settings
/// - [`monitor`](MonitorConfig) — background poller interval
/// - [`server`](ApiConfig) — REST API settings
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Audio transcoder settings
    #[serde(default)]
    pub transcode: TranscodeConfig,

    /// Background poller settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// REST API settings
    #[serde(default)]
    pub server: ApiConfig,
}

// Convenience accessors for the most frequently used paths.
impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// User profile directory
    pub fn users_dir(&self) -> &PathBuf {
        &self.download.users_dir
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_users_dir() -> PathBuf {
    PathBuf::from("./users")
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_max_concurrent_tasks() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_quality() -> u8 {
    5
}

fn default_threads() -> u32 {
    8
}

fn default_transcode_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_event_buffer() -> usize {
    1000
}

fn default_bind_address() -> SocketAddr {
    #[allow(clippy::expect_used)]
    "127.0.0.1:6780"
        .parse()
        .expect("hardcoded default bind address is valid")
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}
