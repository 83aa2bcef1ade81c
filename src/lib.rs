//! # podcast-dl
//!
//! Backend library for a personal podcast download manager.
//!
//! ## Design Philosophy
//!
//! podcast-dl is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Sensible defaults** - Works out of the box with zero configuration
//! - **Event-driven** - Consumers subscribe to engine events, no polling required
//! - **Degrading gracefully** - Bad feeds yield empty episode lists, a missing
//!   ffmpeg disables conversion without disabling downloads
//!
//! The core is an in-memory task engine ([`TaskManager`]) running two kinds of
//! tasks over a user's subscriptions: one-shot "download the latest N episodes"
//! jobs and long-lived monitor jobs serviced by a background poller that
//! downloads only episodes published after a per-feed watermark.
//!
//! ## Quick Start
//!
//! ```no_run
//! use podcast_dl::{Config, Subscription, TaskManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Arc::new(TaskManager::from_config(Config::default())?);
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let subs = vec![Subscription {
//!         title: "Example Show".to_string(),
//!         feed_url: "https://example.com/feed.xml".to_string(),
//!     }];
//!     engine.create_download_latest("alice", subs, 3, false).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Feed resolution (RSS, Atom, HTML autodiscovery, page scraping)
pub mod resolver;
/// Content store for downloaded audio files
pub mod store;
/// Task engine and background poller
pub mod tasks;
/// Audio conversion via ffmpeg
pub mod transcode;
/// Core types and events
pub mod types;
/// User profiles and subscription lists
pub mod users;

// Re-export commonly used types
pub use config::{ApiConfig, Config, DownloadConfig, MonitorConfig, TranscodeConfig};
pub use error::{Error, ErrorCode, Result, TranscodeError};
pub use resolver::{FeedResolver, HttpResolver};
pub use store::{ContentStore, DownloadRecord};
pub use tasks::TaskManager;
pub use transcode::{AudioFormat, CliTranscoder, NoOpTranscoder, Transcoder};
pub use types::{
    Episode, EpisodeResult, Event, FileId, Subscription, Task, TaskDetail, TaskId, TaskKind,
    TaskProgress, TaskStatus,
};
pub use users::{UserProfile, UserStore, UserSummary};

/// Helper function to run the engine with graceful signal handling.
///
/// Starts the background poller, serves the REST API, and waits for a
/// termination signal; then stops the poller and announces shutdown to
/// event subscribers.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use podcast_dl::{Config, TaskManager, run_with_shutdown};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let engine = Arc::new(TaskManager::from_config(config.clone())?);
///
///     // Run with automatic signal handling
///     run_with_shutdown(engine, Arc::new(config)).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(
    engine: std::sync::Arc<TaskManager>,
    config: std::sync::Arc<Config>,
) -> Result<()> {
    engine.start_background_poller().await;

    let server = tokio::spawn(api::start_api_server(
        std::sync::Arc::clone(&engine),
        config,
    ));

    wait_for_signal().await;
    engine.shutdown().await;
    server.abort();
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
