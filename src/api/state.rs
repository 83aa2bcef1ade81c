//! Application state for the API server

use crate::error::{Error, Result};
use crate::{Config, TaskManager, UserStore};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned per request (cheap Arc clones). Episode page scraping uses its own
/// HTTP client so it shares the configured timeout and user agent.
#[derive(Clone)]
pub struct AppState {
    /// The task engine instance
    pub engine: Arc<TaskManager>,

    /// User profile store
    pub users: Arc<UserStore>,

    /// Configuration (read access)
    pub config: Arc<Config>,

    /// HTTP client for single-episode page resolution
    pub http_client: reqwest::Client,
}

impl AppState {
    /// Create a new AppState
    ///
    /// # Errors
    /// Returns error if the user store or HTTP client cannot be created.
    pub fn new(engine: Arc<TaskManager>, config: Arc<Config>) -> Result<Self> {
        let users = Arc::new(UserStore::new(config.users_dir())?);
        let http_client = reqwest::Client::builder()
            .timeout(config.download.http_timeout)
            .user_agent(config.download.user_agent.clone())
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            engine,
            users,
            config,
            http_client,
        })
    }
}
