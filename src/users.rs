//! User profiles and their subscription lists.
//!
//! Each user is one JSON file under the configured users directory. Profiles
//! only hold the subscription list imported from OPML; tasks snapshot that
//! list at creation time, so editing a profile never changes a running task.

use crate::error::{Error, Result};
use crate::types::Subscription;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;
use utoipa::ToSchema;

/// One user profile as persisted on disk
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct UserProfile {
    /// Unique username
    pub username: String,

    /// When the profile was created
    pub created_at: DateTime<Utc>,

    /// When the subscription list was last replaced
    pub updated_at: DateTime<Utc>,

    /// Imported subscriptions, in OPML order
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

/// Summary row for user listings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    /// Username
    pub username: String,
    /// When the profile was created
    pub created_at: DateTime<Utc>,
    /// Number of imported subscriptions
    pub subscription_count: usize,
}

/// Directory-backed user store
///
/// All mutation runs under one async mutex; each write rewrites the user's
/// file through a temp file.
pub struct UserStore {
    users_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl UserStore {
    /// Open (or initialize) the store under `users_dir`
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub fn new(users_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(users_dir)?;
        Ok(Self {
            users_dir: users_dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Create a user, or return the existing profile unchanged
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] for an unusable username.
    pub async fn create_user(&self, username: &str) -> Result<UserProfile> {
        validate_username(username)?;
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.load(username)? {
            return Ok(existing);
        }

        let now = Utc::now();
        let profile = UserProfile {
            username: username.to_string(),
            created_at: now,
            updated_at: now,
            subscriptions: Vec::new(),
        };
        self.persist(&profile)?;
        info!(username, "Created user profile");
        Ok(profile)
    }

    /// Fetch one profile
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown user.
    pub async fn get(&self, username: &str) -> Result<UserProfile> {
        validate_username(username)?;
        self.load(username)?
            .ok_or_else(|| Error::NotFound(format!("no user named {}", username)))
    }

    /// List all profiles as summary rows, sorted by username
    ///
    /// # Errors
    /// Returns error if the users directory cannot be read.
    pub async fn list(&self) -> Result<Vec<UserSummary>> {
        let mut summaries = Vec::new();
        for entry in std::fs::read_dir(&self.users_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            let profile: UserProfile = serde_json::from_str(&content)?;
            summaries.push(UserSummary {
                username: profile.username,
                created_at: profile.created_at,
                subscription_count: profile.subscriptions.len(),
            });
        }
        summaries.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(summaries)
    }

    /// Replace a user's subscription list (OPML re-import semantics)
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown user.
    pub async fn set_subscriptions(
        &self,
        username: &str,
        subscriptions: Vec<Subscription>,
    ) -> Result<UserProfile> {
        validate_username(username)?;
        let _guard = self.write_lock.lock().await;

        let mut profile = self
            .load(username)?
            .ok_or_else(|| Error::NotFound(format!("no user named {}", username)))?;
        profile.subscriptions = subscriptions;
        profile.updated_at = Utc::now();
        self.persist(&profile)?;
        info!(
            username,
            count = profile.subscriptions.len(),
            "Replaced subscription list"
        );
        Ok(profile)
    }

    fn profile_path(&self, username: &str) -> PathBuf {
        self.users_dir.join(format!("{}.json", username))
    }

    fn load(&self, username: &str) -> Result<Option<UserProfile>> {
        let path = self.profile_path(username);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn persist(&self, profile: &UserProfile) -> Result<()> {
        let path = self.profile_path(&profile.username);
        let tmp_path = self.users_dir.join(format!("{}.json.tmp", profile.username));
        std::fs::write(&tmp_path, serde_json::to_string_pretty(profile)?)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

/// Reject usernames that are empty or could escape the users directory
fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.len() > 64 {
        return Err(Error::InvalidInput(
            "username must be 1-64 characters".to_string(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::InvalidInput(
            "username may only contain letters, digits, '-' and '_'".to_string(),
        ));
    }
    Ok(())
}
