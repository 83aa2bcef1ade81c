//! Core types for podcast-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

/// Unique identifier for a task
///
/// Allocated from a process-wide monotonic counter; unique for the lifetime
/// of the process and never reused.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for i64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl PartialEq<i64> for TaskId {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Stable identifier for a stored audio file, derived from its source URL
///
/// Two downloads of the same URL always produce the same FileId, which is
/// what makes the content store idempotent by URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct FileId(pub String);

impl FileId {
    /// Derive the FileId for a source URL (md5 hex digest)
    pub fn for_url(url: &str) -> Self {
        Self(format!("{:x}", md5::compute(url.as_bytes())))
    }

    /// Get the inner hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for FileId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A user's pointer to a podcast feed, captured into tasks at creation time
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Subscription {
    /// Display title of the feed
    pub title: String,

    /// Feed URL (the OPML `xmlUrl` attribute)
    #[serde(alias = "xmlUrl")]
    pub feed_url: String,
}

impl Subscription {
    /// Stable dedup key for this subscription.
    ///
    /// Display titles collide between feeds, so the key is a hash of the
    /// feed URL instead.
    pub fn watermark_key(&self) -> String {
        format!("{:x}", md5::compute(self.feed_url.as_bytes()))
    }
}

/// One podcast episode as produced by the resolver
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Episode {
    /// Episode title
    pub title: String,

    /// Episode description or summary
    #[serde(default)]
    pub description: String,

    /// Cover image URL (empty if none)
    #[serde(default)]
    pub cover: String,

    /// Direct audio URL (empty if the resolver could not find one)
    #[serde(default)]
    pub audio_url: String,

    /// Publish timestamp, if the feed carried a parsable one
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,

    /// Episode page link
    #[serde(default)]
    pub link: String,
}

/// Task lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created but not yet picked up by a worker
    Pending,
    /// Worker in flight (or, for monitors, actively watched by the poller)
    Running,
    /// All subscriptions processed (download-latest only)
    Completed,
    /// The worker loop itself failed (download-latest only)
    Failed,
    /// Cancelled by the user
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether a task in this status may be cancelled
    pub fn is_cancellable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }
}

/// Task kind discriminant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// One-shot "download the latest N episodes per subscription" job
    DownloadLatest,
    /// Long-lived "watch subscriptions for new episodes" job
    Monitor,
}

/// Progress counters for a download-latest task
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TaskProgress {
    /// Upper bound on episodes to attempt (subscriptions × count);
    /// a feed may yield fewer than `count` episodes
    pub total: usize,

    /// Episodes downloaded successfully
    pub completed: usize,

    /// Episodes that failed to download, plus subscriptions that failed wholesale
    pub failed: usize,
}

/// Per-episode outcome record on a download-latest task
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct EpisodeResult {
    /// The episode that was attempted
    pub episode: Episode,

    /// Whether the download succeeded
    pub success: bool,

    /// Stored file identifier (present on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,

    /// Download error message (present on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Transcode error message; the download itself still counts as successful
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcode_error: Option<String>,
}

/// Kind-specific task state
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskDetail {
    /// One-shot download job state
    DownloadLatest {
        /// Episodes to take per subscription
        count: usize,
        /// Progress counters
        progress: TaskProgress,
        /// Per-episode outcome records, in processing order
        results: Vec<EpisodeResult>,
        /// Error message when the task transitioned to Failed
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Long-lived monitor job state
    Monitor {
        /// When the poller last examined this task's subscriptions
        last_checked_at: DateTime<Utc>,
        /// Episodes downloaded by this monitor so far
        downloaded_count: u64,
        /// Per-subscription watermark: publish time of the newest episode
        /// seen for that subscription key; advances max-only
        watermarks: HashMap<String, DateTime<Utc>>,
    },
}

/// The unit of tracked work in the task engine
///
/// Task records live in the process-wide task table for the lifetime of the
/// process; they are never removed automatically, and `get_task` returns a
/// point-in-time clone rather than a live reference.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// The requesting user
    pub owner: String,

    /// Current lifecycle status
    pub status: TaskStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Subscription list captured at creation time (a snapshot, not a live
    /// reference to the user's profile)
    pub subscriptions: Vec<Subscription>,

    /// Whether downloaded m4a files should be converted to mp3
    pub convert: bool,

    /// Kind-specific state
    #[serde(flatten)]
    pub detail: TaskDetail,
}

impl Task {
    /// The kind discriminant of this task
    pub fn kind(&self) -> TaskKind {
        match self.detail {
            TaskDetail::DownloadLatest { .. } => TaskKind::DownloadLatest,
            TaskDetail::Monitor { .. } => TaskKind::Monitor,
        }
    }
}

/// Event emitted during engine operation
///
/// Consumers subscribe via [`crate::tasks::TaskManager::subscribe`]; the API
/// layer republishes these over SSE.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A task was created and inserted into the task table
    TaskCreated {
        /// Task ID
        id: TaskId,
        /// Task kind
        kind: TaskKind,
    },

    /// A download-latest worker started running
    TaskStarted {
        /// Task ID
        id: TaskId,
    },

    /// An episode was downloaded successfully
    EpisodeDownloaded {
        /// Owning task
        task_id: TaskId,
        /// Stored file identifier
        file_id: FileId,
        /// Episode title
        title: String,
    },

    /// An episode download failed
    EpisodeFailed {
        /// Owning task
        task_id: TaskId,
        /// Episode title
        title: String,
        /// Error message
        error: String,
    },

    /// A download-latest task completed
    TaskCompleted {
        /// Task ID
        id: TaskId,
    },

    /// A download-latest task failed
    TaskFailed {
        /// Task ID
        id: TaskId,
        /// Error message
        error: String,
    },

    /// A task was cancelled
    TaskCancelled {
        /// Task ID
        id: TaskId,
    },

    /// The poller finished one pass over a monitor task
    MonitorChecked {
        /// Task ID
        id: TaskId,
        /// Episodes downloaded during this pass
        new_episodes: u64,
    },

    /// A transcode attempt failed (the download itself succeeded)
    TranscodeFailed {
        /// Stored file identifier
        file_id: FileId,
        /// Error message
        error: String,
    },

    /// Graceful shutdown initiated
    Shutdown,
}
