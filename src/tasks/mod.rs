//! The task engine: one-shot download jobs, long-lived monitors, and the
//! background poller that drives them.
//!
//! [`TaskManager`] is the sole mutator of task records. All records live in
//! one `HashMap` behind a single async mutex; the lock is held only for
//! in-memory mutation. Feed resolution, downloads, transcodes, and metadata
//! persists all run outside it, so a slow network call never blocks task
//! queries.
//!
//! Download-latest tasks run on a bounded worker pool: creation always
//! succeeds immediately, but a worker only starts once a pool permit is
//! free. Monitor tasks have no worker of their own; a single poller task
//! services every running monitor on a fixed interval.

mod poller;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::resolver::{FeedResolver, HttpResolver};
use crate::store::{ContentStore, DownloadRecord};
use crate::transcode::{AudioFormat, CliTranscoder, NoOpTranscoder, Transcoder, detect_format};
use crate::types::{
    Episode, EpisodeResult, Event, FileId, Subscription, Task, TaskDetail, TaskId, TaskProgress,
    TaskStatus,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared state handed to spawned workers and the poller
#[derive(Clone)]
pub(crate) struct EngineCtx {
    tasks: Arc<Mutex<HashMap<TaskId, Task>>>,
    store: Arc<ContentStore>,
    resolver: Arc<dyn FeedResolver>,
    transcoder: Arc<dyn Transcoder>,
    event_tx: broadcast::Sender<Event>,
}

/// Task engine facade
///
/// Construct with [`TaskManager::from_config`] for production wiring, or
/// [`TaskManager::new`] to inject collaborators (tests use mocks here).
pub struct TaskManager {
    ctx: EngineCtx,
    config: Arc<Config>,
    next_task_id: AtomicI64,
    worker_limit: Arc<Semaphore>,
    poller_running: AtomicBool,
    poller_token: Mutex<Option<CancellationToken>>,
}

impl TaskManager {
    /// Create an engine with injected collaborators
    pub fn new(
        config: Config,
        store: Arc<ContentStore>,
        resolver: Arc<dyn FeedResolver>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.monitor.event_buffer);
        let worker_limit = Arc::new(Semaphore::new(config.download.max_concurrent_tasks.max(1)));
        Self {
            ctx: EngineCtx {
                tasks: Arc::new(Mutex::new(HashMap::new())),
                store,
                resolver,
                transcoder,
                event_tx,
            },
            config: Arc::new(config),
            next_task_id: AtomicI64::new(1),
            worker_limit,
            poller_running: AtomicBool::new(false),
            poller_token: Mutex::new(None),
        }
    }

    /// Create an engine with the real collaborators wired from `config`
    ///
    /// ffmpeg is discovered per the transcode config; when absent the engine
    /// degrades to a [`NoOpTranscoder`] and downloads stay unconverted.
    ///
    /// # Errors
    /// Returns error if the content store or HTTP client cannot be created.
    pub fn from_config(config: Config) -> Result<Self> {
        let store = Arc::new(ContentStore::new(&config)?);
        let resolver: Arc<dyn FeedResolver> = Arc::new(HttpResolver::new(&config)?);
        let transcoder: Arc<dyn Transcoder> = match CliTranscoder::from_config(&config.transcode) {
            Some(cli) => {
                info!("ffmpeg found, audio conversion enabled");
                Arc::new(cli)
            }
            None => {
                warn!("ffmpeg not found, audio conversion disabled");
                Arc::new(NoOpTranscoder)
            }
        };
        Ok(Self::new(config, store, resolver, transcoder))
    }

    /// The engine configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The content store backing this engine
    pub fn store(&self) -> &Arc<ContentStore> {
        &self.ctx.store
    }

    /// Name of the active transcoder implementation
    pub fn transcoder_name(&self) -> &'static str {
        self.ctx.transcoder.name()
    }

    /// Whether audio conversion is available
    pub fn transcoder_available(&self) -> bool {
        self.ctx.transcoder.is_available()
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.ctx.event_tx.subscribe()
    }

    /// Resolve a feed URL to its episode list using the engine's resolver
    pub async fn resolve_feed(&self, source: &str) -> Vec<Episode> {
        self.ctx.resolver.resolve(source).await
    }

    fn allocate_id(&self) -> TaskId {
        TaskId(self.next_task_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Create a one-shot task downloading the latest `count` episodes of
    /// each subscription, and dispatch its worker
    ///
    /// The returned id is valid immediately; the worker waits for a pool
    /// permit before it starts. `progress.total` is an upper bound, since a
    /// feed may carry fewer than `count` episodes. A zero count is valid and
    /// completes trivially with no attempts.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] for an empty subscription list.
    pub async fn create_download_latest(
        &self,
        owner: &str,
        subscriptions: Vec<Subscription>,
        count: usize,
        convert: bool,
    ) -> Result<TaskId> {
        if subscriptions.is_empty() {
            return Err(Error::InvalidInput(
                "subscription list is empty".to_string(),
            ));
        }

        let id = self.allocate_id();
        let task = Task {
            id,
            owner: owner.to_string(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            subscriptions: subscriptions.clone(),
            convert,
            detail: TaskDetail::DownloadLatest {
                count,
                progress: TaskProgress {
                    total: subscriptions.len() * count,
                    completed: 0,
                    failed: 0,
                },
                results: Vec::new(),
                error: None,
            },
        };

        self.ctx.tasks.lock().await.insert(id, task);
        self.ctx.emit(Event::TaskCreated {
            id,
            kind: crate::types::TaskKind::DownloadLatest,
        });
        info!(task_id = %id, owner, count, subs = subscriptions.len(), "Created download task");

        let ctx = self.ctx.clone();
        let limit = Arc::clone(&self.worker_limit);
        tokio::spawn(async move {
            let Ok(_permit) = limit.acquire_owned().await else {
                return;
            };
            run_download_latest(ctx, id).await;
        });

        Ok(id)
    }

    /// Create a long-lived monitor task over `subscriptions`
    ///
    /// The task is Running from birth and is serviced by the background
    /// poller; it never completes on its own and ends only by cancellation.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] for an empty subscription list.
    pub async fn create_monitor(
        &self,
        owner: &str,
        subscriptions: Vec<Subscription>,
        convert: bool,
    ) -> Result<TaskId> {
        if subscriptions.is_empty() {
            return Err(Error::InvalidInput(
                "subscription list is empty".to_string(),
            ));
        }

        let id = self.allocate_id();
        let task = Task {
            id,
            owner: owner.to_string(),
            status: TaskStatus::Running,
            created_at: Utc::now(),
            subscriptions,
            convert,
            detail: TaskDetail::Monitor {
                last_checked_at: Utc::now(),
                downloaded_count: 0,
                watermarks: HashMap::new(),
            },
        };

        self.ctx.tasks.lock().await.insert(id, task);
        self.ctx.emit(Event::TaskCreated {
            id,
            kind: crate::types::TaskKind::Monitor,
        });
        info!(task_id = %id, owner, "Created monitor task");
        Ok(id)
    }

    /// Point-in-time clone of one task record
    pub async fn get_task(&self, id: TaskId) -> Option<Task> {
        self.ctx.tasks.lock().await.get(&id).cloned()
    }

    /// Point-in-time clones of every task record, newest first
    pub async fn get_all_tasks(&self) -> Vec<Task> {
        let tasks = self.ctx.tasks.lock().await;
        let mut all: Vec<Task> = tasks.values().cloned().collect();
        all.sort_by(|a, b| b.id.cmp(&a.id));
        all
    }

    /// Cancel a task
    ///
    /// Returns true iff the task exists and was Pending or Running; terminal
    /// tasks and unknown ids return false and change nothing. Cancellation
    /// is advisory: workers check the flag between subscriptions and between
    /// episodes, so in-flight episode work may still append a result record.
    pub async fn cancel_task(&self, id: TaskId) -> bool {
        let mut tasks = self.ctx.tasks.lock().await;
        let Some(task) = tasks.get_mut(&id) else {
            return false;
        };
        if !task.status.is_cancellable() {
            return false;
        }
        task.status = TaskStatus::Cancelled;
        drop(tasks);

        self.ctx.emit(Event::TaskCancelled { id });
        info!(task_id = %id, "Cancelled task");
        true
    }

    /// Start the background poller
    ///
    /// Idempotent: a second call while the poller runs does nothing. The
    /// poller ticks immediately, then every `monitor.poll_interval`.
    pub async fn start_background_poller(&self) {
        if self.poller_running.swap(true, Ordering::SeqCst) {
            debug!("Poller already running");
            return;
        }

        let token = CancellationToken::new();
        *self.poller_token.lock().await = Some(token.clone());

        let ctx = self.ctx.clone();
        let interval = self.config.monitor.poll_interval;
        info!(interval_secs = interval.as_secs(), "Starting background poller");
        tokio::spawn(async move {
            poller::run(ctx, token, interval).await;
        });
    }

    /// Stop the background poller; a no-op when it is not running
    pub async fn stop_background_poller(&self) {
        if !self.poller_running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(token) = self.poller_token.lock().await.take() {
            token.cancel();
            info!("Stopped background poller");
        }
    }

    /// Whether the background poller is running
    pub fn poller_running(&self) -> bool {
        self.poller_running.load(Ordering::SeqCst)
    }

    /// Run one poll pass over every running monitor task, returning the
    /// number of monitors checked
    pub async fn run_monitor_pass(&self) -> usize {
        poller::run_pass(&self.ctx).await
    }

    /// Force an immediate check of one monitor task, returning the number
    /// of episodes downloaded
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown id and
    /// [`Error::InvalidInput`] for a non-monitor or non-running task.
    pub async fn check_task_now(&self, id: TaskId) -> Result<u64> {
        let snapshot = {
            let tasks = self.ctx.tasks.lock().await;
            let task = tasks
                .get(&id)
                .ok_or_else(|| Error::NotFound(format!("no task with id {}", id)))?;
            poller::MonitorSnapshot::of(task).ok_or_else(|| {
                Error::InvalidInput(format!("task {} is not a running monitor", id))
            })?
        };
        Ok(poller::check_monitor(&self.ctx, snapshot).await)
    }

    /// Convert one stored file to mp3, replacing its record in place
    ///
    /// An already-mp3 file is returned unchanged; other formats than m4a/aac
    /// are rejected.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown id, or a transcode error.
    pub async fn convert_download(&self, file_id: &FileId) -> Result<DownloadRecord> {
        let record = self
            .ctx
            .store
            .get(file_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("no download with id {}", file_id)))?;

        match detect_format(&record.file_path) {
            Some(AudioFormat::Mp3) => Ok(record),
            Some(AudioFormat::M4a) | Some(AudioFormat::Aac) => {
                let new_path = self.ctx.transcoder.convert(&record.file_path, None).await?;
                self.ctx.store.replace_file(file_id, &new_path).await
            }
            None => Err(Error::Transcode(crate::error::TranscodeError::UnsupportedFormat {
                path: record.file_path.clone(),
                format: record
                    .file_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("unknown")
                    .to_string(),
            })),
        }
    }

    /// Convert several stored files; returns the updated records and the
    /// per-id failures
    pub async fn convert_downloads_batch(
        &self,
        file_ids: &[FileId],
    ) -> (Vec<DownloadRecord>, Vec<(FileId, String)>) {
        let mut converted = Vec::new();
        let mut failed = Vec::new();
        for file_id in file_ids {
            match self.convert_download(file_id).await {
                Ok(record) => converted.push(record),
                Err(e) => {
                    warn!(file_id = %file_id, error = %e, "Batch convert entry failed");
                    failed.push((file_id.clone(), e.to_string()));
                }
            }
        }
        (converted, failed)
    }

    /// Stop the poller and announce shutdown to event subscribers
    pub async fn shutdown(&self) {
        self.stop_background_poller().await;
        self.ctx.emit(Event::Shutdown);
    }
}

impl EngineCtx {
    /// Broadcast an event, dropping it when nobody listens
    pub(crate) fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    /// Whether a task has been cancelled (or removed)
    async fn is_cancelled(&self, id: TaskId) -> bool {
        let tasks = self.tasks.lock().await;
        tasks
            .get(&id)
            .is_none_or(|t| t.status == TaskStatus::Cancelled)
    }

    /// Download one episode, with optional conversion, producing the result
    /// record appended to the owning task
    ///
    /// A transcode failure is surfaced on the record but the download still
    /// counts as successful; the original file is kept.
    pub(crate) async fn download_episode(
        &self,
        task_id: TaskId,
        owner: &str,
        episode: &Episode,
        convert: bool,
    ) -> EpisodeResult {
        let hint = filename_hint(episode);
        let record = match self
            .store
            .download(&episode.audio_url, hint.as_deref(), Some(episode.clone()), owner)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                error!(
                    task_id = %task_id,
                    title = %episode.title,
                    url = %episode.audio_url,
                    error = %e,
                    "Episode download failed"
                );
                self.emit(Event::EpisodeFailed {
                    task_id,
                    title: episode.title.clone(),
                    error: e.to_string(),
                });
                return EpisodeResult {
                    episode: episode.clone(),
                    success: false,
                    file_id: None,
                    error: Some(e.to_string()),
                    transcode_error: None,
                };
            }
        };

        let mut transcode_error = None;
        if convert && detect_format(&record.file_path) == Some(AudioFormat::M4a) {
            match self.transcoder.convert(&record.file_path, None).await {
                Ok(new_path) => {
                    if let Err(e) = self.store.replace_file(&record.file_id, &new_path).await {
                        warn!(file_id = %record.file_id, error = %e, "Post-convert record update failed");
                        transcode_error = Some(e.to_string());
                    }
                }
                Err(e) => {
                    warn!(
                        file_id = %record.file_id,
                        title = %episode.title,
                        error = %e,
                        "Transcode failed, keeping original file"
                    );
                    self.emit(Event::TranscodeFailed {
                        file_id: record.file_id.clone(),
                        error: e.to_string(),
                    });
                    transcode_error = Some(e.to_string());
                }
            }
        }

        self.emit(Event::EpisodeDownloaded {
            task_id,
            file_id: record.file_id.clone(),
            title: episode.title.clone(),
        });
        EpisodeResult {
            episode: episode.clone(),
            success: true,
            file_id: Some(record.file_id),
            error: None,
            transcode_error,
        }
    }
}

/// Worker body for one download-latest task
async fn run_download_latest(ctx: EngineCtx, id: TaskId) {
    // Claim the task; it may have been cancelled while queued.
    let (owner, subscriptions, count, convert) = {
        let mut tasks = ctx.tasks.lock().await;
        let Some(task) = tasks.get_mut(&id) else {
            return;
        };
        if task.status != TaskStatus::Pending {
            debug!(task_id = %id, status = ?task.status, "Skipping queued worker");
            return;
        }
        task.status = TaskStatus::Running;
        let count = match &task.detail {
            TaskDetail::DownloadLatest { count, .. } => *count,
            TaskDetail::Monitor { .. } => return,
        };
        (
            task.owner.clone(),
            task.subscriptions.clone(),
            count,
            task.convert,
        )
    };
    ctx.emit(Event::TaskStarted { id });
    info!(task_id = %id, "Download task started");

    let outcome = execute_download_latest(&ctx, id, &owner, &subscriptions, count, convert).await;

    let mut tasks = ctx.tasks.lock().await;
    let Some(task) = tasks.get_mut(&id) else {
        return;
    };
    // A cancel that landed mid-flight wins over the completion transition.
    if task.status != TaskStatus::Running {
        return;
    }
    match outcome {
        Ok(()) => {
            task.status = TaskStatus::Completed;
            drop(tasks);
            ctx.emit(Event::TaskCompleted { id });
            info!(task_id = %id, "Download task completed");
        }
        Err(e) => {
            task.status = TaskStatus::Failed;
            if let TaskDetail::DownloadLatest { error, .. } = &mut task.detail {
                *error = Some(e.to_string());
            }
            drop(tasks);
            ctx.emit(Event::TaskFailed {
                id,
                error: e.to_string(),
            });
            error!(task_id = %id, error = %e, "Download task failed");
        }
    }
}

/// The per-subscription download loop
///
/// Per-subscription failures are caught and counted without aborting the
/// rest; only an error escaping this loop fails the whole task.
async fn execute_download_latest(
    ctx: &EngineCtx,
    id: TaskId,
    owner: &str,
    subscriptions: &[Subscription],
    count: usize,
    convert: bool,
) -> Result<()> {
    for subscription in subscriptions {
        if ctx.is_cancelled(id).await {
            info!(task_id = %id, "Stopping cancelled download task");
            return Ok(());
        }

        if let Err(e) = process_subscription(ctx, id, owner, subscription, count, convert).await {
            warn!(
                task_id = %id,
                feed = %subscription.feed_url,
                error = %e,
                "Subscription processing failed"
            );
            let mut tasks = ctx.tasks.lock().await;
            if let Some(task) = tasks.get_mut(&id)
                && let TaskDetail::DownloadLatest { progress, .. } = &mut task.detail
            {
                progress.failed += 1;
            }
        }
    }
    Ok(())
}

/// Download the latest `count` episodes of one subscription
async fn process_subscription(
    ctx: &EngineCtx,
    id: TaskId,
    owner: &str,
    subscription: &Subscription,
    count: usize,
    convert: bool,
) -> Result<()> {
    let episodes = ctx.resolver.resolve(&subscription.feed_url).await;
    debug!(
        task_id = %id,
        feed = %subscription.feed_url,
        found = episodes.len(),
        "Resolved subscription"
    );

    for episode in episodes
        .iter()
        .take(count)
        .filter(|e| !e.audio_url.is_empty())
    {
        if ctx.is_cancelled(id).await {
            return Ok(());
        }

        let result = ctx.download_episode(id, owner, episode, convert).await;

        let mut tasks = ctx.tasks.lock().await;
        if let Some(task) = tasks.get_mut(&id)
            && let TaskDetail::DownloadLatest {
                progress, results, ..
            } = &mut task.detail
        {
            if result.success {
                progress.completed += 1;
            } else {
                progress.failed += 1;
            }
            results.push(result);
        }
    }
    Ok(())
}

/// Filename hint for an episode: title plus the URL's audio extension
fn filename_hint(episode: &Episode) -> Option<String> {
    if episode.title.is_empty() {
        return None;
    }
    let path = episode
        .audio_url
        .split('?')
        .next()
        .unwrap_or(&episode.audio_url);
    let ext = path.rsplit('.').next().filter(|e| {
        matches!(
            e.to_ascii_lowercase().as_str(),
            "mp3" | "m4a" | "m4b" | "aac"
        )
    })?;
    Some(format!("{}.{}", episode.title.trim(), ext))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
