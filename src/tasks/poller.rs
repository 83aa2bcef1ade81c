//! Background poller servicing monitor tasks.
//!
//! One process-wide loop ticks on a fixed interval. Each tick snapshots the
//! running monitor tasks under the task lock, releases it, then processes
//! every snapshot without holding the lock; watermark and counter updates
//! reacquire it briefly per episode.

use super::EngineCtx;
use crate::types::{Episode, Event, Subscription, Task, TaskDetail, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Point-in-time copy of a monitor task, taken under the task lock
pub(super) struct MonitorSnapshot {
    pub id: TaskId,
    pub owner: String,
    pub convert: bool,
    pub subscriptions: Vec<Subscription>,
    pub watermarks: HashMap<String, DateTime<Utc>>,
}

impl MonitorSnapshot {
    /// Snapshot a task if it is a running monitor
    pub(super) fn of(task: &Task) -> Option<Self> {
        if task.status != TaskStatus::Running {
            return None;
        }
        let TaskDetail::Monitor { watermarks, .. } = &task.detail else {
            return None;
        };
        Some(Self {
            id: task.id,
            owner: task.owner.clone(),
            convert: task.convert,
            subscriptions: task.subscriptions.clone(),
            watermarks: watermarks.clone(),
        })
    }
}

/// Poller loop: tick, then sleep, until cancelled
pub(super) async fn run(ctx: EngineCtx, token: CancellationToken, interval: Duration) {
    loop {
        let checked = run_pass(&ctx).await;
        debug!(monitors = checked, "Poll pass finished");

        tokio::select! {
            _ = token.cancelled() => {
                info!("Poller loop exiting");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// One pass over every running monitor; returns how many were checked
pub(super) async fn run_pass(ctx: &EngineCtx) -> usize {
    let snapshots: Vec<MonitorSnapshot> = {
        let tasks = ctx.tasks.lock().await;
        tasks.values().filter_map(MonitorSnapshot::of).collect()
    };

    let count = snapshots.len();
    for snapshot in snapshots {
        check_monitor(ctx, snapshot).await;
    }
    count
}

/// Check one monitor's subscriptions, returning the number of episodes
/// downloaded
///
/// A cancel landing mid-check does not abort it; the snapshot finishes and
/// the next pass excludes the task.
pub(super) async fn check_monitor(ctx: &EngineCtx, snapshot: MonitorSnapshot) -> u64 {
    let id = snapshot.id;
    let mut new_episodes: u64 = 0;

    for subscription in &snapshot.subscriptions {
        let key = subscription.watermark_key();
        let episodes = ctx.resolver.resolve(&subscription.feed_url).await;
        if episodes.is_empty() {
            debug!(task_id = %id, feed = %subscription.feed_url, "Monitor found no episodes");
            continue;
        }

        match snapshot.watermarks.get(&key).copied() {
            None => {
                // First observation: establish the watermark without
                // downloading, so a fresh monitor never floods the store
                // with the feed's whole backlog.
                if let Some(newest) = max_published(&episodes) {
                    advance_watermark(ctx, id, &key, newest).await;
                    info!(
                        task_id = %id,
                        feed = %subscription.feed_url,
                        watermark = %newest,
                        "Established watermark"
                    );
                } else {
                    debug!(
                        task_id = %id,
                        feed = %subscription.feed_url,
                        "No publish dates, watermark not established"
                    );
                }
            }
            Some(watermark) => {
                for episode in filter_new_episodes(&episodes, watermark) {
                    let result = ctx
                        .download_episode(id, &snapshot.owner, &episode, snapshot.convert)
                        .await;
                    if !result.success {
                        warn!(
                            task_id = %id,
                            title = %episode.title,
                            "Monitor download failed, watermark not advanced"
                        );
                        continue;
                    }
                    new_episodes += 1;
                    if let Some(published) = episode.published {
                        advance_watermark(ctx, id, &key, published).await;
                    }
                    let mut tasks = ctx.tasks.lock().await;
                    if let Some(task) = tasks.get_mut(&id)
                        && let TaskDetail::Monitor {
                            downloaded_count, ..
                        } = &mut task.detail
                    {
                        *downloaded_count += 1;
                    }
                }
            }
        }
    }

    let mut tasks = ctx.tasks.lock().await;
    if let Some(task) = tasks.get_mut(&id)
        && let TaskDetail::Monitor {
            last_checked_at, ..
        } = &mut task.detail
    {
        *last_checked_at = Utc::now();
    }
    drop(tasks);

    ctx.emit(Event::MonitorChecked { id, new_episodes });
    new_episodes
}

/// Raise one subscription watermark, max-only
async fn advance_watermark(ctx: &EngineCtx, id: TaskId, key: &str, candidate: DateTime<Utc>) {
    let mut tasks = ctx.tasks.lock().await;
    if let Some(task) = tasks.get_mut(&id)
        && let TaskDetail::Monitor { watermarks, .. } = &mut task.detail
    {
        let entry = watermarks.entry(key.to_string()).or_insert(candidate);
        if candidate > *entry {
            *entry = candidate;
        }
    }
}

/// Episodes published strictly after the watermark, oldest first
///
/// Oldest-first processing keeps the watermark monotonic even when a later
/// download in the batch fails.
fn filter_new_episodes(episodes: &[Episode], watermark: DateTime<Utc>) -> Vec<Episode> {
    let mut new: Vec<Episode> = episodes
        .iter()
        .filter(|e| !e.audio_url.is_empty())
        .filter(|e| e.published.is_some_and(|p| p > watermark))
        .cloned()
        .collect();
    new.sort_by_key(|e| e.published);
    new
}

/// Newest publish timestamp in a feed, if any episode carries one
fn max_published(episodes: &[Episode]) -> Option<DateTime<Utc>> {
    episodes.iter().filter_map(|e| e.published).max()
}
