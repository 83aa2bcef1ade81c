use super::*;
use crate::types::TaskKind;
use async_trait::async_trait;
use chrono::TimeZone;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

/// In-memory resolver: feed URL -> canned episode list
struct MockResolver {
    feeds: std::sync::Mutex<HashMap<String, Vec<Episode>>>,
    delay: Option<Duration>,
}

impl MockResolver {
    fn new() -> Self {
        Self {
            feeds: std::sync::Mutex::new(HashMap::new()),
            delay: None,
        }
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            feeds: std::sync::Mutex::new(HashMap::new()),
            delay: Some(delay),
        }
    }

    fn set_feed(&self, url: &str, episodes: Vec<Episode>) {
        self.feeds
            .lock()
            .unwrap()
            .insert(url.to_string(), episodes);
    }
}

#[async_trait]
impl FeedResolver for MockResolver {
    async fn resolve(&self, source: &str) -> Vec<Episode> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.feeds
            .lock()
            .unwrap()
            .get(source)
            .cloned()
            .unwrap_or_default()
    }
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
}

fn episode(server: &MockServer, name: &str, ext: &str, published: Option<DateTime<Utc>>) -> Episode {
    Episode {
        title: name.to_string(),
        audio_url: format!("{}/{}.{}", server.uri(), name, ext),
        published,
        ..Episode::default()
    }
}

fn sub(url: &str) -> Subscription {
    Subscription {
        title: format!("feed {}", url),
        feed_url: url.to_string(),
    }
}

/// Catch-all audio endpoint; every GET returns the same bytes
async fn serve_audio(server: &MockServer) {
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"audio".to_vec()))
        .mount(server)
        .await;
}

fn engine_with(dir: &TempDir, resolver: Arc<dyn FeedResolver>) -> TaskManager {
    let mut config = Config::default();
    config.download.download_dir = dir.path().join("downloads");
    config.download.users_dir = dir.path().join("users");
    let store = Arc::new(ContentStore::new(&config).unwrap());
    TaskManager::new(config, store, resolver, Arc::new(NoOpTranscoder))
}

async fn wait_terminal(engine: &TaskManager, id: TaskId) -> Task {
    for _ in 0..500 {
        if let Some(task) = engine.get_task(id).await
            && task.status.is_terminal()
        {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} did not reach a terminal status", id);
}

#[tokio::test]
async fn download_latest_takes_first_count_per_subscription() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    serve_audio(&server).await;

    // Feed A has 5 episodes, feed B has 1; count 3 means 3 + 1 attempts.
    let resolver = Arc::new(MockResolver::new());
    resolver.set_feed(
        "https://feeds.test/a",
        (0..5)
            .map(|i| episode(&server, &format!("a{}", i), "mp3", Some(at(10 + i))))
            .collect(),
    );
    resolver.set_feed(
        "https://feeds.test/b",
        vec![episode(&server, "b0", "mp3", Some(at(10)))],
    );

    let engine = engine_with(&dir, resolver);
    let id = engine
        .create_download_latest(
            "alice",
            vec![sub("https://feeds.test/a"), sub("https://feeds.test/b")],
            3,
            false,
        )
        .await
        .unwrap();

    let task = wait_terminal(&engine, id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.kind(), TaskKind::DownloadLatest);

    let TaskDetail::DownloadLatest {
        progress, results, ..
    } = task.detail
    else {
        panic!("wrong detail kind");
    };
    assert_eq!(progress.total, 6, "upper bound is subs x count");
    assert_eq!(progress.completed, 4);
    assert_eq!(progress.failed, 0);
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.success && r.file_id.is_some()));

    assert_eq!(engine.store().list_downloads(Some("alice")).await.len(), 4);
}

#[tokio::test]
async fn failed_episode_is_counted_without_failing_the_task() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    serve_audio(&server).await;

    let resolver = Arc::new(MockResolver::new());
    let mut bad = episode(&server, "bad", "mp3", Some(at(11)));
    // Connection refused for this one episode only
    bad.audio_url = "http://127.0.0.1:1/bad.mp3".to_string();
    resolver.set_feed(
        "https://feeds.test/a",
        vec![bad, episode(&server, "good", "mp3", Some(at(10)))],
    );

    let engine = engine_with(&dir, resolver);
    let id = engine
        .create_download_latest("alice", vec![sub("https://feeds.test/a")], 5, false)
        .await
        .unwrap();

    let task = wait_terminal(&engine, id).await;
    assert_eq!(task.status, TaskStatus::Completed, "episode failures never fail the task");

    let TaskDetail::DownloadLatest { progress, results, .. } = task.detail else {
        panic!("wrong detail kind");
    };
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.failed, 1);
    let failed = results.iter().find(|r| !r.success).unwrap();
    assert!(failed.error.is_some());
    assert!(failed.file_id.is_none());
}

#[tokio::test]
async fn unresolvable_feed_yields_zero_attempts() {
    let dir = TempDir::new().unwrap();
    let resolver = Arc::new(MockResolver::new());
    // No feed registered: resolver returns an empty list, not an error.

    let engine = engine_with(&dir, resolver);
    let id = engine
        .create_download_latest("alice", vec![sub("https://feeds.test/missing")], 3, false)
        .await
        .unwrap();

    let task = wait_terminal(&engine, id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    let TaskDetail::DownloadLatest { progress, results, .. } = task.detail else {
        panic!("wrong detail kind");
    };
    assert_eq!(progress.completed, 0);
    assert_eq!(progress.failed, 0);
    assert!(results.is_empty());
}

#[tokio::test]
async fn empty_subscription_list_is_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(&dir, Arc::new(MockResolver::new()));

    assert!(matches!(
        engine.create_download_latest("alice", vec![], 3, false).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        engine.create_monitor("alice", vec![], false).await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn zero_count_task_completes_with_no_attempts() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    serve_audio(&server).await;

    let resolver = Arc::new(MockResolver::new());
    resolver.set_feed(
        "https://feeds.test/a",
        vec![episode(&server, "a0", "mp3", Some(at(10)))],
    );

    let engine = engine_with(&dir, resolver);
    let id = engine
        .create_download_latest("alice", vec![sub("https://feeds.test/a")], 0, false)
        .await
        .unwrap();

    let task = wait_terminal(&engine, id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    let TaskDetail::DownloadLatest { progress, results, .. } = task.detail else {
        panic!("wrong detail kind");
    };
    assert_eq!(progress.total, 0);
    assert_eq!(progress.completed, 0);
    assert_eq!(progress.failed, 0);
    assert!(results.is_empty());
    assert!(engine.store().list_downloads(None).await.is_empty());
}

#[tokio::test]
async fn same_url_across_tasks_is_fetched_once() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    // expect(1): a second network fetch fails the test
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"audio".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = Arc::new(MockResolver::new());
    resolver.set_feed(
        "https://feeds.test/a",
        vec![episode(&server, "shared", "mp3", Some(at(10)))],
    );

    let engine = engine_with(&dir, resolver);
    let first = engine
        .create_download_latest("alice", vec![sub("https://feeds.test/a")], 1, false)
        .await
        .unwrap();
    wait_terminal(&engine, first).await;

    let second = engine
        .create_download_latest("alice", vec![sub("https://feeds.test/a")], 1, false)
        .await
        .unwrap();
    let task = wait_terminal(&engine, second).await;

    let TaskDetail::DownloadLatest { progress, results, .. } = task.detail else {
        panic!("wrong detail kind");
    };
    assert_eq!(progress.completed, 1, "replay counts as success");
    assert_eq!(
        results[0].file_id,
        Some(FileId::for_url(&format!("{}/shared.mp3", server.uri())))
    );
    assert_eq!(engine.store().list_downloads(None).await.len(), 1);
}

#[tokio::test]
async fn cancel_semantics_for_unknown_and_terminal_tasks() {
    let dir = TempDir::new().unwrap();
    let resolver = Arc::new(MockResolver::new());
    let engine = engine_with(&dir, resolver);

    assert!(!engine.cancel_task(TaskId(999)).await, "unknown id");

    let id = engine
        .create_download_latest("alice", vec![sub("https://feeds.test/none")], 1, false)
        .await
        .unwrap();
    let task = wait_terminal(&engine, id).await;
    assert_eq!(task.status, TaskStatus::Completed);

    assert!(!engine.cancel_task(id).await, "terminal task");
    assert_eq!(
        engine.get_task(id).await.unwrap().status,
        TaskStatus::Completed,
        "failed cancel changes nothing"
    );
}

#[tokio::test]
async fn cancelling_a_running_task_sticks() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    serve_audio(&server).await;

    // Slow resolver keeps the worker in flight long enough to cancel it.
    let resolver = Arc::new(MockResolver::with_delay(Duration::from_millis(300)));
    resolver.set_feed(
        "https://feeds.test/a",
        vec![episode(&server, "a0", "mp3", Some(at(10)))],
    );

    let engine = engine_with(&dir, resolver);
    let id = engine
        .create_download_latest("alice", vec![sub("https://feeds.test/a")], 1, false)
        .await
        .unwrap();

    // Wait until the worker claimed the task
    for _ in 0..100 {
        if engine.get_task(id).await.unwrap().status == TaskStatus::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(engine.cancel_task(id).await);
    let task = wait_terminal(&engine, id).await;
    assert_eq!(
        task.status,
        TaskStatus::Cancelled,
        "cancel wins over the completion transition"
    );
}

#[tokio::test]
async fn queued_pending_task_can_be_cancelled() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    serve_audio(&server).await;

    let resolver = Arc::new(MockResolver::with_delay(Duration::from_millis(300)));
    resolver.set_feed(
        "https://feeds.test/a",
        vec![episode(&server, "a0", "mp3", Some(at(10)))],
    );

    let mut config = Config::default();
    config.download.download_dir = dir.path().join("downloads");
    config.download.max_concurrent_tasks = 1;
    let store = Arc::new(ContentStore::new(&config).unwrap());
    let engine = TaskManager::new(config, store, resolver, Arc::new(NoOpTranscoder));

    let first = engine
        .create_download_latest("alice", vec![sub("https://feeds.test/a")], 1, false)
        .await
        .unwrap();
    // Pool size 1: the second task stays Pending behind the slow first one
    let second = engine
        .create_download_latest("alice", vec![sub("https://feeds.test/a")], 1, false)
        .await
        .unwrap();

    assert_eq!(
        engine.get_task(second).await.unwrap().status,
        TaskStatus::Pending
    );
    assert!(engine.cancel_task(second).await);

    let second_task = wait_terminal(&engine, second).await;
    assert_eq!(second_task.status, TaskStatus::Cancelled);
    // The cancelled task never ran: no results appended
    let TaskDetail::DownloadLatest { results, .. } = second_task.detail else {
        panic!("wrong detail kind");
    };
    assert!(results.is_empty());

    let first_task = wait_terminal(&engine, first).await;
    assert_eq!(first_task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn monitor_first_tick_establishes_watermark_without_downloading() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    serve_audio(&server).await;

    let resolver = Arc::new(MockResolver::new());
    resolver.set_feed(
        "https://feeds.test/a",
        vec![
            episode(&server, "t2", "mp3", Some(at(10))),
            episode(&server, "t1", "mp3", Some(at(9))),
        ],
    );

    let engine = engine_with(&dir, Arc::clone(&resolver) as Arc<dyn FeedResolver>);
    let id = engine
        .create_monitor("alice", vec![sub("https://feeds.test/a")], false)
        .await
        .unwrap();
    assert_eq!(engine.get_task(id).await.unwrap().status, TaskStatus::Running);

    assert_eq!(engine.run_monitor_pass().await, 1);

    let task = engine.get_task(id).await.unwrap();
    let TaskDetail::Monitor {
        downloaded_count,
        watermarks,
        ..
    } = &task.detail
    else {
        panic!("wrong detail kind");
    };
    assert_eq!(*downloaded_count, 0, "first tick downloads nothing");
    let key = sub("https://feeds.test/a").watermark_key();
    assert_eq!(watermarks.get(&key), Some(&at(10)));
    assert!(engine.store().list_downloads(None).await.is_empty());
}

#[tokio::test]
async fn monitor_downloads_only_strictly_newer_episodes() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    serve_audio(&server).await;

    let resolver = Arc::new(MockResolver::new());
    resolver.set_feed(
        "https://feeds.test/a",
        vec![
            episode(&server, "t2", "mp3", Some(at(10))),
            episode(&server, "t1", "mp3", Some(at(9))),
        ],
    );

    let engine = engine_with(&dir, Arc::clone(&resolver) as Arc<dyn FeedResolver>);
    let id = engine
        .create_monitor("alice", vec![sub("https://feeds.test/a")], false)
        .await
        .unwrap();

    // Tick 1 establishes the watermark at t2's publish time
    engine.run_monitor_pass().await;

    // A new episode appears
    resolver.set_feed(
        "https://feeds.test/a",
        vec![
            episode(&server, "t3", "mp3", Some(at(11))),
            episode(&server, "t2", "mp3", Some(at(10))),
            episode(&server, "t1", "mp3", Some(at(9))),
        ],
    );

    let downloaded = engine.check_task_now(id).await.unwrap();
    assert_eq!(downloaded, 1, "only the strictly newer episode");

    let task = engine.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Running, "monitors never complete");
    let TaskDetail::Monitor {
        downloaded_count,
        watermarks,
        ..
    } = &task.detail
    else {
        panic!("wrong detail kind");
    };
    assert_eq!(*downloaded_count, 1);
    let key = sub("https://feeds.test/a").watermark_key();
    assert_eq!(watermarks.get(&key), Some(&at(11)), "watermark advanced");

    let downloads = engine.store().list_downloads(None).await;
    assert_eq!(downloads.len(), 1);
    assert!(downloads[0].url.ends_with("/t3.mp3"));

    // Tick 3 with an unchanged feed downloads nothing more
    assert_eq!(engine.check_task_now(id).await.unwrap(), 0);
}

#[tokio::test]
async fn watermark_never_regresses() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    serve_audio(&server).await;

    let resolver = Arc::new(MockResolver::new());
    resolver.set_feed(
        "https://feeds.test/a",
        vec![episode(&server, "t5", "mp3", Some(at(15)))],
    );

    let engine = engine_with(&dir, Arc::clone(&resolver) as Arc<dyn FeedResolver>);
    let id = engine
        .create_monitor("alice", vec![sub("https://feeds.test/a")], false)
        .await
        .unwrap();
    engine.run_monitor_pass().await;

    // Feed rewrites its history with older entries only
    resolver.set_feed(
        "https://feeds.test/a",
        vec![episode(&server, "t1", "mp3", Some(at(9)))],
    );
    engine.check_task_now(id).await.unwrap();

    let task = engine.get_task(id).await.unwrap();
    let TaskDetail::Monitor { watermarks, .. } = &task.detail else {
        panic!("wrong detail kind");
    };
    let key = sub("https://feeds.test/a").watermark_key();
    assert_eq!(watermarks.get(&key), Some(&at(15)), "max-only advancement");
    assert!(engine.store().list_downloads(None).await.is_empty());
}

#[tokio::test]
async fn cancelled_monitor_is_excluded_from_passes() {
    let dir = TempDir::new().unwrap();
    let resolver = Arc::new(MockResolver::new());
    let engine = engine_with(&dir, resolver);

    let id = engine
        .create_monitor("alice", vec![sub("https://feeds.test/a")], false)
        .await
        .unwrap();
    assert!(engine.cancel_task(id).await);
    assert_eq!(engine.get_task(id).await.unwrap().status, TaskStatus::Cancelled);

    assert_eq!(engine.run_monitor_pass().await, 0);
    assert!(engine.check_task_now(id).await.is_err());
}

#[tokio::test]
async fn unavailable_transcoder_surfaces_on_results_without_failing_downloads() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    serve_audio(&server).await;

    let resolver = Arc::new(MockResolver::new());
    resolver.set_feed(
        "https://feeds.test/a",
        vec![
            episode(&server, "e1", "m4a", Some(at(10))),
            episode(&server, "e2", "m4a", Some(at(9))),
        ],
    );

    // engine_with wires NoOpTranscoder
    let engine = engine_with(&dir, resolver);
    assert!(!engine.transcoder_available());

    let id = engine
        .create_download_latest("alice", vec![sub("https://feeds.test/a")], 5, true)
        .await
        .unwrap();
    let task = wait_terminal(&engine, id).await;
    assert_eq!(task.status, TaskStatus::Completed);

    let TaskDetail::DownloadLatest { progress, results, .. } = task.detail else {
        panic!("wrong detail kind");
    };
    assert_eq!(progress.completed, 2, "downloads succeed without ffmpeg");
    assert_eq!(progress.failed, 0, "transcode failures are not download failures");
    for result in &results {
        assert!(result.success);
        assert!(result.transcode_error.is_some(), "failure is surfaced per episode");
    }

    // Files stay in their original format
    for record in engine.store().list_downloads(None).await {
        assert!(record.filename.ends_with(".m4a"));
        assert!(record.file_path.exists());
    }
}

#[tokio::test]
async fn convert_download_handles_formats() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    serve_audio(&server).await;

    let resolver = Arc::new(MockResolver::new());
    let engine = engine_with(&dir, resolver);

    // Already-mp3 counts as success and is returned unchanged
    let mp3 = engine
        .store()
        .download(&format!("{}/a.mp3", server.uri()), None, None, "alice")
        .await
        .unwrap();
    let unchanged = engine.convert_download(&mp3.file_id).await.unwrap();
    assert_eq!(unchanged.filename, mp3.filename);

    // m4a with no transcoder available errors
    let m4a = engine
        .store()
        .download(&format!("{}/b.m4a", server.uri()), None, None, "alice")
        .await
        .unwrap();
    assert!(matches!(
        engine.convert_download(&m4a.file_id).await,
        Err(Error::Transcode(_))
    ));

    // Unknown id
    let bogus = FileId::from("00000000000000000000000000000000");
    assert!(matches!(
        engine.convert_download(&bogus).await,
        Err(Error::NotFound(_))
    ));

    let (converted, failed) = engine
        .convert_downloads_batch(&[mp3.file_id.clone(), m4a.file_id.clone()])
        .await;
    assert_eq!(converted.len(), 1);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, m4a.file_id);
}

#[tokio::test]
async fn poller_start_is_idempotent_and_stop_is_safe() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(&dir, Arc::new(MockResolver::new()));

    assert!(!engine.poller_running());
    engine.stop_background_poller().await; // no-op when stopped

    engine.start_background_poller().await;
    engine.start_background_poller().await; // second start is a no-op
    assert!(engine.poller_running());

    engine.stop_background_poller().await;
    assert!(!engine.poller_running());
}

#[tokio::test]
async fn background_poller_services_monitors() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    serve_audio(&server).await;

    let resolver = Arc::new(MockResolver::new());
    resolver.set_feed(
        "https://feeds.test/a",
        vec![episode(&server, "t1", "mp3", Some(at(9)))],
    );

    let mut config = Config::default();
    config.download.download_dir = dir.path().join("downloads");
    config.monitor.poll_interval = Duration::from_millis(50);
    let store = Arc::new(ContentStore::new(&config).unwrap());
    let engine = TaskManager::new(config, store, resolver, Arc::new(NoOpTranscoder));

    let id = engine
        .create_monitor("alice", vec![sub("https://feeds.test/a")], false)
        .await
        .unwrap();
    let created = engine.get_task(id).await.unwrap();
    let TaskDetail::Monitor { last_checked_at, .. } = created.detail else {
        panic!("wrong detail kind");
    };

    engine.start_background_poller().await;

    // Within a few intervals the poller must have touched the task
    let mut checked = false;
    for _ in 0..100 {
        let task = engine.get_task(id).await.unwrap();
        if let TaskDetail::Monitor { last_checked_at: now_checked, .. } = task.detail
            && now_checked > last_checked_at
        {
            checked = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    engine.stop_background_poller().await;
    assert!(checked, "poller never serviced the monitor task");
}

#[tokio::test]
async fn events_are_broadcast_to_subscribers() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    serve_audio(&server).await;

    let resolver = Arc::new(MockResolver::new());
    resolver.set_feed(
        "https://feeds.test/a",
        vec![episode(&server, "a0", "mp3", Some(at(10)))],
    );

    let engine = engine_with(&dir, resolver);
    let mut events = engine.subscribe();

    let id = engine
        .create_download_latest("alice", vec![sub("https://feeds.test/a")], 1, false)
        .await
        .unwrap();
    wait_terminal(&engine, id).await;

    let mut seen_created = false;
    let mut seen_downloaded = false;
    let mut seen_completed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::TaskCreated { id: event_id, kind } => {
                assert_eq!(event_id, id);
                assert_eq!(kind, TaskKind::DownloadLatest);
                seen_created = true;
            }
            Event::EpisodeDownloaded { task_id, .. } => {
                assert_eq!(task_id, id);
                seen_downloaded = true;
            }
            Event::TaskCompleted { id: event_id } => {
                assert_eq!(event_id, id);
                seen_completed = true;
            }
            _ => {}
        }
    }
    assert!(seen_created && seen_downloaded && seen_completed);
}

#[tokio::test]
async fn task_listing_is_newest_first() {
    let dir = TempDir::new().unwrap();
    let resolver = Arc::new(MockResolver::new());
    let engine = engine_with(&dir, resolver);

    let a = engine
        .create_monitor("alice", vec![sub("https://f/a")], false)
        .await
        .unwrap();
    let b = engine
        .create_monitor("alice", vec![sub("https://f/b")], false)
        .await
        .unwrap();

    let all = engine.get_all_tasks().await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, b);
    assert_eq!(all[1].id, a);
    assert!(b.get() > a.get(), "ids are monotonic");

    assert!(engine.get_task(TaskId(999)).await.is_none());
}
