use super::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path as url_path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store_in(dir: &TempDir) -> ContentStore {
    let mut config = Config::default();
    config.download.download_dir = dir.path().to_path_buf();
    ContentStore::new(&config).unwrap()
}

async fn mock_audio(server: &MockServer, route: &str, body: &[u8], expected_hits: u64) {
    Mock::given(method("GET"))
        .and(url_path(route.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .expect(expected_hits)
        .mount(server)
        .await;
}

#[tokio::test]
async fn downloads_and_records_a_file() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mock_audio(&server, "/show/ep1.mp3", b"audio-bytes", 1).await;

    let store = store_in(&dir);
    let url = format!("{}/show/ep1.mp3", server.uri());
    let record = store.download(&url, None, None, "alice").await.unwrap();

    assert_eq!(record.file_id, FileId::for_url(&url));
    assert_eq!(record.filename, "ep1.mp3");
    assert_eq!(record.size, 11);
    assert_eq!(record.username, "alice");
    assert!(record.file_path.exists());
    assert_eq!(std::fs::read(&record.file_path).unwrap(), b"audio-bytes");
    assert!(dir.path().join(METADATA_FILE).exists());
}

#[tokio::test]
async fn second_download_of_same_url_skips_the_fetch() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    // expect(1) fails the test if the store fetches twice
    mock_audio(&server, "/ep.mp3", b"audio", 1).await;

    let store = store_in(&dir);
    let url = format!("{}/ep.mp3", server.uri());

    let first = store.download(&url, None, None, "alice").await.unwrap();
    let second = store.download(&url, None, None, "alice").await.unwrap();

    assert_eq!(first.file_id, second.file_id);
    assert_eq!(first.file_path, second.file_path);
}

#[tokio::test]
async fn filename_hint_wins_over_url_basename() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mock_audio(&server, "/stream", b"audio", 1).await;

    let store = store_in(&dir);
    let url = format!("{}/stream", server.uri());
    let record = store
        .download(&url, Some("My Episode.m4a"), None, "alice")
        .await
        .unwrap();
    assert_eq!(record.filename, "My Episode.m4a");
}

#[tokio::test]
async fn colliding_filenames_from_distinct_urls_keep_both_files() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mock_audio(&server, "/show-a/ep.mp3", b"first-bytes", 1).await;
    mock_audio(&server, "/show-b/ep.mp3", b"second-bytes", 1).await;

    let store = store_in(&dir);
    let first = store
        .download(&format!("{}/show-a/ep.mp3", server.uri()), None, None, "alice")
        .await
        .unwrap();
    let second = store
        .download(&format!("{}/show-b/ep.mp3", server.uri()), None, None, "alice")
        .await
        .unwrap();

    // Both URLs derive "ep.mp3"; the second gets a disambiguated name
    assert_eq!(first.filename, "ep.mp3");
    assert_ne!(second.file_path, first.file_path);
    assert!(second.filename.ends_with("_ep.mp3"));
    assert_eq!(std::fs::read(&first.file_path).unwrap(), b"first-bytes");
    assert_eq!(std::fs::read(&second.file_path).unwrap(), b"second-bytes");
    assert_eq!(store.list_downloads(Some("alice")).await.len(), 2);
}

#[tokio::test]
async fn query_string_is_stripped_from_derived_filename() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mock_audio(&server, "/a/ep.mp3", b"audio", 1).await;

    let store = store_in(&dir);
    let url = format!("{}/a/ep.mp3?sig=abc&expires=1", server.uri());
    let record = store.download(&url, None, None, "alice").await.unwrap();
    assert_eq!(record.filename, "ep.mp3");
}

#[tokio::test]
async fn extensionless_url_falls_back_to_file_id_name() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mock_audio(&server, "/stream", b"audio", 1).await;

    let store = store_in(&dir);
    let url = format!("{}/stream", server.uri());
    let record = store.download(&url, None, None, "alice").await.unwrap();
    assert_eq!(record.filename, format!("{}.mp3", record.file_id));
}

#[tokio::test]
async fn http_error_is_a_download_error() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(url_path("/gone.mp3"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = store_in(&dir);
    let url = format!("{}/gone.mp3", server.uri());
    let result = store.download(&url, None, None, "alice").await;
    assert!(matches!(result, Err(Error::Download(_))));

    // No record is left behind for the failed fetch
    assert!(store.get(&FileId::for_url(&url)).await.is_none());
}

#[tokio::test]
async fn empty_url_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir);
    assert!(matches!(
        store.download("", None, None, "alice").await,
        Err(Error::InvalidInput(_))
    ));
}

#[tokio::test]
async fn listing_filters_by_user_and_skips_missing_files() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mock_audio(&server, "/a.mp3", b"a", 1).await;
    mock_audio(&server, "/b.mp3", b"b", 1).await;
    mock_audio(&server, "/c.mp3", b"c", 1).await;

    let store = store_in(&dir);
    let a = store
        .download(&format!("{}/a.mp3", server.uri()), None, None, "alice")
        .await
        .unwrap();
    store
        .download(&format!("{}/b.mp3", server.uri()), None, None, "bob")
        .await
        .unwrap();
    let c = store
        .download(&format!("{}/c.mp3", server.uri()), None, None, "alice")
        .await
        .unwrap();

    let alices = store.list_downloads(Some("alice")).await;
    assert_eq!(alices.len(), 2);
    // Newest first
    assert_eq!(alices[0].file_id, c.file_id);

    assert_eq!(store.list_downloads(None).await.len(), 3);
    assert_eq!(store.users().await, vec!["alice", "bob"]);

    // A file removed out-of-band disappears from listings
    std::fs::remove_file(&a.file_path).unwrap();
    assert_eq!(store.list_downloads(Some("alice")).await.len(), 1);
}

#[tokio::test]
async fn delete_removes_record_and_file() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mock_audio(&server, "/a.mp3", b"a", 1).await;

    let store = store_in(&dir);
    let record = store
        .download(&format!("{}/a.mp3", server.uri()), None, None, "alice")
        .await
        .unwrap();

    assert!(store.delete_file(&record.file_id).await.unwrap());
    assert!(!record.file_path.exists());
    assert!(store.get(&record.file_id).await.is_none());

    // Deleting again reports nothing to delete
    assert!(!store.delete_file(&record.file_id).await.unwrap());
}

#[tokio::test]
async fn batch_delete_reports_unknown_ids() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mock_audio(&server, "/a.mp3", b"a", 1).await;

    let store = store_in(&dir);
    let record = store
        .download(&format!("{}/a.mp3", server.uri()), None, None, "alice")
        .await
        .unwrap();

    let bogus = FileId::from("ffffffffffffffffffffffffffffffff");
    let (deleted, missing) = store
        .delete_files_batch(&[record.file_id.clone(), bogus.clone()])
        .await;
    assert_eq!(deleted, 1);
    assert_eq!(missing, vec![bogus]);
}

#[tokio::test]
async fn replace_file_keeps_id_and_swaps_path() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mock_audio(&server, "/ep.m4a", b"m4a-bytes", 1).await;

    let store = store_in(&dir);
    let url = format!("{}/ep.m4a", server.uri());
    let record = store.download(&url, None, None, "alice").await.unwrap();

    let converted = dir.path().join("ep.mp3");
    std::fs::write(&converted, b"mp3-bytes!").unwrap();

    let updated = store.replace_file(&record.file_id, &converted).await.unwrap();
    assert_eq!(updated.file_id, record.file_id);
    assert_eq!(updated.filename, "ep.mp3");
    assert_eq!(updated.size, 10);
    assert_eq!(updated.url, url, "provenance is preserved");
    assert!(!record.file_path.exists(), "old file is removed");

    // Unknown id errors
    let bogus = FileId::from("00000000000000000000000000000000");
    assert!(store.replace_file(&bogus, &converted).await.is_err());
}

#[tokio::test]
async fn index_survives_a_restart() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    mock_audio(&server, "/ep.mp3", b"audio", 1).await;
    let url = format!("{}/ep.mp3", server.uri());

    {
        let store = store_in(&dir);
        store.download(&url, None, None, "alice").await.unwrap();
    }

    // Reopen over the same directory: record and idempotency survive
    let store = store_in(&dir);
    let record = store.get(&FileId::for_url(&url)).await.unwrap();
    assert_eq!(record.username, "alice");
    let again = store.download(&url, None, None, "alice").await.unwrap();
    assert_eq!(again.file_id, record.file_id);
}

#[test]
fn filename_sanitization() {
    assert_eq!(sanitize_filename("a/b\\c.mp3"), "a_b_c.mp3");
    let escaped = sanitize_filename("../../etc/passwd");
    assert!(!escaped.contains('/') && !escaped.contains(".."));
    assert_eq!(filename_from_url("https://x.com/a/ep.mp3?k=v").as_deref(), Some("ep.mp3"));
    assert_eq!(filename_from_url("https://x.com/stream"), None);
    assert_eq!(filename_from_url("https://x.com/"), None);
}
