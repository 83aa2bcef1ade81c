//! Audio file storage with URL-keyed deduplication.
//!
//! Every stored file is identified by the md5 of its source URL, so a second
//! download of the same URL is a metadata lookup instead of a network fetch.
//! Records are persisted to `metadata.json` in the download directory and
//! reloaded on startup; files deleted out-of-band are filtered from listings.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{Episode, FileId};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// Name of the persisted record index inside the download directory
const METADATA_FILE: &str = "metadata.json";

/// One stored audio file and its provenance
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadRecord {
    /// Stable identifier derived from the source URL
    pub file_id: FileId,

    /// Source URL the file was fetched from
    pub url: String,

    /// Stored filename (relative to the download directory)
    pub filename: String,

    /// Absolute path of the stored file
    pub file_path: PathBuf,

    /// When the file was downloaded (or last replaced)
    pub downloaded_at: DateTime<Utc>,

    /// File size in bytes
    pub size: u64,

    /// Episode metadata captured at download time, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<Episode>,

    /// The user the download was performed for
    #[serde(default)]
    pub username: String,
}

/// Download-directory content store
///
/// All record mutation happens under a single async mutex; the persisted
/// index is rewritten after every mutation. Network fetches run outside the
/// lock so concurrent downloads of different URLs do not serialize.
pub struct ContentStore {
    download_dir: PathBuf,
    http_client: reqwest::Client,
    records: Mutex<HashMap<FileId, DownloadRecord>>,
}

impl ContentStore {
    /// Open (or initialize) the store under the configured download directory
    ///
    /// # Errors
    /// Returns error if the directory cannot be created, the HTTP client
    /// cannot be built, or an existing index is unreadable.
    pub fn new(config: &Config) -> Result<Self> {
        let download_dir = config.download_dir().clone();
        std::fs::create_dir_all(&download_dir)?;

        let http_client = reqwest::Client::builder()
            .timeout(config.download.http_timeout)
            .user_agent(config.download.user_agent.clone())
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        let records = load_index(&download_dir)?;
        info!(
            dir = %download_dir.display(),
            records = records.len(),
            "Content store opened"
        );

        Ok(Self {
            download_dir,
            http_client,
            records: Mutex::new(records),
        })
    }

    /// The directory files are stored under
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Download `url` into the store, or return the existing record
    ///
    /// Idempotent by URL: if a record exists and its file is still on disk,
    /// no network request is made. The filename comes from `filename_hint`,
    /// then the URL basename, then `<file_id>.mp3`.
    ///
    /// # Errors
    /// Returns error if the fetch fails or the file cannot be written.
    pub async fn download(
        &self,
        url: &str,
        filename_hint: Option<&str>,
        episode: Option<Episode>,
        username: &str,
    ) -> Result<DownloadRecord> {
        if url.is_empty() {
            return Err(Error::InvalidInput("audio URL is empty".to_string()));
        }
        let file_id = FileId::for_url(url);

        {
            let records = self.records.lock().await;
            if let Some(existing) = records.get(&file_id)
                && existing.file_path.exists()
            {
                debug!(file_id = %file_id, url = %url, "Download already present, skipping fetch");
                return Ok(existing.clone());
            }
        }

        let mut filename = filename_hint
            .map(sanitize_filename)
            .filter(|f| !f.is_empty())
            .or_else(|| filename_from_url(url))
            .unwrap_or_else(|| format!("{}.mp3", file_id));

        // Distinct URLs can derive the same filename; a colliding name gets
        // a file-id prefix so the earlier file is never overwritten.
        {
            let records = self.records.lock().await;
            let taken = self.download_dir.join(&filename).exists()
                || records
                    .values()
                    .any(|r| r.file_id != file_id && r.filename == filename);
            if taken {
                filename = format!("{}_{}", &file_id.as_str()[..8], filename);
            }
        }
        let file_path = self.download_dir.join(&filename);

        let size = self.fetch_to_file(url, &file_path).await?;
        info!(url = %url, path = %file_path.display(), size, "Downloaded file");

        let record = DownloadRecord {
            file_id: file_id.clone(),
            url: url.to_string(),
            filename,
            file_path,
            downloaded_at: Utc::now(),
            size,
            episode,
            username: username.to_string(),
        };

        let mut records = self.records.lock().await;
        records.insert(file_id, record.clone());
        persist_index(&self.download_dir, &records)?;

        Ok(record)
    }

    /// Stream an HTTP body to `path`, writing through a temp file
    async fn fetch_to_file(&self, url: &str, path: &Path) -> Result<u64> {
        let response = self.http_client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Download(format!(
                "HTTP {} fetching {}",
                response.status().as_u16(),
                url
            )));
        }

        let part_path = path.with_extension(format!(
            "{}.part",
            path.extension().and_then(|e| e.to_str()).unwrap_or("bin")
        ));

        let mut file = tokio::fs::File::create(&part_path).await?;
        let mut stream = response.bytes_stream();
        let mut size: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                Error::Download(format!("stream error fetching {}: {}", url, e))
            })?;
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&part_path, path).await?;
        Ok(size)
    }

    /// Look up one record by file id
    pub async fn get(&self, file_id: &FileId) -> Option<DownloadRecord> {
        self.records.lock().await.get(file_id).cloned()
    }

    /// List stored files, optionally filtered by username, newest first
    ///
    /// Records whose file has been removed from disk are skipped.
    pub async fn list_downloads(&self, username: Option<&str>) -> Vec<DownloadRecord> {
        let records = self.records.lock().await;
        let mut listed: Vec<DownloadRecord> = records
            .values()
            .filter(|r| username.is_none_or(|u| r.username == u))
            .filter(|r| r.file_path.exists())
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.downloaded_at.cmp(&a.downloaded_at));
        listed
    }

    /// Distinct usernames that own at least one record, sorted
    pub async fn users(&self) -> Vec<String> {
        let records = self.records.lock().await;
        let mut users: Vec<String> = records
            .values()
            .map(|r| r.username.clone())
            .filter(|u| !u.is_empty())
            .collect();
        users.sort();
        users.dedup();
        users
    }

    /// Delete one stored file and its record
    ///
    /// Returns false if no record exists for `file_id`. A record whose file
    /// is already gone from disk still deletes successfully.
    ///
    /// # Errors
    /// Returns error if the index cannot be persisted.
    pub async fn delete_file(&self, file_id: &FileId) -> Result<bool> {
        let mut records = self.records.lock().await;
        let Some(record) = records.remove(file_id) else {
            return Ok(false);
        };

        if record.file_path.exists()
            && let Err(e) = tokio::fs::remove_file(&record.file_path).await
        {
            warn!(path = %record.file_path.display(), error = %e, "Failed to remove file");
        }

        persist_index(&self.download_dir, &records)?;
        info!(file_id = %file_id, filename = %record.filename, "Deleted download");
        Ok(true)
    }

    /// Delete several files; returns the deletion count and the ids that
    /// had no record
    pub async fn delete_files_batch(&self, file_ids: &[FileId]) -> (usize, Vec<FileId>) {
        let mut deleted = 0;
        let mut missing = Vec::new();
        for file_id in file_ids {
            match self.delete_file(file_id).await {
                Ok(true) => deleted += 1,
                Ok(false) => missing.push(file_id.clone()),
                Err(e) => {
                    warn!(file_id = %file_id, error = %e, "Batch delete entry failed");
                    missing.push(file_id.clone());
                }
            }
        }
        (deleted, missing)
    }

    /// Point an existing record at a replacement file
    ///
    /// Used after transcoding: the record keeps its id and provenance but
    /// takes the new file's name, path, and size. The old file is removed
    /// if the replacement landed at a different path.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for an unknown id, or if the replacement
    /// file is missing or the index cannot be persisted.
    pub async fn replace_file(&self, file_id: &FileId, new_path: &Path) -> Result<DownloadRecord> {
        let metadata = tokio::fs::metadata(new_path).await.map_err(|_| {
            Error::NotFound(format!("replacement file missing: {}", new_path.display()))
        })?;

        let mut records = self.records.lock().await;
        let record = records
            .get_mut(file_id)
            .ok_or_else(|| Error::NotFound(format!("no download with id {}", file_id)))?;

        let old_path = record.file_path.clone();
        record.file_path = new_path.to_path_buf();
        record.filename = new_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&record.filename)
            .to_string();
        record.size = metadata.len();
        record.downloaded_at = Utc::now();
        let updated = record.clone();

        if old_path != new_path
            && old_path.exists()
            && let Err(e) = tokio::fs::remove_file(&old_path).await
        {
            warn!(path = %old_path.display(), error = %e, "Failed to remove replaced file");
        }

        persist_index(&self.download_dir, &records)?;
        Ok(updated)
    }
}

/// Load the persisted record index, tolerating a missing file
fn load_index(download_dir: &Path) -> Result<HashMap<FileId, DownloadRecord>> {
    let path = download_dir.join(METADATA_FILE);
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(&path)?;
    let records: HashMap<FileId, DownloadRecord> = serde_json::from_str(&content)?;
    Ok(records)
}

/// Write the record index through a temp file so a crash never truncates it
fn persist_index(download_dir: &Path, records: &HashMap<FileId, DownloadRecord>) -> Result<()> {
    let path = download_dir.join(METADATA_FILE);
    let tmp_path = download_dir.join(format!("{}.tmp", METADATA_FILE));
    let content = serde_json::to_string_pretty(records)?;
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Derive a filename from the URL path, stripping the query string
fn filename_from_url(url: &str) -> Option<String> {
    let without_query = url.split('?').next().unwrap_or(url);
    let basename = without_query.rsplit('/').next()?;
    let sanitized = sanitize_filename(basename);
    (!sanitized.is_empty() && sanitized.contains('.')).then_some(sanitized)
}

/// Strip path separators and traversal sequences from a candidate filename
fn sanitize_filename(name: &str) -> String {
    name.replace(['/', '\\'], "_").replace("..", "_")
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
