use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;

use super::naming::sanitize_base_name;
use super::request::DownloadRequest;
use crate::errors::AppError;
use crate::resolver::{file_uri, is_network};

const EVENT_CAPACITY: usize = 64;
const MAX_NAME_ATTEMPTS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    Pending,
    Running,
    Successful,
    Failed,
}

/// Why a download failed. Codes follow the platform download manager's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Unknown,
    FileError,
    UnhandledHttpCode,
    HttpDataError,
    TooManyRedirects,
    InsufficientSpace,
    DeviceNotFound,
    CannotResume,
    FileAlreadyExists,
    Other(i32),
}

impl FailureReason {
    pub fn from_code(code: i32) -> Self {
        match code {
            1000 => FailureReason::Unknown,
            1001 => FailureReason::FileError,
            1002 => FailureReason::UnhandledHttpCode,
            1004 => FailureReason::HttpDataError,
            1005 => FailureReason::TooManyRedirects,
            1006 => FailureReason::InsufficientSpace,
            1007 => FailureReason::DeviceNotFound,
            1008 => FailureReason::CannotResume,
            1009 => FailureReason::FileAlreadyExists,
            other => FailureReason::Other(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            FailureReason::Unknown => 1000,
            FailureReason::FileError => 1001,
            FailureReason::UnhandledHttpCode => 1002,
            FailureReason::HttpDataError => 1004,
            FailureReason::TooManyRedirects => 1005,
            FailureReason::InsufficientSpace => 1006,
            FailureReason::DeviceNotFound => 1007,
            FailureReason::CannotResume => 1008,
            FailureReason::FileAlreadyExists => 1009,
            FailureReason::Other(code) => *code,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Unknown => f.write_str("ERROR_UNKNOWN"),
            FailureReason::FileError => f.write_str("ERROR_FILE_ERROR"),
            FailureReason::UnhandledHttpCode => f.write_str("ERROR_UNHANDLED_HTTP_CODE"),
            FailureReason::HttpDataError => f.write_str("ERROR_HTTP_DATA_ERROR"),
            FailureReason::TooManyRedirects => f.write_str("ERROR_TOO_MANY_REDIRECTS"),
            FailureReason::InsufficientSpace => f.write_str("ERROR_INSUFFICIENT_SPACE"),
            FailureReason::DeviceNotFound => f.write_str("ERROR_DEVICE_NOT_FOUND"),
            FailureReason::CannotResume => f.write_str("ERROR_CANNOT_RESUME"),
            FailureReason::FileAlreadyExists => f.write_str("ERROR_FILE_ALREADY_EXISTS"),
            FailureReason::Other(code) => write!(f, "Unknown Error Code ({})", code),
        }
    }
}

/// Final state of a download as reported by the download subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub id: i64,
    pub status: DownloadStatus,
    pub reason: Option<FailureReason>,
    pub local_uri: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadEvent {
    Completed(i64),
}

/// The system download service.
#[async_trait]
pub trait DownloadSubsystem: Send + Sync {
    async fn enqueue(&self, request: DownloadRequest) -> Result<i64, AppError>;

    /// `None` when the id is unknown or was removed.
    async fn query(&self, id: i64) -> Option<DownloadOutcome>;

    /// Forgets the download and deletes whatever it wrote.
    async fn remove(&self, id: i64) -> bool;

    /// Forgets the download but leaves its file in place.
    async fn forget(&self, id: i64) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<DownloadEvent>;
}

/// Fetches http(s) sources into a transient download directory.
pub struct DownloadManager {
    client: Client,
    download_dir: PathBuf,
    records: Arc<RwLock<HashMap<i64, DownloadOutcome>>>,
    next_id: AtomicI64,
    events: broadcast::Sender<DownloadEvent>,
    tracker: TaskTracker,
}

impl DownloadManager {
    pub fn new(download_dir: PathBuf, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, download_dir))
    }

    pub fn with_client(client: Client, download_dir: PathBuf) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            client,
            download_dir,
            records: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicI64::new(1),
            events,
            tracker: TaskTracker::new(),
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Waits for every running transfer to finish.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    fn update<F>(records: &RwLock<HashMap<i64, DownloadOutcome>>, id: i64, apply: F)
    where
        F: FnOnce(&mut DownloadOutcome),
    {
        if let Some(record) = records.write().get_mut(&id) {
            apply(record);
        }
    }
}

#[async_trait]
impl DownloadSubsystem for DownloadManager {
    async fn enqueue(&self, request: DownloadRequest) -> Result<i64, AppError> {
        if !is_network(&request.source) {
            return Err(AppError::Validation(format!(
                "Only http and https sources can be downloaded: {}",
                request.source
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let title = Some(request.title.clone()).filter(|t| !t.is_empty());
        let description = Some(request.description.clone()).filter(|d| !d.is_empty());

        self.records.write().insert(
            id,
            DownloadOutcome {
                id,
                status: DownloadStatus::Pending,
                reason: None,
                local_uri: None,
                title: title.clone(),
                description,
                mime_type: None,
            },
        );

        let file_name = request
            .destination
            .clone()
            .filter(|d| !d.is_empty())
            .or(title)
            .map(|name| sanitize_base_name(&name))
            .unwrap_or_else(|| format!("download_{}", id));

        let client = self.client.clone();
        let dir = self.download_dir.clone();
        let records = self.records.clone();
        let events = self.events.clone();

        log::info!(
            "[DownloadManager] Enqueued download {} from {}",
            id,
            request.source
        );

        self.tracker.spawn(async move {
            Self::update(&records, id, |r| r.status = DownloadStatus::Running);

            match transfer(&client, &request.source, &dir, &file_name).await {
                Ok((path, mime_type)) => {
                    log::info!("[DownloadManager] Download {} finished: {:?}", id, path);
                    let local_uri = file_uri(&path);
                    Self::update(&records, id, |r| {
                        r.status = DownloadStatus::Successful;
                        r.local_uri = local_uri;
                        r.mime_type = mime_type;
                    });
                }
                Err(reason) => {
                    log::warn!("[DownloadManager] Download {} failed: {}", id, reason);
                    Self::update(&records, id, |r| {
                        r.status = DownloadStatus::Failed;
                        r.reason = Some(reason);
                    });
                }
            }

            // Nobody listening is fine; the record stays queryable.
            let _ = events.send(DownloadEvent::Completed(id));
        });

        Ok(id)
    }

    async fn query(&self, id: i64) -> Option<DownloadOutcome> {
        self.records.read().get(&id).cloned()
    }

    async fn remove(&self, id: i64) -> bool {
        let Some(record) = self.records.write().remove(&id) else {
            return false;
        };

        if let Some(path) = record.local_uri.as_deref().and_then(crate::resolver::local_path) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("[DownloadManager] Failed to delete {:?}: {}", path, e);
                }
            }
        }
        log::debug!("[DownloadManager] Removed download {}", id);
        true
    }

    async fn forget(&self, id: i64) -> bool {
        self.records.write().remove(&id).is_some()
    }

    fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }
}

/// Streams `source` into a fresh file under `dir`. Returns the file and the
/// response's MIME type. A partial file is deleted on failure.
async fn transfer(
    client: &Client,
    source: &str,
    dir: &Path,
    file_name: &str,
) -> Result<(PathBuf, Option<String>), FailureReason> {
    let response = client.get(source).send().await.map_err(|e| {
        log::warn!("[DownloadManager] Request to {} failed: {}", source, e);
        if e.is_redirect() {
            FailureReason::TooManyRedirects
        } else {
            FailureReason::HttpDataError
        }
    })?;

    if !response.status().is_success() {
        log::warn!("[DownloadManager] HTTP {} for {}", response.status(), source);
        return Err(FailureReason::UnhandledHttpCode);
    }

    let mime_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .filter(|v| !v.is_empty());

    tokio::fs::create_dir_all(dir).await.map_err(|e| {
        log::error!("[DownloadManager] Cannot create {:?}: {}", dir, e);
        FailureReason::DeviceNotFound
    })?;

    let (path, mut file) = create_unique(dir, file_name).await?;

    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    let result: Result<(), FailureReason> = async {
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|_| FailureReason::HttpDataError)?;
            file.write_all(&chunk)
                .await
                .map_err(|_| FailureReason::FileError)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|_| FailureReason::FileError)
    }
    .await;

    if let Err(reason) = result {
        drop(file);
        let _ = tokio::fs::remove_file(&path).await;
        return Err(reason);
    }

    log::debug!("[DownloadManager] Wrote {} bytes to {:?}", written, path);
    Ok((path, mime_type))
}

/// Opens `name`, or `name-1`, `name-2`, ... when taken.
async fn create_unique(dir: &Path, name: &str) -> Result<(PathBuf, tokio::fs::File), FailureReason> {
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    };

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let candidate = if attempt == 0 {
            dir.join(name)
        } else {
            dir.join(format!("{}-{}{}", stem, attempt, ext))
        };

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                log::error!("[DownloadManager] Cannot create {:?}: {}", candidate, e);
                return Err(FailureReason::FileError);
            }
        }
    }

    Err(FailureReason::FileAlreadyExists)
}
