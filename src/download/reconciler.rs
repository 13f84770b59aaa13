use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::manager::{DownloadOutcome, DownloadStatus};
use super::naming::{cap_title, private_file_name, title_or_default};
use super::request::parse_playlist_id;
use crate::playlist::{NewMediaItem, PlaylistManager, DOWNLOADS_PLAYLIST_NAME};
use crate::resolver::{file_uri, ContentResolver};

const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Debug, Clone)]
pub struct PrivateStorage {
    root: PathBuf,
}

impl PrivateStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Never overwrites: a taken name gets `_N` ahead of the extension.
    pub fn create_new(&self, file_name: &str) -> io::Result<(PathBuf, File)> {
        fs::create_dir_all(&self.root)?;

        let (stem, ext) = match file_name.rfind('.') {
            Some(idx) if idx > 0 => (&file_name[..idx], &file_name[idx..]),
            _ => (file_name, ""),
        };

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = if attempt == 0 {
                self.root.join(file_name)
            } else {
                self.root.join(format!("{}_{}{}", stem, attempt, ext))
            };

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("No free name for {} in {:?}", file_name, self.root),
        ))
    }

    pub fn remove(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => log::debug!("Deleted copied file: {:?}", path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to delete copied file {:?}: {}", path, e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    Added {
        media_id: i64,
        playlist_id: i64,
        uri: String,
    },
    Discarded,
    Abandoned(String),
}

/// Copies a finished download into private storage and records it in the
/// playlist named by its description, or in "Downloads".
pub async fn reconcile(
    outcome: DownloadOutcome,
    store: &PlaylistManager,
    storage: &PrivateStorage,
    resolver: Arc<dyn ContentResolver>,
) -> Reconciliation {
    let title = title_or_default(outcome.id, outcome.title.as_deref());

    if outcome.status != DownloadStatus::Successful {
        log::warn!(
            "Download failed for ID: {} ('{}'). Status: {:?}, Reason: {}",
            outcome.id,
            title,
            outcome.status,
            outcome
                .reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        return Reconciliation::Discarded;
    }

    let Some(source) = outcome.local_uri.clone().filter(|u| !u.is_empty()) else {
        log::error!(
            "Download {} ('{}') succeeded but has no local file",
            outcome.id,
            title
        );
        return Reconciliation::Discarded;
    };

    let target = parse_playlist_id(outcome.description.as_deref());
    log::info!(
        "Download successful: '{}' Temp URI: {} Target playlist from description: {:?}",
        title,
        source,
        target
    );

    let file_name = private_file_name(
        &title,
        outcome.mime_type.as_deref(),
        chrono::Utc::now().timestamp_millis(),
    );

    let copy_storage = storage.clone();
    let copied = tokio::task::spawn_blocking(move || {
        copy_payload(resolver.as_ref(), &source, &copy_storage, &file_name)
    })
    .await;

    let path = match copied {
        Ok(Ok(path)) => path,
        Ok(Err(e)) => {
            log::error!("Error copying download {}: {}", outcome.id, e);
            return Reconciliation::Abandoned(e.to_string());
        }
        Err(e) => {
            log::error!("Copy task for download {} failed: {}", outcome.id, e);
            return Reconciliation::Abandoned(e.to_string());
        }
    };

    let Some(uri) = file_uri(&path) else {
        storage.remove(&path);
        return Reconciliation::Abandoned(format!("No file URI for {:?}", path));
    };

    let playlist_id = match resolve_playlist(store, target).await {
        Ok(id) => id,
        Err(e) => {
            log::error!("Failed to determine a playlist for download {}: {}", outcome.id, e);
            storage.remove(&path);
            return Reconciliation::Abandoned(e);
        }
    };

    let item = NewMediaItem::new(uri.clone(), Some(cap_title(&title)), playlist_id);
    match store.insert_media_item(&item).await {
        Ok(media_id) => {
            log::info!(
                "DB entry added for '{}' (URI: {}) to playlist ID: {}",
                title,
                uri,
                playlist_id
            );
            Reconciliation::Added {
                media_id,
                playlist_id,
                uri,
            }
        }
        Err(e) => {
            log::error!("Error inserting downloaded media item: {}", e);
            storage.remove(&path);
            Reconciliation::Abandoned(e)
        }
    }
}

fn copy_payload(
    resolver: &dyn ContentResolver,
    source: &str,
    storage: &PrivateStorage,
    file_name: &str,
) -> io::Result<PathBuf> {
    let mut reader = resolver.open(source)?;
    let (path, mut file) = storage.create_new(file_name)?;

    let copied = io::copy(&mut reader, &mut file).and_then(|bytes| {
        file.sync_all()?;
        Ok(bytes)
    });

    match copied {
        Ok(bytes) => {
            log::info!("File copied successfully ({} bytes) to {:?}", bytes, path);
            Ok(path)
        }
        Err(e) => {
            drop(file);
            storage.remove(&path);
            Err(e)
        }
    }
}

async fn resolve_playlist(store: &PlaylistManager, target: Option<i64>) -> Result<i64, String> {
    if let Some(id) = target {
        match store.get_playlist_by_id(id).await {
            Ok(Some(playlist)) => return Ok(playlist.id),
            Ok(None) => log::warn!(
                "Target playlist ID {} not found. Falling back to '{}'",
                id,
                DOWNLOADS_PLAYLIST_NAME
            ),
            Err(e) => log::warn!(
                "Lookup of playlist {} failed ({}). Falling back to '{}'",
                id,
                e,
                DOWNLOADS_PLAYLIST_NAME
            ),
        }
    }

    store.find_or_create_playlist(DOWNLOADS_PLAYLIST_NAME).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;
    use crate::download::manager::FailureReason;
    use crate::resolver::LocalContentResolver;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: PlaylistManager,
        storage: PrivateStorage,
        source_uri: String,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = DatabaseManager::in_memory().await.unwrap();
        let store = PlaylistManager::new(db.pool.clone());

        let source = dir.path().join("transient.bin");
        File::create(&source).unwrap().write_all(b"payload bytes").unwrap();

        Fixture {
            storage: PrivateStorage::new(dir.path().join("files")),
            source_uri: file_uri(&source).unwrap(),
            store,
            _dir: dir,
        }
    }

    fn outcome(f: &Fixture, description: Option<&str>, mime: Option<&str>) -> DownloadOutcome {
        DownloadOutcome {
            id: 11,
            status: DownloadStatus::Successful,
            reason: None,
            local_uri: Some(f.source_uri.clone()),
            title: Some("Great Track.mp3".to_string()),
            description: description.map(str::to_string),
            mime_type: mime.map(str::to_string),
        }
    }

    fn private_files(storage: &PrivateStorage) -> Vec<PathBuf> {
        match fs::read_dir(storage.root()) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn run(f: &Fixture, outcome: DownloadOutcome) -> Reconciliation {
        reconcile(outcome, &f.store, &f.storage, Arc::new(LocalContentResolver)).await
    }

    async fn downloads_playlists(store: &PlaylistManager) -> usize {
        store
            .get_playlists()
            .await
            .unwrap()
            .iter()
            .filter(|p| p.name == DOWNLOADS_PLAYLIST_NAME)
            .count()
    }

    #[tokio::test]
    async fn test_described_playlist_receives_item() {
        let f = fixture().await;
        for name in ["a", "b", "c", "d", "e", "f", "g"] {
            f.store.insert_playlist(name).await.unwrap();
        }
        let seventh = f.store.get_playlist_by_name("g").await.unwrap().unwrap();
        assert_eq!(seventh.id, 7);

        let result = run(
            &f,
            outcome(&f, Some("PlaylistID:7;Lab4 Media Download"), Some("audio/mpeg")),
        )
        .await;

        let Reconciliation::Added { playlist_id, uri, .. } = result else {
            panic!("expected an added item, got {:?}", result);
        };
        assert_eq!(playlist_id, 7);
        assert!(uri.ends_with("_Great_Track.mp3.mp3"));

        let items = f.store.get_media_items(7).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title(), Some("Great Track.mp3"));

        let copied = crate::resolver::local_path(&items[0].uri).unwrap();
        assert!(copied.starts_with(f.storage.root()));
        assert_eq!(fs::read(copied).unwrap(), b"payload bytes");
        assert_eq!(downloads_playlists(&f.store).await, 0);
    }

    #[tokio::test]
    async fn test_missing_playlist_falls_back_to_downloads() {
        let f = fixture().await;
        let result = run(&f, outcome(&f, Some("PlaylistID:99;Lab4 Media Download"), None)).await;

        let Reconciliation::Added { playlist_id, uri, .. } = result else {
            panic!("expected an added item, got {:?}", result);
        };
        let downloads = f
            .store
            .get_playlist_by_name(DOWNLOADS_PLAYLIST_NAME)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(playlist_id, downloads.id);
        assert!(uri.ends_with(".file"));
    }

    #[tokio::test]
    async fn test_downloads_playlist_is_reused() {
        let f = fixture().await;
        let existing = f.store.insert_playlist(DOWNLOADS_PLAYLIST_NAME).await.unwrap().unwrap();

        for description in [None, Some("garbage"), Some("PlaylistID:x;y")] {
            let result = run(&f, outcome(&f, description, Some("audio/ogg"))).await;
            assert!(matches!(
                result,
                Reconciliation::Added { playlist_id, .. } if playlist_id == existing
            ));
        }

        assert_eq!(downloads_playlists(&f.store).await, 1);
        assert_eq!(f.store.get_media_items(existing).await.unwrap().len(), 3);
        assert_eq!(private_files(&f.storage).len(), 3);
    }

    #[tokio::test]
    async fn test_missing_title_gets_default() {
        let f = fixture().await;
        let mut finished = outcome(&f, None, Some("video/mp4"));
        finished.title = None;

        let Reconciliation::Added { playlist_id, uri, .. } = run(&f, finished).await else {
            panic!("expected an added item");
        };
        assert!(uri.ends_with("_Downloaded_File_11.mp4"));
        let items = f.store.get_media_items(playlist_id).await.unwrap();
        assert_eq!(items[0].title(), Some("Downloaded File 11"));
    }

    #[tokio::test]
    async fn test_failed_status_is_discarded() {
        let f = fixture().await;
        let mut failed = outcome(&f, Some("PlaylistID:1;x"), Some("audio/mpeg"));
        failed.status = DownloadStatus::Failed;
        failed.reason = Some(FailureReason::HttpDataError);

        assert_eq!(run(&f, failed).await, Reconciliation::Discarded);
        assert!(private_files(&f.storage).is_empty());
        assert!(f.store.get_playlists().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_local_uri_is_discarded() {
        let f = fixture().await;
        let mut finished = outcome(&f, None, Some("audio/mpeg"));
        finished.local_uri = None;

        assert_eq!(run(&f, finished).await, Reconciliation::Discarded);
        assert!(private_files(&f.storage).is_empty());
    }

    struct BrokenStream {
        sent: bool,
    }

    impl Read for BrokenStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "source went away"));
            }
            self.sent = true;
            buf[0] = b'x';
            Ok(1)
        }
    }

    struct BrokenResolver;

    impl ContentResolver for BrokenResolver {
        fn display_name(&self, _locator: &str) -> Option<String> {
            None
        }

        fn open(&self, _locator: &str) -> io::Result<Box<dyn Read + Send>> {
            Ok(Box::new(BrokenStream { sent: false }))
        }
    }

    #[tokio::test]
    async fn test_copy_failure_leaves_nothing() {
        let f = fixture().await;
        let result = reconcile(
            outcome(&f, None, Some("audio/mpeg")),
            &f.store,
            &f.storage,
            Arc::new(BrokenResolver),
        )
        .await;

        assert!(matches!(result, Reconciliation::Abandoned(_)));
        assert!(private_files(&f.storage).is_empty());
        assert!(f.store.get_playlists().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_source_leaves_nothing() {
        let f = fixture().await;
        let mut finished = outcome(&f, None, Some("audio/mpeg"));
        finished.local_uri = Some("file:///definitely/not/here.bin".to_string());

        assert!(matches!(run(&f, finished).await, Reconciliation::Abandoned(_)));
        assert!(private_files(&f.storage).is_empty());
    }

    #[tokio::test]
    async fn test_playlist_lookup_failure_deletes_copy() {
        let f = fixture().await;
        f.store.pool().close().await;

        let result = run(&f, outcome(&f, Some("PlaylistID:1;x"), Some("audio/mpeg"))).await;
        assert!(matches!(result, Reconciliation::Abandoned(_)));
        assert!(private_files(&f.storage).is_empty());
    }

    #[tokio::test]
    async fn test_insert_failure_deletes_copy() {
        let f = fixture().await;
        let target = f.store.insert_playlist("Keepers").await.unwrap().unwrap();
        sqlx::query("DROP TABLE media_items")
            .execute(f.store.pool())
            .await
            .unwrap();

        let description = format!("PlaylistID:{};Media Download", target);
        let result = run(&f, outcome(&f, Some(&description), Some("audio/mpeg"))).await;

        assert!(matches!(result, Reconciliation::Abandoned(_)));
        assert!(private_files(&f.storage).is_empty());
        assert!(f.store.get_playlist_by_id(target).await.unwrap().is_some());
        assert_eq!(downloads_playlists(&f.store).await, 0);
    }

    #[test]
    fn test_create_new_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let storage = PrivateStorage::new(dir.path());
        let (first, _) = storage.create_new("media_1_a.mp3").unwrap();
        let (second, _) = storage.create_new("media_1_a.mp3").unwrap();
        assert_ne!(first, second);
        assert_eq!(second.file_name().unwrap(), "media_1_a_1.mp3");
    }
}
