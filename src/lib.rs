pub mod commands;
pub mod config;
pub mod database;
pub mod download;
pub mod errors;
pub mod executor;
pub mod media_controls;
pub mod playback;
pub mod playback_notifier;
pub mod playlist;
pub mod queue;
pub mod resolver;

use std::sync::Arc;
use std::time::Duration;

use config::AppConfig;
use database::DatabaseManager;
use download::{DownloadManager, DownloadReceiver, DownloadSubsystem, PrivateStorage};
use errors::AppError;
use executor::WorkerPool;
use playback::{HeadlessEngineFactory, PlaybackContext};
use playlist::PlaylistManager;
use resolver::{ContentResolver, LocalContentResolver};

/// Everything the app wires together at startup.
pub struct App {
    pub config: AppConfig,
    pub store: PlaylistManager,
    pub pool: WorkerPool,
    pub resolver: Arc<dyn ContentResolver>,
    pub downloads: Arc<DownloadManager>,
    receiver: DownloadReceiver,
}

impl App {
    pub async fn start(config: AppConfig) -> Result<Self, AppError> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.private_dir).await?;
        tokio::fs::create_dir_all(&config.download_dir).await?;

        let db = DatabaseManager::new(&config.database_path(), config.worker_threads as u32).await?;
        let store = PlaylistManager::new(db.pool.clone());
        store.ensure_defaults().await?;

        let pool = WorkerPool::new(config.worker_threads);
        let resolver: Arc<dyn ContentResolver> = Arc::new(LocalContentResolver);
        let downloads = Arc::new(DownloadManager::new(
            config.download_dir.clone(),
            Duration::from_secs(config.download_timeout_secs),
        )?);

        let subsystem: Arc<dyn DownloadSubsystem> = downloads.clone();
        let mut receiver = DownloadReceiver::new(
            subsystem,
            store.clone(),
            PrivateStorage::new(config.private_dir.clone()),
            resolver.clone(),
            pool.clone(),
        );
        receiver.listen();

        log::info!(
            "[App] Started with {} workers, data in {:?}",
            pool.size(),
            config.data_dir
        );
        Ok(Self {
            config,
            store,
            pool,
            resolver,
            downloads,
            receiver,
        })
    }

    pub fn playback_context(&self) -> PlaybackContext {
        PlaybackContext {
            store: self.store.clone(),
            pool: self.pool.clone(),
            resolver: self.resolver.clone(),
            engines: Arc::new(HeadlessEngineFactory),
            media_controls: self.config.media_controls,
        }
    }

    /// Lets running downloads finish, reconciles them and stops the workers.
    pub async fn shutdown(self) {
        self.downloads.wait_idle().await;
        self.receiver.shutdown().await;
        self.pool.drain().await;
        self.store.pool().close().await;
        log::info!("[App] Shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::{DOWNLOADS_PLAYLIST_NAME, FIRST_PLAYLIST_NAME};
    use tempfile::TempDir;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_creates_defaults_once() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::rooted_at(dir.path());

        let app = App::start(config.clone()).await.unwrap();
        let names: Vec<String> = app
            .store
            .get_playlists()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert!(names.contains(&DOWNLOADS_PLAYLIST_NAME.to_string()));
        assert!(names.contains(&FIRST_PLAYLIST_NAME.to_string()));
        assert!(config.private_dir.is_dir());
        app.shutdown().await;

        let app = App::start(config).await.unwrap();
        assert_eq!(app.store.get_playlists().await.unwrap().len(), names.len());
        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = AppConfig::rooted_at(dir.path());
        config.worker_threads = 0;
        assert!(matches!(App::start(config).await, Err(AppError::Config(_))));
    }
}
