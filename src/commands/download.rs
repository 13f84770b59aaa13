use std::sync::Arc;

use crate::download::{DownloadRequest, DownloadSubsystem};
use crate::errors::AppError;
use crate::playback::controller::DOWNLOAD_NOTE;
use crate::playlist::{PlaylistManager, DOWNLOADS_PLAYLIST_NAME};
use crate::resolver::{display_name_for, is_network, ContentResolver};

/// Queues `url` for download. The finished file is added to `playlist_id`
/// when given, otherwise to the Downloads playlist.
pub async fn start_download(
    downloads: &dyn DownloadSubsystem,
    store: &PlaylistManager,
    resolver: Arc<dyn ContentResolver>,
    url: &str,
    playlist_id: Option<i64>,
) -> Result<i64, AppError> {
    let url = url.trim();
    if !is_network(url) {
        return Err(AppError::Validation(format!(
            "Only http and https URLs can be downloaded: {}",
            url
        )));
    }

    let target = match playlist_id {
        Some(id) => store
            .get_playlist_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Playlist {}", id)))?
            .id,
        None => store.find_or_create_playlist(DOWNLOADS_PLAYLIST_NAME).await?,
    };

    let file_name = display_name_for(url, resolver.as_ref());
    let request = DownloadRequest::for_playlist(url, &file_name, target, DOWNLOAD_NOTE)
        .with_destination(file_name.clone());
    let id = downloads.enqueue(request).await?;

    log::info!(
        "Download {} started: {} -> playlist {}",
        id,
        file_name,
        target
    );
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;
    use crate::download::parse_playlist_id;
    use crate::download::test_support::ScriptedDownloads;
    use crate::resolver::LocalContentResolver;

    async fn store() -> PlaylistManager {
        let db = DatabaseManager::in_memory().await.unwrap();
        PlaylistManager::new(db.pool.clone())
    }

    #[tokio::test]
    async fn test_download_defaults_to_downloads_playlist() {
        let store = store().await;
        let downloads = ScriptedDownloads::new();

        let id = start_download(
            &downloads,
            &store,
            Arc::new(LocalContentResolver),
            "https://example.com/audio/Episode%2012.mp3",
            None,
        )
        .await
        .unwrap();
        assert_eq!(id, 1);

        let requests = downloads.enqueued();
        let downloads_id = store
            .get_playlist_by_name(DOWNLOADS_PLAYLIST_NAME)
            .await
            .unwrap()
            .unwrap()
            .id;
        assert_eq!(requests[0].title, "Episode 12.mp3");
        assert_eq!(requests[0].destination.as_deref(), Some("Episode 12.mp3"));
        assert_eq!(
            parse_playlist_id(Some(&requests[0].description)),
            Some(downloads_id)
        );
    }

    #[tokio::test]
    async fn test_download_into_named_playlist() {
        let store = store().await;
        let target = store.insert_playlist("Podcasts").await.unwrap().unwrap();
        let downloads = ScriptedDownloads::new();
        let resolver: Arc<dyn ContentResolver> = Arc::new(LocalContentResolver);

        start_download(&downloads, &store, resolver.clone(), "http://example.com/a.mp3", Some(target))
            .await
            .unwrap();
        assert_eq!(
            parse_playlist_id(Some(&downloads.enqueued()[0].description)),
            Some(target)
        );

        assert!(matches!(
            start_download(&downloads, &store, resolver.clone(), "http://example.com/a.mp3", Some(404)).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            start_download(&downloads, &store, resolver, "rtsp://example.com/live", None).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(downloads.enqueued().len(), 1);
    }
}
