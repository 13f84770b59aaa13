use std::path::Path;
use std::sync::Arc;

use crate::errors::AppError;
use crate::playlist::{MediaItem, NewMediaItem, Playlist, PlaylistManager};
use crate::resolver::{
    can_be_saved, display_name_for, file_uri, is_network, local_path, read_tag_title, scheme_of,
    ContentResolver,
};

pub async fn get_playlists(store: &PlaylistManager) -> Result<Vec<Playlist>, AppError> {
    Ok(store.get_playlists().await?)
}

pub async fn create_playlist(store: &PlaylistManager, name: &str) -> Result<Playlist, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Playlist name cannot be empty".to_string()));
    }

    // Not atomic with the insert; two racing creations can both succeed.
    if store.get_playlist_by_name(name).await?.is_some() {
        return Err(AppError::PlaylistExists(name.to_string()));
    }

    let id = store
        .insert_playlist(name)
        .await?
        .ok_or_else(|| AppError::Database(format!("Playlist '{}' was not created", name)))?;

    log::info!("Created playlist '{}' with ID: {}", name, id);
    Ok(Playlist {
        id,
        name: name.to_string(),
    })
}

pub async fn delete_playlist(store: &PlaylistManager, id: i64) -> Result<(), AppError> {
    if !store.delete_playlist(id).await? {
        return Err(AppError::NotFound(format!("Playlist {}", id)));
    }
    Ok(())
}

async fn require_playlist(store: &PlaylistManager, id: i64) -> Result<Playlist, AppError> {
    store
        .get_playlist_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Playlist {}", id)))
}

pub async fn get_media_items(
    store: &PlaylistManager,
    playlist_id: i64,
) -> Result<Vec<MediaItem>, AppError> {
    require_playlist(store, playlist_id).await?;
    Ok(store.get_media_items(playlist_id).await?)
}

pub async fn delete_media_item(store: &PlaylistManager, id: i64) -> Result<(), AppError> {
    if !store.delete_media_item(id).await? {
        return Err(AppError::NotFound(format!("Media item {}", id)));
    }
    Ok(())
}

/// Adds a picked file. Bare paths are turned into `file://` URIs; local
/// files are titled from their tags when they have one.
pub async fn add_local_file(
    store: &PlaylistManager,
    resolver: Arc<dyn ContentResolver>,
    playlist_id: i64,
    locator: &str,
) -> Result<MediaItem, AppError> {
    let locator = locator.trim().to_string();
    if locator.is_empty() {
        return Err(AppError::Validation("No file selected".to_string()));
    }
    require_playlist(store, playlist_id).await?;

    let (uri, title) = tokio::task::spawn_blocking(move || -> Result<(String, String), AppError> {
        let uri = if scheme_of(&locator).is_some() {
            locator
        } else {
            let path = std::fs::canonicalize(Path::new(&locator))
                .map_err(|e| AppError::FileSystem(format!("{}: {}", locator, e)))?;
            file_uri(&path)
                .ok_or_else(|| AppError::Validation(format!("Not a file path: {}", locator)))?
        };

        if !can_be_saved(&uri) {
            return Err(AppError::Validation(format!(
                "Unsupported media location: {}",
                uri
            )));
        }

        let title = local_path(&uri)
            .and_then(|path| read_tag_title(&path))
            .unwrap_or_else(|| display_name_for(&uri, resolver.as_ref()));
        Ok((uri, title))
    })
    .await??;

    insert(store, uri, title, playlist_id).await
}

/// Adds a remote stream. Only http and https can be stored.
pub async fn add_url(
    store: &PlaylistManager,
    resolver: Arc<dyn ContentResolver>,
    playlist_id: i64,
    url: &str,
) -> Result<MediaItem, AppError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(AppError::Validation("Please enter a URL".to_string()));
    }
    if !is_network(url) {
        return Err(AppError::Validation(format!(
            "Only http and https URLs can be added: {}",
            url
        )));
    }
    require_playlist(store, playlist_id).await?;

    let title = display_name_for(url, resolver.as_ref());
    insert(store, url.to_string(), title, playlist_id).await
}

async fn insert(
    store: &PlaylistManager,
    uri: String,
    title: String,
    playlist_id: i64,
) -> Result<MediaItem, AppError> {
    let item = NewMediaItem::new(uri, Some(title), playlist_id);
    let id = store.insert_media_item(&item).await.map_err(|e| {
        log::error!("Error inserting media item into database: {}", e);
        AppError::Database(e)
    })?;

    log::debug!("Added '{}' to playlist {}", item.uri, playlist_id);
    Ok(MediaItem {
        id,
        uri: item.uri,
        title: item.title,
        playlist_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;
    use crate::resolver::LocalContentResolver;
    use tempfile::TempDir;

    async fn store() -> PlaylistManager {
        let db = DatabaseManager::in_memory().await.unwrap();
        PlaylistManager::new(db.pool.clone())
    }

    #[tokio::test]
    async fn test_create_playlist_validates_name() {
        let store = store().await;
        let created = create_playlist(&store, "  Gym  ").await.unwrap();
        assert_eq!(created.name, "Gym");

        assert!(matches!(
            create_playlist(&store, "   ").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            create_playlist(&store, "Gym").await,
            Err(AppError::PlaylistExists(name)) if name == "Gym"
        ));
        assert_eq!(get_playlists(&store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_playlist_removes_only_its_items() {
        let store = store().await;
        let keep = create_playlist(&store, "Keep").await.unwrap();
        let doomed = create_playlist(&store, "Drop").await.unwrap();
        let resolver: Arc<dyn ContentResolver> = Arc::new(LocalContentResolver);

        add_url(&store, resolver.clone(), keep.id, "https://example.com/a.mp3").await.unwrap();
        add_url(&store, resolver.clone(), doomed.id, "https://example.com/b.mp3").await.unwrap();
        add_url(&store, resolver, doomed.id, "https://example.com/c.mp3").await.unwrap();

        delete_playlist(&store, doomed.id).await.unwrap();
        assert_eq!(get_media_items(&store, keep.id).await.unwrap().len(), 1);
        assert!(matches!(
            get_media_items(&store, doomed.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            delete_playlist(&store, doomed.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_url_rules() {
        let store = store().await;
        let playlist = create_playlist(&store, "Streams").await.unwrap();
        let resolver: Arc<dyn ContentResolver> = Arc::new(LocalContentResolver);

        let item = add_url(
            &store,
            resolver.clone(),
            playlist.id,
            " https://example.com/radio/Night%20Show.mp3?k=1 ",
        )
        .await
        .unwrap();
        assert_eq!(item.title(), Some("Night Show.mp3"));

        assert!(matches!(
            add_url(&store, resolver.clone(), playlist.id, "rtsp://example.com/live").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            add_url(&store, resolver, 999, "https://example.com/a.mp3").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_local_file_from_bare_path() {
        let store = store().await;
        let playlist = create_playlist(&store, "Local").await.unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("voice memo.wav");
        std::fs::write(&path, b"not really audio").unwrap();

        let item = add_local_file(
            &store,
            Arc::new(LocalContentResolver),
            playlist.id,
            path.to_str().unwrap(),
        )
        .await
        .unwrap();

        assert!(item.uri.starts_with("file://"));
        assert_eq!(item.title(), Some("voice memo.wav"));
        assert_eq!(local_path(&item.uri).unwrap(), std::fs::canonicalize(&path).unwrap());

        delete_media_item(&store, item.id).await.unwrap();
        assert!(get_media_items(&store, playlist.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_local_file_rejects_missing_and_unsupported() {
        let store = store().await;
        let playlist = create_playlist(&store, "Local").await.unwrap();
        let resolver: Arc<dyn ContentResolver> = Arc::new(LocalContentResolver);

        assert!(matches!(
            add_local_file(&store, resolver.clone(), playlist.id, "/no/such/file.mp3").await,
            Err(AppError::FileSystem(_))
        ));
        assert!(matches!(
            add_local_file(&store, resolver, playlist.id, "rtsp://example.com/live").await,
            Err(AppError::Validation(_))
        ));
    }
}
