use super::live::{spawn_live_query, LiveQuery};
use super::models::{MediaItem, NewMediaItem, Playlist};
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tokio::sync::watch;

pub const DOWNLOADS_PLAYLIST_NAME: &str = "Downloads";
pub const FIRST_PLAYLIST_NAME: &str = "My First Playlist";

const SCHEMA_VERSION: i64 = 1;

#[derive(Clone)]
pub struct PlaylistManager {
    pool: Pool<Sqlite>,
    changes: Arc<watch::Sender<u64>>,
}

impl PlaylistManager {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            pool,
            changes: Arc::new(changes),
        }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    fn notify_changed(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }

    // Guarded by user_version so deleted defaults stay deleted.
    pub async fn ensure_defaults(&self) -> Result<bool, String> {
        let mut tx = self.pool.begin().await.map_err(|e| e.to_string())?;

        let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| e.to_string())?;

        if version >= SCHEMA_VERSION {
            return Ok(false);
        }

        for name in [FIRST_PLAYLIST_NAME, DOWNLOADS_PLAYLIST_NAME] {
            sqlx::query("INSERT OR IGNORE INTO playlists (playlist_name) VALUES (?)")
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.to_string())?;
        }

        sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
            .execute(&mut *tx)
            .await
            .map_err(|e| e.to_string())?;

        tx.commit().await.map_err(|e| e.to_string())?;
        log::info!("Created default playlists");
        self.notify_changed();
        Ok(true)
    }

    pub async fn insert_playlist(&self, name: &str) -> Result<Option<i64>, String> {
        let result = sqlx::query("INSERT OR IGNORE INTO playlists (playlist_name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        self.notify_changed();
        Ok(Some(result.last_insert_rowid()))
    }

    pub async fn get_playlists(&self) -> Result<Vec<Playlist>, String> {
        sqlx::query_as::<_, Playlist>(
            "SELECT playlist_id AS id, playlist_name AS name FROM playlists ORDER BY playlist_name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.to_string())
    }

    pub async fn get_playlist_by_id(&self, id: i64) -> Result<Option<Playlist>, String> {
        sqlx::query_as::<_, Playlist>(
            "SELECT playlist_id AS id, playlist_name AS name FROM playlists WHERE playlist_id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.to_string())
    }

    pub async fn get_playlist_by_name(&self, name: &str) -> Result<Option<Playlist>, String> {
        sqlx::query_as::<_, Playlist>(
            r#"
            SELECT playlist_id AS id, playlist_name AS name
            FROM playlists
            WHERE playlist_name = ?
            ORDER BY playlist_id ASC
            LIMIT 1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.to_string())
    }

    // Not atomic: racing callers can both insert.
    pub async fn find_or_create_playlist(&self, name: &str) -> Result<i64, String> {
        if let Some(existing) = self.get_playlist_by_name(name).await? {
            return Ok(existing.id);
        }

        match self.insert_playlist(name).await? {
            Some(id) => {
                log::info!("Created playlist '{}' with ID: {}", name, id);
                Ok(id)
            }
            None => self
                .get_playlist_by_name(name)
                .await?
                .map(|p| p.id)
                .ok_or_else(|| format!("Failed to create playlist '{}'", name)),
        }
    }

    pub async fn delete_playlist(&self, id: i64) -> Result<bool, String> {
        let result = sqlx::query("DELETE FROM playlists WHERE playlist_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            self.notify_changed();
        }
        Ok(deleted)
    }

    pub async fn insert_media_item(&self, item: &NewMediaItem) -> Result<i64, String> {
        let result = sqlx::query(
            "INSERT OR REPLACE INTO media_items (media_uri, media_title, playlist_creator_id) VALUES (?, ?, ?)",
        )
        .bind(&item.uri)
        .bind(&item.title)
        .bind(item.playlist_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;

        self.notify_changed();
        Ok(result.last_insert_rowid())
    }

    pub async fn get_media_items(&self, playlist_id: i64) -> Result<Vec<MediaItem>, String> {
        sqlx::query_as::<_, MediaItem>(
            r#"
            SELECT
                media_id AS id,
                media_uri AS uri,
                media_title AS title,
                playlist_creator_id AS playlist_id
            FROM media_items
            WHERE playlist_creator_id = ?
            ORDER BY media_id ASC
            "#,
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.to_string())
    }

    pub async fn delete_media_item(&self, id: i64) -> Result<bool, String> {
        let result = sqlx::query("DELETE FROM media_items WHERE media_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            self.notify_changed();
        }
        Ok(deleted)
    }

    pub async fn observe_playlists(&self) -> Result<LiveQuery<Vec<Playlist>>, String> {
        let changes = self.changes.subscribe();
        let initial = self.get_playlists().await?;
        let manager = self.clone();

        Ok(spawn_live_query(
            changes,
            initial,
            "playlists".to_string(),
            move || {
                let manager = manager.clone();
                async move { manager.get_playlists().await }
            },
        ))
    }

    pub async fn observe_media_items(
        &self,
        playlist_id: i64,
    ) -> Result<LiveQuery<Vec<MediaItem>>, String> {
        let changes = self.changes.subscribe();
        let initial = self.get_media_items(playlist_id).await?;
        let manager = self.clone();

        Ok(spawn_live_query(
            changes,
            initial,
            format!("media items of playlist {}", playlist_id),
            move || {
                let manager = manager.clone();
                async move { manager.get_media_items(playlist_id).await }
            },
        ))
    }
}
