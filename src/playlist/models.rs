use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MediaItem {
    pub id: i64,
    pub uri: String,
    pub title: Option<String>,
    pub playlist_id: i64,
}

impl MediaItem {
    /// The stored title, ignoring blanks.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref().filter(|t| !t.is_empty())
    }
}

/// A media item that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMediaItem {
    pub uri: String,
    pub title: Option<String>,
    pub playlist_id: i64,
}

impl NewMediaItem {
    pub fn new(uri: impl Into<String>, title: Option<String>, playlist_id: i64) -> Self {
        Self {
            uri: uri.into(),
            title,
            playlist_id,
        }
    }
}
