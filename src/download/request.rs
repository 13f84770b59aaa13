use serde::{Deserialize, Serialize};

/// Marks the target playlist inside a download description.
pub const PLAYLIST_ID_PREFIX: &str = "PlaylistID:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub source: String,
    pub title: String,
    pub description: String,
    /// File name inside the download directory. Derived from the title when absent.
    pub destination: Option<String>,
}

impl DownloadRequest {
    pub fn new(source: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            title: title.into(),
            description: String::new(),
            destination: None,
        }
    }

    /// A request whose completion lands in `playlist_id`.
    pub fn for_playlist(
        source: impl Into<String>,
        title: impl Into<String>,
        playlist_id: i64,
        note: &str,
    ) -> Self {
        let mut request = Self::new(source, title);
        request.description = playlist_description(playlist_id, note);
        request
    }

    pub fn with_destination(mut self, file_name: impl Into<String>) -> Self {
        self.destination = Some(file_name.into());
        self
    }
}

/// `PlaylistID:<id>;<note>`
pub fn playlist_description(playlist_id: i64, note: &str) -> String {
    format!("{}{};{}", PLAYLIST_ID_PREFIX, playlist_id, note)
}

/// Target playlist carried by a description. The id runs up to the first
/// `;` (or the end) and must be a positive integer.
pub fn parse_playlist_id(description: Option<&str>) -> Option<i64> {
    let Some(rest) = description.and_then(|d| d.strip_prefix(PLAYLIST_ID_PREFIX)) else {
        log::warn!("Playlist ID prefix not found in description: {:?}", description);
        return None;
    };

    let id_part = rest.split(';').next().unwrap_or(rest);
    match id_part.trim().parse::<i64>() {
        Ok(id) if id > 0 => Some(id),
        Ok(id) => {
            log::warn!("Ignoring non-positive playlist ID {} in description", id);
            None
        }
        Err(e) => {
            log::error!(
                "Could not parse playlist ID from description '{}': {}",
                rest,
                e
            );
            None
        }
    }
}
