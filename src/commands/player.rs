use reqwest::Url;
use std::sync::Arc;

use crate::errors::AppError;
use crate::playback::{entry_for_item, PlayerLaunch};
use crate::playlist::PlaylistManager;
use crate::resolver::{display_name_for, ContentResolver};

const PLAYABLE_URL_SCHEMES: [&str; 3] = ["http", "https", "rtsp"];

/// Checks a typed-in stream address and turns it into a single-item launch.
pub fn validate_playback_url(
    text: &str,
    resolver: &dyn ContentResolver,
) -> Result<PlayerLaunch, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::Validation("Please enter a URL".to_string()));
    }

    let url = Url::parse(text).map_err(|e| {
        log::error!("Invalid URL format: {} ({})", text, e);
        AppError::Validation("Invalid URL format".to_string())
    })?;

    // Url lower-cases the scheme while parsing.
    if !PLAYABLE_URL_SCHEMES.contains(&url.scheme()) {
        log::warn!("Unsupported URL scheme: {}", url.scheme());
        return Err(AppError::Validation(
            "Unsupported or invalid URL scheme".to_string(),
        ));
    }

    let title = display_name_for(text, resolver);
    log::debug!("Playing from URL: {} (title: {})", text, title);
    Ok(PlayerLaunch::Single {
        locator: text.to_string(),
        title: Some(title),
    })
}

/// Builds the queue for "play this item in its playlist". Items whose
/// locator does not parse are left out; when the clicked item is one of
/// them, playback starts at the head of the queue.
pub async fn launch_for_item(
    store: &PlaylistManager,
    resolver: Arc<dyn ContentResolver>,
    playlist_id: i64,
    media_id: i64,
) -> Result<PlayerLaunch, AppError> {
    let items = store.get_media_items(playlist_id).await?;

    let (entries, start_index) = tokio::task::spawn_blocking(move || {
        let mut entries = Vec::with_capacity(items.len());
        let mut start_index = None;

        for item in &items {
            if let Err(e) = Url::parse(&item.uri) {
                log::warn!("Skipping invalid URI '{}': {}", item.uri, e);
                continue;
            }
            let Some(entry) = entry_for_item(item, resolver.as_ref()) else {
                continue;
            };
            if item.id == media_id {
                start_index = Some(entries.len());
            }
            entries.push(entry);
        }
        (entries, start_index.unwrap_or(0))
    })
    .await?;

    if entries.is_empty() {
        return Err(AppError::Playback(
            "No valid items found to play in this playlist".to_string(),
        ));
    }

    log::debug!(
        "Launching player with {} items, starting at index {}",
        entries.len(),
        start_index
    );
    Ok(PlayerLaunch::Queue {
        entries,
        start_index,
    })
}
