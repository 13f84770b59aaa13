pub mod controller;
pub mod engine;
pub mod session;

use std::sync::Arc;

pub use controller::{
    CurrentItem, Lifecycle, PlaybackSnapshot, PlayerController, PlayerLaunch, SavedPlayerState,
};
pub use engine::{
    EngineEvent, EngineFactory, EngineListener, HeadlessEngine, HeadlessEngineFactory,
    PlaybackEngine,
};
pub use session::{PlaybackSession, SessionCommand, SessionState};

use crate::executor::WorkerPool;
use crate::playlist::{MediaItem, PlaylistManager};
use crate::queue::QueueEntry;
use crate::resolver::{display_name_for, ContentResolver};

/// What a playback owner borrows from the rest of the app.
#[derive(Clone)]
pub struct PlaybackContext {
    pub store: PlaylistManager,
    pub pool: WorkerPool,
    pub resolver: Arc<dyn ContentResolver>,
    pub engines: Arc<dyn EngineFactory>,
    /// Publish an OS media session while playing.
    pub media_controls: bool,
}

/// Queue entry for a stored item, titled by the item or by its locator.
/// Items without a locator are skipped.
pub fn entry_for_item(item: &MediaItem, resolver: &dyn ContentResolver) -> Option<QueueEntry> {
    if item.uri.is_empty() {
        log::warn!("Skipping item with empty URI for media ID: {}", item.id);
        return None;
    }

    let title = match item.title() {
        Some(title) => title.to_string(),
        None => display_name_for(&item.uri, resolver),
    };

    Some(QueueEntry {
        media_id: Some(item.id),
        locator: item.uri.clone(),
        title,
    })
}
