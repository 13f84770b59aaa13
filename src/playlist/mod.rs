pub mod live;
pub mod manager;
pub mod models;

pub use live::LiveQuery;
pub use manager::{PlaylistManager, DOWNLOADS_PLAYLIST_NAME, FIRST_PLAYLIST_NAME};
pub use models::{MediaItem, NewMediaItem, Playlist};
