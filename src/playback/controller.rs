//! Foreground player: owns an engine for as long as it is visible, keeps a
//! snapshot of where playback was, and offers download / add-to-playlist
//! actions for whatever is playing.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::engine::{EngineEvent, EngineListener, PlaybackEngine};
use super::PlaybackContext;
use crate::commands::Notice;
use crate::config::ReleasePolicy;
use crate::download::{DownloadRequest, DownloadSubsystem};
use crate::errors::AppError;
use crate::executor::MainHandle;
use crate::playlist::{NewMediaItem, Playlist, DOWNLOADS_PLAYLIST_NAME};
use crate::queue::QueueEntry;
use crate::resolver::{can_be_saved, display_name_for, is_network, UNKNOWN_MEDIA_TITLE};

/// Free text after the playlist tag in download descriptions.
pub const DOWNLOAD_NOTE: &str = "Media Download";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    Created,
    Started,
    Resumed,
    Paused,
    Stopped,
    Destroyed,
}

/// What the player was opened with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerLaunch {
    Queue {
        entries: Vec<QueueEntry>,
        start_index: usize,
    },
    Single {
        locator: String,
        title: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub position_ms: u64,
    pub play_when_ready: bool,
    pub queue_index: usize,
    pub shuffle: bool,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self {
            position_ms: 0,
            play_when_ready: true,
            queue_index: 0,
            shuffle: false,
        }
    }
}

impl PlaybackSnapshot {
    pub fn position(&self) -> Duration {
        Duration::from_millis(self.position_ms)
    }
}

/// Everything needed to rebuild the player after the process goes away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPlayerState {
    pub snapshot: PlaybackSnapshot,
    pub queue: Vec<QueueEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentItem {
    pub index: Option<usize>,
    pub locator: String,
    pub title: String,
    pub is_network: bool,
    pub can_be_saved: bool,
}

impl CurrentItem {
    fn from_entry(index: Option<usize>, entry: &QueueEntry, ctx: &PlaybackContext) -> Self {
        let title = if entry.title.is_empty() {
            display_name_for(&entry.locator, ctx.resolver.as_ref())
        } else {
            entry.title.clone()
        };

        Self {
            index,
            locator: entry.locator.clone(),
            title,
            is_network: is_network(&entry.locator),
            can_be_saved: can_be_saved(&entry.locator),
        }
    }
}

pub struct PlayerController {
    ctx: PlaybackContext,
    downloads: Arc<dyn DownloadSubsystem>,
    policy: ReleasePolicy,
    main: MainHandle<PlayerController>,
    lifecycle: Lifecycle,
    queue: Vec<QueueEntry>,
    snapshot: PlaybackSnapshot,
    engine: Option<Box<dyn PlaybackEngine>>,
    engine_generation: u64,
    // The engine is paused because we left the foreground, not because the
    // user paused it; the snapshot keeps the user's play-when-ready.
    paused_by_lifecycle: bool,
    current: Option<CurrentItem>,
    playlist_choices: Option<Vec<Playlist>>,
    notices: Vec<Notice>,
}

impl PlayerController {
    pub fn create(
        ctx: PlaybackContext,
        downloads: Arc<dyn DownloadSubsystem>,
        policy: ReleasePolicy,
        main: MainHandle<PlayerController>,
        launch: Option<PlayerLaunch>,
    ) -> Result<Self, AppError> {
        let (queue, start_index) = match launch {
            Some(PlayerLaunch::Queue {
                entries,
                start_index,
            }) => (entries, start_index),
            Some(PlayerLaunch::Single { locator, title }) if !locator.is_empty() => {
                let title = title
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| display_name_for(&locator, ctx.resolver.as_ref()));
                (vec![QueueEntry::new(locator, title)], 0)
            }
            _ => (Vec::new(), 0),
        };

        let snapshot = PlaybackSnapshot {
            queue_index: start_index,
            ..PlaybackSnapshot::default()
        };
        Self::build(ctx, downloads, policy, main, queue, snapshot)
    }

    /// Rebuilds a controller from [`PlayerController::save_state`] output.
    pub fn restore(
        ctx: PlaybackContext,
        downloads: Arc<dyn DownloadSubsystem>,
        policy: ReleasePolicy,
        main: MainHandle<PlayerController>,
        saved: &str,
    ) -> Result<Self, AppError> {
        let state: SavedPlayerState = serde_json::from_str(saved)?;
        log::debug!(
            "[PlayerController] Restoring state: Position={}ms, PlayWhenReady={}, Index={}, Shuffle={}",
            state.snapshot.position_ms,
            state.snapshot.play_when_ready,
            state.snapshot.queue_index,
            state.snapshot.shuffle
        );
        Self::build(ctx, downloads, policy, main, state.queue, state.snapshot)
    }

    fn build(
        ctx: PlaybackContext,
        downloads: Arc<dyn DownloadSubsystem>,
        policy: ReleasePolicy,
        main: MainHandle<PlayerController>,
        queue: Vec<QueueEntry>,
        mut snapshot: PlaybackSnapshot,
    ) -> Result<Self, AppError> {
        if queue.is_empty() {
            log::error!("[PlayerController] No media to play");
            return Err(AppError::Validation("Media URI not found".to_string()));
        }
        if snapshot.queue_index >= queue.len() {
            snapshot.queue_index = 0;
        }

        let current = Some(CurrentItem::from_entry(
            Some(snapshot.queue_index),
            &queue[snapshot.queue_index],
            &ctx,
        ));

        Ok(Self {
            ctx,
            downloads,
            policy,
            main,
            lifecycle: Lifecycle::Created,
            queue,
            snapshot,
            engine: None,
            engine_generation: 0,
            paused_by_lifecycle: false,
            current,
            playlist_choices: None,
            notices: Vec::new(),
        })
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn queue(&self) -> &[QueueEntry] {
        &self.queue
    }

    pub fn current(&self) -> Option<&CurrentItem> {
        self.current.as_ref()
    }

    pub fn title(&self) -> &str {
        self.current
            .as_ref()
            .map(|c| c.title.as_str())
            .unwrap_or(UNKNOWN_MEDIA_TITLE)
    }

    pub fn engine(&self) -> Option<&dyn PlaybackEngine> {
        self.engine.as_deref()
    }

    pub fn playlist_choices(&self) -> Option<&[Playlist]> {
        self.playlist_choices.as_deref()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Live playback state, or the last captured one when there is no engine.
    pub fn snapshot(&self) -> PlaybackSnapshot {
        match self.engine.as_ref() {
            Some(engine) => PlaybackSnapshot {
                position_ms: engine.position().as_millis() as u64,
                play_when_ready: if self.paused_by_lifecycle {
                    self.snapshot.play_when_ready
                } else {
                    engine.play_when_ready()
                },
                queue_index: engine.current_index().unwrap_or(self.snapshot.queue_index),
                shuffle: engine.shuffle(),
            },
            None => self.snapshot,
        }
    }

    pub fn save_state(&self) -> Result<String, AppError> {
        let state = SavedPlayerState {
            snapshot: self.snapshot(),
            queue: self.queue.clone(),
        };
        log::debug!(
            "[PlayerController] Saving state: Pos={}ms, PlayWhenReady={}, Index={}, Shuffle={}",
            state.snapshot.position_ms,
            state.snapshot.play_when_ready,
            state.snapshot.queue_index,
            state.snapshot.shuffle
        );
        Ok(serde_json::to_string(&state)?)
    }

    fn transition(&mut self, allowed: &[Lifecycle], next: Lifecycle) -> Result<(), AppError> {
        if !allowed.contains(&self.lifecycle) {
            return Err(AppError::Playback(format!(
                "Cannot move from {:?} to {:?}",
                self.lifecycle, next
            )));
        }
        log::debug!("[PlayerController] {:?} -> {:?}", self.lifecycle, next);
        self.lifecycle = next;
        Ok(())
    }

    pub fn on_start(&mut self) -> Result<(), AppError> {
        self.transition(&[Lifecycle::Created, Lifecycle::Stopped], Lifecycle::Started)?;
        if self.policy == ReleasePolicy::OnStop {
            self.initialize_engine();
        }
        Ok(())
    }

    pub fn on_resume(&mut self) -> Result<(), AppError> {
        self.transition(&[Lifecycle::Started, Lifecycle::Paused], Lifecycle::Resumed)?;
        if self.engine.is_none() {
            self.initialize_engine();
        }

        let play = self.snapshot().play_when_ready;
        self.paused_by_lifecycle = false;
        if let Some(engine) = self.engine.as_mut() {
            if play {
                engine.play();
            }
        }
        Ok(())
    }

    pub fn on_pause(&mut self) -> Result<(), AppError> {
        self.transition(&[Lifecycle::Resumed], Lifecycle::Paused)?;
        match self.policy {
            ReleasePolicy::OnPause => self.release_engine(),
            ReleasePolicy::OnStop => {
                self.snapshot = self.snapshot();
                if let Some(engine) = self.engine.as_mut() {
                    engine.pause();
                    self.paused_by_lifecycle = true;
                    log::debug!(
                        "[PlayerController] Paused, saved position {}ms",
                        self.snapshot.position_ms
                    );
                }
            }
        }
        Ok(())
    }

    pub fn on_stop(&mut self) -> Result<(), AppError> {
        self.transition(&[Lifecycle::Paused, Lifecycle::Started], Lifecycle::Stopped)?;
        self.release_engine();
        Ok(())
    }

    pub fn on_destroy(&mut self) -> Result<(), AppError> {
        if self.lifecycle == Lifecycle::Destroyed {
            return Err(AppError::Playback("Controller already destroyed".to_string()));
        }
        self.lifecycle = Lifecycle::Destroyed;
        self.release_engine();
        self.playlist_choices = None;
        Ok(())
    }

    fn initialize_engine(&mut self) {
        if self.engine.is_some() {
            return;
        }

        self.engine_generation += 1;
        let generation = self.engine_generation;
        let main = self.main.clone();
        let listener: EngineListener = Arc::new(move |event| {
            main.post(move |controller: &mut PlayerController| {
                controller.on_engine_event(generation, event)
            });
        });

        let snapshot = self.snapshot;
        let mut engine = self.ctx.engines.create(listener);
        engine.set_queue(self.queue.clone(), snapshot.queue_index, snapshot.position());
        engine.set_play_when_ready(snapshot.play_when_ready);
        engine.set_shuffle(snapshot.shuffle);
        engine.prepare();

        log::debug!(
            "[PlayerController] Engine prepared with {} items, index {}, position {}ms",
            self.queue.len(),
            snapshot.queue_index,
            snapshot.position_ms
        );
        self.engine = Some(engine);
        self.paused_by_lifecycle = false;
    }

    fn release_engine(&mut self) {
        let snapshot = self.snapshot();
        let Some(mut engine) = self.engine.take() else {
            return;
        };

        self.snapshot = snapshot;
        engine.release();
        self.engine_generation += 1;
        self.paused_by_lifecycle = false;
        log::debug!(
            "[PlayerController] Engine released. Saved state: Position={}ms, PlayWhenReady={}, Index={}, Shuffle={}",
            snapshot.position_ms,
            snapshot.play_when_ready,
            snapshot.queue_index,
            snapshot.shuffle
        );
    }

    fn on_engine_event(&mut self, generation: u64, event: EngineEvent) {
        if generation != self.engine_generation {
            return;
        }

        match event {
            EngineEvent::ItemTransition { index, entry } => {
                self.current = entry.map(|e| CurrentItem::from_entry(index, &e, &self.ctx));
                // Offered playlists belonged to the previous item.
                self.playlist_choices = None;
                log::debug!(
                    "[PlayerController] Transition to index {:?}, title: {}",
                    index,
                    self.title()
                );
            }
            EngineEvent::ShuffleChanged(enabled) => {
                self.snapshot.shuffle = enabled;
                log::debug!("[PlayerController] Shuffle mode changed to: {}", enabled);
                self.notices.push(Notice::Info(format!(
                    "Shuffle {}",
                    if enabled { "ON" } else { "OFF" }
                )));
            }
            EngineEvent::IsPlayingChanged(playing) => {
                log::debug!("[PlayerController] Is playing: {}", playing);
            }
            EngineEvent::Error(message) => {
                log::error!("[PlayerController] Player error: {}", message);
                self.notices.push(Notice::Error(format!("Playback Error: {}", message)));
            }
        }
    }

    fn live_engine(&mut self) -> Result<&mut Box<dyn PlaybackEngine>, AppError> {
        self.engine
            .as_mut()
            .ok_or_else(|| AppError::Playback("Player is not active".to_string()))
    }

    pub fn set_playing(&mut self, playing: bool) -> Result<(), AppError> {
        self.live_engine()?.set_play_when_ready(playing);
        Ok(())
    }

    pub fn seek_to(&mut self, position: Duration) -> Result<(), AppError> {
        self.live_engine()?.seek(position);
        Ok(())
    }

    pub fn skip_next(&mut self) -> Result<(), AppError> {
        self.live_engine()?.seek_to_next();
        Ok(())
    }

    pub fn skip_previous(&mut self) -> Result<(), AppError> {
        self.live_engine()?.seek_to_previous();
        Ok(())
    }

    pub fn toggle_shuffle(&mut self) -> Result<(), AppError> {
        let engine = self.live_engine()?;
        let enabled = !engine.shuffle();
        engine.set_shuffle(enabled);
        Ok(())
    }

    /// Downloads the current network item into the "Downloads" playlist.
    pub fn download_current(&mut self) -> Result<(), AppError> {
        let Some(current) = self.current.as_ref().filter(|c| c.is_network) else {
            return Err(AppError::Validation(
                "Only network media can be downloaded".to_string(),
            ));
        };

        let locator = current.locator.clone();
        let file_name = display_name_for(&locator, self.ctx.resolver.as_ref());
        let store = self.ctx.store.clone();
        let downloads = self.downloads.clone();
        let main = self.main.clone();
        log::debug!("[PlayerController] Download requested for: {}", locator);

        self.ctx.pool.submit(async move {
            let notice = match store.find_or_create_playlist(DOWNLOADS_PLAYLIST_NAME).await {
                Ok(playlist_id) => {
                    let request =
                        DownloadRequest::for_playlist(&locator, &file_name, playlist_id, DOWNLOAD_NOTE)
                            .with_destination(file_name.clone());
                    match downloads.enqueue(request).await {
                        Ok(download_id) => {
                            log::debug!(
                                "[PlayerController] Enqueued download ID: {} targeted for playlist ID: {}",
                                download_id,
                                playlist_id
                            );
                            Notice::Info(format!("Download started: {}", file_name))
                        }
                        Err(e) => {
                            log::error!("[PlayerController] Error starting download: {}", e);
                            Notice::Error("Error starting download".to_string())
                        }
                    }
                }
                Err(e) => {
                    log::error!("[PlayerController] Downloads playlist unavailable: {}", e);
                    Notice::Error("Failed to create/find Downloads playlist".to_string())
                }
            };
            main.post(move |controller: &mut PlayerController| controller.notices.push(notice));
        });
        Ok(())
    }

    /// Loads the playlists the current item can be added to. They show up in
    /// [`PlayerController::playlist_choices`].
    pub fn request_add_to_playlist(&mut self) -> Result<(), AppError> {
        if !self.current.as_ref().is_some_and(|c| c.can_be_saved) {
            self.notices
                .push(Notice::Error("Nothing to add to playlist".to_string()));
            return Err(AppError::Validation(
                "Current item cannot be added to a playlist".to_string(),
            ));
        }

        let store = self.ctx.store.clone();
        let main = self.main.clone();
        self.ctx.pool.submit(async move {
            let playlists = match store.get_playlists().await {
                Ok(playlists) => playlists,
                Err(e) => {
                    log::error!("[PlayerController] Failed to list playlists: {}", e);
                    Vec::new()
                }
            };
            main.post(move |controller: &mut PlayerController| {
                controller.on_playlists_loaded(playlists)
            });
        });
        Ok(())
    }

    fn on_playlists_loaded(&mut self, playlists: Vec<Playlist>) {
        if playlists.is_empty() {
            self.notices
                .push(Notice::Info("No playlists available".to_string()));
            self.playlist_choices = None;
        } else {
            self.playlist_choices = Some(playlists);
        }
    }

    pub fn cancel_add_to_playlist(&mut self) {
        self.playlist_choices = None;
    }

    /// Adds the current item to one of the offered playlists.
    pub fn choose_playlist(&mut self, playlist_id: i64) -> Result<(), AppError> {
        let offered = self
            .playlist_choices
            .take()
            .is_some_and(|choices| choices.iter().any(|p| p.id == playlist_id));
        if !offered {
            return Err(AppError::Validation(format!(
                "Playlist {} was not offered",
                playlist_id
            )));
        }

        let Some(current) = self.current.as_ref() else {
            return Err(AppError::Playback("Nothing is playing".to_string()));
        };

        let title = if current.title.is_empty() || current.title == UNKNOWN_MEDIA_TITLE {
            display_name_for(&current.locator, self.ctx.resolver.as_ref())
        } else {
            current.title.clone()
        };
        let item = NewMediaItem::new(current.locator.clone(), Some(title.clone()), playlist_id);

        let store = self.ctx.store.clone();
        let main = self.main.clone();
        self.ctx.pool.submit(async move {
            let notice = match store.insert_media_item(&item).await {
                Ok(_) => {
                    log::debug!(
                        "[PlayerController] Added '{}' to playlist ID: {}",
                        title,
                        playlist_id
                    );
                    Notice::Info(format!("Added '{}' to playlist", title))
                }
                Err(e) => {
                    log::error!("[PlayerController] Failed to add to playlist: {}", e);
                    Notice::Error(format!("Could not add '{}' to playlist", title))
                }
            };
            main.post(move |controller: &mut PlayerController| controller.notices.push(notice));
        });
        Ok(())
    }
}

impl Drop for PlayerController {
    fn drop(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.release();
        }
    }
}
