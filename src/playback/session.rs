//! Background playback: one engine, one media session and a foreground
//! notification, driven by "play playlist" commands.

use std::sync::Arc;
use std::time::Duration;

use super::engine::{EngineEvent, EngineListener, PlaybackEngine};
use super::{entry_for_item, PlaybackContext};
use crate::errors::AppError;
use crate::executor::MainHandle;
use crate::media_controls::{MediaControlEvent, MediaSession};
use crate::playback_notifier::{ForegroundChange, NotificationState, PlaybackNotifier};
use crate::queue::QueueEntry;
use crate::resolver::UNKNOWN_MEDIA_TITLE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    SessionActive,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    PlayPlaylist(i64),
}

pub struct PlaybackSession {
    ctx: PlaybackContext,
    main: MainHandle<PlaybackSession>,
    state: SessionState,
    engine: Option<Box<dyn PlaybackEngine>>,
    media_session: Option<Arc<MediaSession>>,
    notifier: Option<PlaybackNotifier>,
    foreground: bool,
    load_generation: u64,
    released: bool,
}

impl PlaybackSession {
    pub fn new(ctx: PlaybackContext, main: MainHandle<PlaybackSession>) -> Self {
        Self {
            ctx,
            main,
            state: SessionState::Idle,
            engine: None,
            media_session: None,
            notifier: None,
            foreground: false,
            load_generation: 0,
            released: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    pub fn engine(&self) -> Option<&dyn PlaybackEngine> {
        self.engine.as_deref()
    }

    pub fn notification(&self) -> NotificationState {
        self.notifier
            .as_ref()
            .map(|n| n.state())
            .unwrap_or_default()
    }

    /// Builds the engine, media session and notification binding.
    pub fn start(&mut self) {
        if self.released {
            log::warn!("[PlaybackSession] start() after release ignored");
            return;
        }
        if self.engine.is_some() {
            return;
        }

        let main = self.main.clone();
        let listener: EngineListener = Arc::new(move |event| {
            main.post(move |session: &mut PlaybackSession| session.on_engine_event(event));
        });
        self.engine = Some(self.ctx.engines.create(listener));

        let media_session = Arc::new(MediaSession::new(self.ctx.media_controls));
        let main = self.main.clone();
        media_session.attach_handler(move |event| {
            main.post(move |session: &mut PlaybackSession| session.on_media_control(event));
        });

        self.notifier = Some(PlaybackNotifier::new(media_session.clone()));
        self.media_session = Some(media_session);
        self.state = SessionState::SessionActive;
        log::debug!("[PlaybackSession] Engine and media session created");
    }

    /// Entry point for commands. A command without a playlist id is rejected
    /// before anything is touched.
    pub fn handle_command(&mut self, command: Option<SessionCommand>) -> Result<(), AppError> {
        let Some(command) = command else {
            log::warn!("[PlaybackSession] Playlist ID not provided in command");
            return Err(AppError::Validation("Playlist ID not provided".to_string()));
        };

        if self.released {
            return Err(AppError::Playback("Playback session already released".to_string()));
        }
        self.start();

        match command {
            SessionCommand::PlayPlaylist(playlist_id) => {
                log::info!("[PlaybackSession] Request to load playlist ID: {}", playlist_id);
                self.load_playlist(playlist_id);
            }
        }
        Ok(())
    }

    /// One fetch on the worker pool, one hand-off back to the main sequence.
    /// Only the most recent request is applied.
    fn load_playlist(&mut self, playlist_id: i64) {
        self.load_generation += 1;
        let generation = self.load_generation;
        let store = self.ctx.store.clone();
        let resolver = self.ctx.resolver.clone();
        let main = self.main.clone();

        self.ctx.pool.submit(async move {
            let entries = match store.get_media_items(playlist_id).await {
                Ok(items) => {
                    let built = tokio::task::spawn_blocking(move || {
                        items
                            .iter()
                            .filter_map(|item| entry_for_item(item, resolver.as_ref()))
                            .collect::<Vec<_>>()
                    })
                    .await;
                    built.unwrap_or_else(|e| {
                        log::error!("[PlaybackSession] Building queue failed: {}", e);
                        Vec::new()
                    })
                }
                Err(e) => {
                    log::error!(
                        "[PlaybackSession] Failed to load items of playlist {}: {}",
                        playlist_id,
                        e
                    );
                    Vec::new()
                }
            };

            main.post(move |session: &mut PlaybackSession| {
                session.on_queue_loaded(generation, playlist_id, entries)
            });
        });
    }

    fn on_queue_loaded(&mut self, generation: u64, playlist_id: i64, entries: Vec<QueueEntry>) {
        if self.released || generation != self.load_generation {
            log::debug!("[PlaybackSession] Dropping stale queue for playlist {}", playlist_id);
            return;
        }

        if entries.is_empty() {
            log::warn!("[PlaybackSession] No playable items for playlist ID: {}", playlist_id);
            self.stop_self();
            return;
        }

        let Some(engine) = self.engine.as_mut() else {
            log::error!("[PlaybackSession] No engine, cannot start playback");
            return;
        };

        log::info!(
            "[PlaybackSession] Setting {} items from playlist {}",
            entries.len(),
            playlist_id
        );
        engine.set_queue(entries, 0, Duration::ZERO);
        engine.prepare();
        engine.play();
        self.state = SessionState::Playing;
    }

    fn current_title(&self) -> String {
        self.engine
            .as_ref()
            .and_then(|e| e.current_entry())
            .map(|entry| entry.title)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNKNOWN_MEDIA_TITLE.to_string())
    }

    fn on_engine_event(&mut self, event: EngineEvent) {
        if self.released {
            return;
        }
        let (playing, position) = match self.engine.as_ref() {
            Some(engine) => (engine.is_playing(), engine.position()),
            None => return,
        };

        match event {
            EngineEvent::ItemTransition { index, .. } => {
                log::debug!("[PlaybackSession] Media item transition to {:?}", index);
                if playing {
                    self.post_playing(position);
                }
            }
            EngineEvent::IsPlayingChanged(true) => self.post_playing(position),
            EngineEvent::IsPlayingChanged(false) => {
                let change = self
                    .notifier
                    .as_ref()
                    .map(|n| n.notify_paused(position))
                    .unwrap_or(ForegroundChange::Unchanged);
                self.apply_foreground(change);
            }
            EngineEvent::ShuffleChanged(enabled) => {
                log::debug!("[PlaybackSession] Shuffle changed to {}", enabled);
            }
            EngineEvent::Error(message) => {
                log::error!("[PlaybackSession] Player error: {}", message);
            }
        }
    }

    fn post_playing(&mut self, position: Duration) {
        let title = self.current_title();
        let change = self
            .notifier
            .as_ref()
            .map(|n| n.notify_playing(&title, position))
            .unwrap_or(ForegroundChange::Unchanged);
        self.apply_foreground(change);
    }

    fn apply_foreground(&mut self, change: ForegroundChange) {
        match change {
            ForegroundChange::Start => {
                self.foreground = true;
                log::debug!("[PlaybackSession] Notification posted, starting foreground");
            }
            ForegroundChange::Stop => {
                self.foreground = false;
                log::debug!("[PlaybackSession] Notification not ongoing, stopping foreground");
            }
            ForegroundChange::Unchanged => {}
        }
    }

    fn on_media_control(&mut self, event: MediaControlEvent) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        match event {
            MediaControlEvent::Play => engine.play(),
            MediaControlEvent::Pause => engine.pause(),
            MediaControlEvent::Toggle => {
                let play = !engine.play_when_ready();
                engine.set_play_when_ready(play);
            }
            MediaControlEvent::Next => engine.seek_to_next(),
            MediaControlEvent::Previous => engine.seek_to_previous(),
            MediaControlEvent::Stop => self.stop_self(),
            #[allow(unreachable_patterns)]
            _ => {}
        }
    }

    /// The user swiped the notification away.
    pub fn on_notification_cancelled(&mut self, dismissed_by_user: bool) {
        if let Some(notifier) = self.notifier.as_ref() {
            notifier.cancel(dismissed_by_user);
        }
        self.stop_self();
    }

    /// The app's task was removed. Only a paused session goes away.
    pub fn on_task_removed(&mut self) {
        log::debug!("[PlaybackSession] Task removed by user");
        let paused = self
            .engine
            .as_ref()
            .map(|e| !e.play_when_ready())
            .unwrap_or(false);
        if paused {
            log::debug!("[PlaybackSession] Playback paused, stopping session");
            self.stop_self();
        }
    }

    pub fn stop_self(&mut self) {
        log::info!("[PlaybackSession] Stopping");
        self.release();
    }

    /// Tears down media session, notification binding and engine. True only
    /// for the call that did it.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.load_generation += 1;

        if let Some(media_session) = self.media_session.take() {
            media_session.release();
            log::debug!("[PlaybackSession] Media session released");
        }
        if let Some(notifier) = self.notifier.take() {
            notifier.unbind();
        }
        if let Some(mut engine) = self.engine.take() {
            engine.release();
            log::debug!("[PlaybackSession] Engine released");
        }

        self.foreground = false;
        self.state = SessionState::Idle;
        log::debug!("[PlaybackSession] Session resources released");
        true
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;
    use crate::executor::{MainSequence, WorkerPool};
    use crate::playback::engine::HeadlessEngineFactory;
    use crate::playlist::{NewMediaItem, PlaylistManager};
    use crate::resolver::LocalContentResolver;

    const WAIT: Duration = Duration::from_secs(5);

    async fn session() -> (PlaybackSession, MainSequence<PlaybackSession>, PlaylistManager) {
        let db = DatabaseManager::in_memory().await.unwrap();
        let store = PlaylistManager::new(db.pool.clone());
        let ctx = PlaybackContext {
            store: store.clone(),
            pool: WorkerPool::new(2),
            resolver: Arc::new(LocalContentResolver),
            engines: Arc::new(HeadlessEngineFactory),
            media_controls: false,
        };
        let main = MainSequence::new();
        (PlaybackSession::new(ctx, main.handle()), main, store)
    }

    async fn playlist_with_items(store: &PlaylistManager) -> i64 {
        let id = store.insert_playlist("Evening").await.unwrap().unwrap();
        store
            .insert_media_item(&NewMediaItem::new("file:///music/One%20Song.mp3", None, id))
            .await
            .unwrap();
        store
            .insert_media_item(&NewMediaItem::new(
                "https://example.com/b.mp3?sig=1",
                Some("Bee".to_string()),
                id,
            ))
            .await
            .unwrap();
        id
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_play_playlist_builds_queue_in_order() {
        let (mut session, main, store) = session().await;
        let id = playlist_with_items(&store).await;

        session.handle_command(Some(SessionCommand::PlayPlaylist(id))).unwrap();
        assert_eq!(session.state(), SessionState::SessionActive);
        assert!(main.run_until(&mut session, WAIT, |s| s.state() == SessionState::Playing));
        main.run_pending(&mut session);

        let engine = session.engine().unwrap();
        assert_eq!(engine.queue_len(), 2);
        assert_eq!(engine.current_index(), Some(0));
        assert!(engine.is_playing());

        let first = engine.current_entry().unwrap();
        assert_eq!(first.title, "One Song.mp3");
        assert!(first.media_id.is_some());

        assert!(session.is_foreground());
        assert_eq!(
            session.notification(),
            NotificationState::Posted {
                title: "One Song.mp3".to_string(),
                ongoing: true
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_empty_playlist_stops_session() {
        let (mut session, main, store) = session().await;
        let id = store.insert_playlist("Empty").await.unwrap().unwrap();

        session.handle_command(Some(SessionCommand::PlayPlaylist(id))).unwrap();
        assert!(main.run_until(&mut session, WAIT, |s| s.is_released()));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.engine().is_none());
    }

    #[tokio::test]
    async fn test_missing_playlist_id_rejected() {
        let (mut session, _main, _store) = session().await;
        let err = session.handle_command(None).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.engine().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_notification_cancel_stops_once() {
        let (mut session, main, store) = session().await;
        let id = playlist_with_items(&store).await;
        session.handle_command(Some(SessionCommand::PlayPlaylist(id))).unwrap();
        assert!(main.run_until(&mut session, WAIT, |s| s.state() == SessionState::Playing));

        session.on_notification_cancelled(true);
        assert!(session.is_released());
        assert!(!session.release());
        assert_eq!(session.notification(), NotificationState::Hidden);

        // Engine events still queued from before the release are ignored.
        main.run_pending(&mut session);
        assert!(!session.is_foreground());
        assert!(session
            .handle_command(Some(SessionCommand::PlayPlaylist(id)))
            .is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_task_removed_only_stops_when_paused() {
        let (mut session, main, store) = session().await;
        let id = playlist_with_items(&store).await;
        session.handle_command(Some(SessionCommand::PlayPlaylist(id))).unwrap();
        assert!(main.run_until(&mut session, WAIT, |s| s.state() == SessionState::Playing));
        main.run_pending(&mut session);

        session.on_task_removed();
        assert!(!session.is_released());

        session.on_media_control(MediaControlEvent::Pause);
        main.run_pending(&mut session);
        assert!(!session.is_foreground());

        session.on_task_removed();
        assert!(session.is_released());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_latest_command_wins() {
        let (mut session, main, store) = session().await;
        let first = playlist_with_items(&store).await;
        let second = store.insert_playlist("Solo").await.unwrap().unwrap();
        store
            .insert_media_item(&NewMediaItem::new("file:///music/solo.ogg", None, second))
            .await
            .unwrap();

        session.handle_command(Some(SessionCommand::PlayPlaylist(first))).unwrap();
        session.handle_command(Some(SessionCommand::PlayPlaylist(second))).unwrap();
        assert!(main.run_until(&mut session, WAIT, |s| s.state() == SessionState::Playing));

        // Give the first load time to land and be dropped.
        session.ctx.pool.drain().await;
        main.run_pending(&mut session);
        assert_eq!(session.engine().unwrap().queue_len(), 1);
    }
}
