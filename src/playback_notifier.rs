//! Foreground playback notification.
//!
//! The background session keeps one notification bound while it owns a
//! queue. An ongoing notification marks the session as foreground; pausing
//! leaves the notification up but lets the session drop out of foreground;
//! the user dismissing it is how a background session gets told to stop.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::media_controls::MediaSession;

pub const NOTIFICATION_CHANNEL_ID: &str = "mediashelf_playback_channel";
pub const NOTIFICATION_ID: u32 = 1234;

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum NotificationState {
    #[default]
    Hidden,
    Posted {
        title: String,
        ongoing: bool,
    },
}

/// What the owner has to do with its foreground status after an update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForegroundChange {
    Start,
    Stop,
    Unchanged,
}

pub struct PlaybackNotifier {
    state: RwLock<NotificationState>,
    media_session: Arc<MediaSession>,
    bound: AtomicBool,
}

impl PlaybackNotifier {
    pub fn new(media_session: Arc<MediaSession>) -> Self {
        log::debug!(
            "[PlaybackNotifier] Bound notification {} on channel {}",
            NOTIFICATION_ID,
            NOTIFICATION_CHANNEL_ID
        );
        Self {
            state: RwLock::new(NotificationState::Hidden),
            media_session,
            bound: AtomicBool::new(true),
        }
    }

    pub fn state(&self) -> NotificationState {
        self.state.read().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::SeqCst)
    }

    fn is_ongoing(state: &NotificationState) -> bool {
        matches!(state, NotificationState::Posted { ongoing: true, .. })
    }

    fn post(&self, title: String, ongoing: bool) -> ForegroundChange {
        let mut state = self.state.write();
        let was_ongoing = Self::is_ongoing(&state);
        *state = NotificationState::Posted { title, ongoing };

        match (was_ongoing, ongoing) {
            (false, true) => ForegroundChange::Start,
            (true, false) => ForegroundChange::Stop,
            _ => ForegroundChange::Unchanged,
        }
    }

    pub fn notify_playing(&self, title: &str, position: Duration) -> ForegroundChange {
        if !self.is_bound() {
            return ForegroundChange::Unchanged;
        }
        log::info!(
            "[PlaybackNotifier] Playing: '{}' at {:.1}s",
            title,
            position.as_secs_f64()
        );

        self.media_session.set_metadata(title, None);
        self.media_session.set_playback(true, Some(position));
        self.post(title.to_string(), true)
    }

    pub fn notify_paused(&self, position: Duration) -> ForegroundChange {
        if !self.is_bound() {
            return ForegroundChange::Unchanged;
        }

        let title = match &*self.state.read() {
            NotificationState::Posted { title, .. } => title.clone(),
            NotificationState::Hidden => {
                log::warn!("[PlaybackNotifier] Paused but no notification is posted");
                return ForegroundChange::Unchanged;
            }
        };

        log::info!("[PlaybackNotifier] Paused at {:.1}s", position.as_secs_f64());
        self.media_session.set_playback(false, Some(position));
        self.post(title, false)
    }

    /// Removes the notification after the owner dismissed it or the user did.
    /// Returns whether one was showing.
    pub fn cancel(&self, dismissed_by_user: bool) -> bool {
        let mut state = self.state.write();
        let was_posted = !matches!(*state, NotificationState::Hidden);
        *state = NotificationState::Hidden;

        if was_posted {
            log::debug!(
                "[PlaybackNotifier] Notification cancelled. Dismissed by user: {}",
                dismissed_by_user
            );
        }
        was_posted
    }

    /// Drops the binding. True only for the call that unbound it.
    pub fn unbind(&self) -> bool {
        if !self.bound.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.cancel(false);
        log::debug!("[PlaybackNotifier] Notification unbound");
        true
    }
}
