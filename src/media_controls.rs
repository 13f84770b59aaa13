use parking_lot::RwLock;
#[cfg(not(target_os = "android"))]
use souvlaki::{MediaControls, MediaMetadata, MediaPlayback, MediaPosition, PlatformConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

// Re-export MediaControlEvent for use in other modules (or provide stub for Android)
#[cfg(not(target_os = "android"))]
pub use souvlaki::MediaControlEvent;

#[cfg(target_os = "android")]
#[derive(Debug, Clone)]
pub enum MediaControlEvent {
    Play,
    Pause,
    Toggle,
    Next,
    Previous,
    Stop,
}

#[derive(Default)]
struct CachedMetadata {
    title: String,
    duration_secs: Option<f64>,
}

/// The OS-visible media session (MPRIS on Linux, Now Playing on macOS).
///
/// Created disabled when there is no session bus to talk to; every call is
/// then a no-op apart from the cached metadata.
pub struct MediaSession {
    #[cfg(not(target_os = "android"))]
    controls: RwLock<Option<MediaControls>>,
    metadata: RwLock<CachedMetadata>,
    released: AtomicBool,
}

impl MediaSession {
    // Linux/macOS implementation
    #[cfg(all(not(target_os = "windows"), not(target_os = "android")))]
    pub fn new(enabled: bool) -> Self {
        let controls = if enabled {
            let config = PlatformConfig {
                dbus_name: "mediashelf",
                display_name: "Mediashelf",
                hwnd: None,
            };
            match MediaControls::new(config) {
                Ok(c) => Some(c),
                Err(e) => {
                    log::warn!("[MediaSession] OS media controls unavailable: {:?}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            controls: RwLock::new(controls),
            metadata: RwLock::new(CachedMetadata::default()),
            released: AtomicBool::new(false),
        }
    }

    // Windows needs a window handle, which a headless session does not have
    #[cfg(target_os = "windows")]
    pub fn new(_enabled: bool) -> Self {
        Self {
            controls: RwLock::new(None),
            metadata: RwLock::new(CachedMetadata::default()),
            released: AtomicBool::new(false),
        }
    }

    // Android stub implementation
    #[cfg(target_os = "android")]
    pub fn new(_enabled: bool) -> Self {
        log::info!("MediaSession: Android stub initialized (no-op)");
        Self {
            metadata: RwLock::new(CachedMetadata::default()),
            released: AtomicBool::new(false),
        }
    }

    #[cfg(not(target_os = "android"))]
    pub fn attach_handler<F>(&self, handler: F)
    where
        F: Fn(MediaControlEvent) + Send + 'static,
    {
        if let Some(ref mut controls) = *self.controls.write() {
            if let Err(e) = controls.attach(handler) {
                log::warn!("[MediaSession] Failed to attach handler: {:?}", e);
            }
        }
    }

    #[cfg(target_os = "android")]
    pub fn attach_handler<F>(&self, _handler: F)
    where
        F: Fn(MediaControlEvent) + Send + 'static,
    {
        // No-op on Android - media controls handled by system
    }

    pub fn set_metadata(&self, title: &str, duration_secs: Option<f64>) {
        if self.is_released() {
            return;
        }
        {
            let mut cached = self.metadata.write();
            cached.title = title.to_string();
            cached.duration_secs = duration_secs;
        }
        self.apply_metadata();
    }

    #[cfg(not(target_os = "android"))]
    fn apply_metadata(&self) {
        if let Some(ref mut controls) = *self.controls.write() {
            let cached = self.metadata.read();
            let duration = cached
                .duration_secs
                .filter(|d| *d > 0.0)
                .map(Duration::from_secs_f64);

            let _ = controls.set_metadata(MediaMetadata {
                title: Some(&cached.title),
                duration,
                ..Default::default()
            });
        }
    }

    #[cfg(target_os = "android")]
    fn apply_metadata(&self) {
        // No-op on Android
    }

    #[cfg(not(target_os = "android"))]
    pub fn set_playback(&self, playing: bool, position: Option<Duration>) {
        if self.is_released() {
            return;
        }
        if let Some(ref mut controls) = *self.controls.write() {
            let progress = position.map(MediaPosition);
            let playback = if playing {
                MediaPlayback::Playing { progress }
            } else {
                MediaPlayback::Paused { progress }
            };
            let _ = controls.set_playback(playback);
        }
    }

    #[cfg(target_os = "android")]
    pub fn set_playback(&self, _playing: bool, _position: Option<Duration>) {
        // No-op on Android
    }

    #[cfg(not(target_os = "android"))]
    pub fn set_stopped(&self) {
        if let Some(ref mut controls) = *self.controls.write() {
            let _ = controls.set_playback(MediaPlayback::Stopped);
        }
    }

    #[cfg(target_os = "android")]
    pub fn set_stopped(&self) {
        // No-op on Android
    }

    pub fn title(&self) -> String {
        self.metadata.read().title.clone()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Detaches from the OS. Returns true only for the call that released it.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.set_stopped();
        #[cfg(not(target_os = "android"))]
        {
            if let Some(mut controls) = self.controls.write().take() {
                let _ = controls.detach();
            }
        }
        true
    }
}
