use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::queue::{PlayQueue, QueueEntry};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The current item changed. `None` when the queue ran dry or was cleared.
    ItemTransition {
        index: Option<usize>,
        entry: Option<QueueEntry>,
    },
    ShuffleChanged(bool),
    IsPlayingChanged(bool),
    Error(String),
}

pub type EngineListener = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// The media-playback engine owned by a session or a player controller.
/// Only its owner's main sequence calls into it.
pub trait PlaybackEngine: Send {
    /// Replaces the queue. Nothing plays until `prepare`.
    fn set_queue(&mut self, entries: Vec<QueueEntry>, start_index: usize, position: Duration);
    fn prepare(&mut self);
    fn play(&mut self);
    fn pause(&mut self);
    fn set_play_when_ready(&mut self, play_when_ready: bool);
    fn play_when_ready(&self) -> bool;
    fn set_shuffle(&mut self, enabled: bool);
    fn shuffle(&self) -> bool;
    fn seek(&mut self, position: Duration);
    fn seek_to_next(&mut self);
    fn seek_to_previous(&mut self);
    fn position(&self) -> Duration;
    fn current_index(&self) -> Option<usize>;
    fn current_entry(&self) -> Option<QueueEntry>;
    fn queue_len(&self) -> usize;
    fn is_playing(&self) -> bool;
    fn release(&mut self);
    fn is_released(&self) -> bool;
}

pub trait EngineFactory: Send + Sync {
    fn create(&self, listener: EngineListener) -> Box<dyn PlaybackEngine>;
}

/// Clock-driven engine with no audio output attached.
///
/// Tracks queue, play-when-ready, shuffle and position exactly like an
/// output-backed engine would, which is what sessions and controllers
/// observe. Output backends plug in through [`EngineFactory`].
pub struct HeadlessEngine {
    queue: PlayQueue,
    listener: EngineListener,
    play_when_ready: bool,
    prepared: bool,
    released: bool,
    base_position: Duration,
    started_at: Option<Instant>,
}

impl HeadlessEngine {
    pub fn new(listener: EngineListener) -> Self {
        Self {
            queue: PlayQueue::new(),
            listener,
            play_when_ready: false,
            prepared: false,
            released: false,
            base_position: Duration::ZERO,
            started_at: None,
        }
    }

    fn emit(&self, event: EngineEvent) {
        (self.listener)(event);
    }

    fn should_run(&self) -> bool {
        self.play_when_ready && self.prepared && !self.released && self.queue.current().is_some()
    }

    fn sync_clock(&mut self) {
        let was_running = self.started_at.is_some();
        let run = self.should_run();

        if was_running && !run {
            self.base_position = self.position();
            self.started_at = None;
        } else if !was_running && run {
            self.started_at = Some(Instant::now());
        }

        if was_running != run {
            self.emit(EngineEvent::IsPlayingChanged(run));
        }
    }

    fn emit_transition(&self) {
        self.emit(EngineEvent::ItemTransition {
            index: self.queue.current_index(),
            entry: self.queue.current().cloned(),
        });
    }

    fn restart_clock_at(&mut self, position: Duration) {
        self.base_position = position;
        if self.started_at.is_some() {
            self.started_at = Some(Instant::now());
        }
    }
}

impl PlaybackEngine for HeadlessEngine {
    fn set_queue(&mut self, entries: Vec<QueueEntry>, start_index: usize, position: Duration) {
        if self.released {
            log::warn!("[HeadlessEngine] set_queue after release ignored");
            return;
        }
        self.queue.set_entries(entries, start_index);
        self.prepared = false;
        self.sync_clock();
        self.base_position = position;
    }

    fn prepare(&mut self) {
        if self.released || self.prepared {
            return;
        }
        self.prepared = true;
        self.emit_transition();
        self.sync_clock();
    }

    fn play(&mut self) {
        self.set_play_when_ready(true);
    }

    fn pause(&mut self) {
        self.set_play_when_ready(false);
    }

    fn set_play_when_ready(&mut self, play_when_ready: bool) {
        if self.released || self.play_when_ready == play_when_ready {
            return;
        }
        self.play_when_ready = play_when_ready;
        self.sync_clock();
    }

    fn play_when_ready(&self) -> bool {
        self.play_when_ready
    }

    fn set_shuffle(&mut self, enabled: bool) {
        if self.released || self.queue.shuffle() == enabled {
            return;
        }
        self.queue.set_shuffle(enabled);
        self.emit(EngineEvent::ShuffleChanged(enabled));
    }

    fn shuffle(&self) -> bool {
        self.queue.shuffle()
    }

    fn seek(&mut self, position: Duration) {
        if self.released {
            return;
        }
        self.restart_clock_at(position);
    }

    fn seek_to_next(&mut self) {
        if self.released {
            return;
        }
        if self.queue.advance().is_some() {
            self.restart_clock_at(Duration::ZERO);
            if self.prepared {
                self.emit_transition();
            }
        } else {
            log::debug!("[HeadlessEngine] End of queue reached");
            self.pause();
        }
    }

    fn seek_to_previous(&mut self) {
        if self.released {
            return;
        }
        let before = self.queue.current_index();
        let after = self.queue.retreat();
        self.restart_clock_at(Duration::ZERO);
        if self.prepared && before != after {
            self.emit_transition();
        }
    }

    fn position(&self) -> Duration {
        match self.started_at {
            Some(started) => self.base_position + started.elapsed(),
            None => self.base_position,
        }
    }

    fn current_index(&self) -> Option<usize> {
        self.queue.current_index()
    }

    fn current_entry(&self) -> Option<QueueEntry> {
        self.queue.current().cloned()
    }

    fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn is_playing(&self) -> bool {
        self.started_at.is_some()
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.base_position = self.position();
        self.started_at = None;
        self.released = true;
        self.queue.clear();
        log::debug!("[HeadlessEngine] Released");
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HeadlessEngineFactory;

impl EngineFactory for HeadlessEngineFactory {
    fn create(&self, listener: EngineListener) -> Box<dyn PlaybackEngine> {
        Box::new(HeadlessEngine::new(listener))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording_engine() -> (HeadlessEngine, Arc<Mutex<Vec<EngineEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let engine = HeadlessEngine::new(Arc::new(move |e| sink.lock().push(e)));
        (engine, events)
    }

    fn entries() -> Vec<QueueEntry> {
        vec![
            QueueEntry::new("file:///a.mp3", "a"),
            QueueEntry::new("https://example.com/b.mp3", "b"),
        ]
    }

    #[test]
    fn test_prepare_emits_transition_for_start_item() {
        let (mut engine, events) = recording_engine();
        engine.set_queue(entries(), 1, Duration::from_secs(3));
        engine.prepare();

        let events = events.lock();
        assert_eq!(
            events[0],
            EngineEvent::ItemTransition {
                index: Some(1),
                entry: Some(QueueEntry::new("https://example.com/b.mp3", "b")),
            }
        );
        assert_eq!(engine.position(), Duration::from_secs(3));
    }

    #[test]
    fn test_position_frozen_while_paused() {
        let (mut engine, _) = recording_engine();
        engine.set_queue(entries(), 0, Duration::ZERO);
        engine.prepare();
        engine.play();
        assert!(engine.is_playing());

        engine.pause();
        let frozen = engine.position();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(engine.position(), frozen);
        assert!(!engine.play_when_ready());
    }

    #[test]
    fn test_seek_to_next_at_end_pauses() {
        let (mut engine, events) = recording_engine();
        engine.set_queue(entries(), 1, Duration::ZERO);
        engine.prepare();
        engine.play();
        engine.seek_to_next();

        assert!(!engine.is_playing());
        assert!(events
            .lock()
            .contains(&EngineEvent::IsPlayingChanged(false)));
    }

    #[test]
    fn test_shuffle_change_emitted_once() {
        let (mut engine, events) = recording_engine();
        engine.set_queue(entries(), 0, Duration::ZERO);
        engine.set_shuffle(true);
        engine.set_shuffle(true);

        let count = events
            .lock()
            .iter()
            .filter(|e| matches!(e, EngineEvent::ShuffleChanged(true)))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_release_is_idempotent_and_final() {
        let (mut engine, events) = recording_engine();
        engine.set_queue(entries(), 0, Duration::ZERO);
        engine.prepare();
        engine.release();
        engine.release();
        let before = events.lock().len();

        engine.play();
        engine.set_queue(entries(), 0, Duration::ZERO);
        assert!(engine.is_released());
        assert_eq!(engine.queue_len(), 0);
        assert_eq!(events.lock().len(), before);
    }
}
