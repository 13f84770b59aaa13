use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Row id when the entry came from a playlist.
    pub media_id: Option<i64>,
    pub locator: String,
    pub title: String,
}

impl QueueEntry {
    pub fn new(locator: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            media_id: None,
            locator: locator.into(),
            title: title.into(),
        }
    }
}

/// Ordered entries plus a play order. Indices handed out are always
/// positions in `entries`; shuffle only changes the traversal order.
#[derive(Debug, Default)]
pub struct PlayQueue {
    entries: Vec<QueueEntry>,
    order: Vec<usize>,
    cursor: Option<usize>, // Position in `order`
    shuffle: bool,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the queue wholesale and points at `start_index`
    /// (clamped to the first entry when out of range).
    pub fn set_entries(&mut self, entries: Vec<QueueEntry>, start_index: usize) {
        self.entries = entries;
        self.rebuild_order();

        if self.entries.is_empty() {
            self.cursor = None;
            return;
        }

        let start = if start_index < self.entries.len() {
            start_index
        } else {
            0
        };
        self.cursor = self.order.iter().position(|&i| i == start);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.cursor = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        if self.shuffle == enabled {
            return;
        }
        let current = self.current_index();
        self.shuffle = enabled;
        self.rebuild_order();

        // Keep pointing at the entry that was playing
        self.cursor = current.and_then(|idx| self.order.iter().position(|&i| i == idx));
    }

    fn rebuild_order(&mut self) {
        self.order = (0..self.entries.len()).collect();
        if self.shuffle {
            let mut rng = rand::rng();
            self.order.shuffle(&mut rng);
        }
    }

    pub fn current_index(&self) -> Option<usize> {
        self.cursor.and_then(|c| self.order.get(c).copied())
    }

    pub fn current(&self) -> Option<&QueueEntry> {
        self.current_index().and_then(|i| self.entries.get(i))
    }

    /// Moves to the next entry in play order. Returns `None` at the end.
    pub fn advance(&mut self) -> Option<usize> {
        let next = self.cursor.map(|c| c + 1).unwrap_or(0);
        if next >= self.order.len() {
            return None;
        }
        self.cursor = Some(next);
        self.current_index()
    }

    pub fn retreat(&mut self) -> Option<usize> {
        let cursor = self.cursor?;
        if cursor == 0 {
            return self.current_index();
        }
        self.cursor = Some(cursor - 1);
        self.current_index()
    }

    /// Entry indices in the order they will be played.
    pub fn play_order(&self) -> &[usize] {
        &self.order
    }
}
