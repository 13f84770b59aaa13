use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::broadcast;

use super::manager::{DownloadEvent, DownloadOutcome, DownloadSubsystem};
use super::request::DownloadRequest;
use crate::errors::AppError;

/// Download subsystem whose outcomes are written by the test.
pub(crate) struct ScriptedDownloads {
    outcomes: Mutex<HashMap<i64, DownloadOutcome>>,
    enqueued: Mutex<Vec<DownloadRequest>>,
    removed: Mutex<Vec<i64>>,
    forgotten: Mutex<Vec<i64>>,
    events: broadcast::Sender<DownloadEvent>,
}

impl ScriptedDownloads {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            outcomes: Mutex::new(HashMap::new()),
            enqueued: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            forgotten: Mutex::new(Vec::new()),
            events,
        }
    }

    pub(crate) fn script(&self, outcome: DownloadOutcome) {
        self.outcomes.lock().insert(outcome.id, outcome);
    }

    pub(crate) fn complete(&self, id: i64) {
        let _ = self.events.send(DownloadEvent::Completed(id));
    }

    pub(crate) fn enqueued(&self) -> Vec<DownloadRequest> {
        self.enqueued.lock().clone()
    }

    pub(crate) fn removed(&self) -> Vec<i64> {
        self.removed.lock().clone()
    }

    pub(crate) fn forgotten(&self) -> Vec<i64> {
        let mut ids = self.forgotten.lock().clone();
        ids.sort_unstable();
        ids
    }
}

#[async_trait]
impl DownloadSubsystem for ScriptedDownloads {
    async fn enqueue(&self, request: DownloadRequest) -> Result<i64, AppError> {
        let mut enqueued = self.enqueued.lock();
        enqueued.push(request);
        Ok(enqueued.len() as i64)
    }

    async fn query(&self, id: i64) -> Option<DownloadOutcome> {
        self.outcomes.lock().get(&id).cloned()
    }

    async fn remove(&self, id: i64) -> bool {
        self.removed.lock().push(id);
        self.outcomes.lock().remove(&id).is_some()
    }

    async fn forget(&self, id: i64) -> bool {
        self.forgotten.lock().push(id);
        self.outcomes.lock().remove(&id).is_some()
    }

    fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }
}
