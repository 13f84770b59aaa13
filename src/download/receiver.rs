use std::sync::Arc;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::manager::{DownloadEvent, DownloadSubsystem};
use super::reconciler::{reconcile, PrivateStorage, Reconciliation};
use crate::executor::WorkerPool;
use crate::playlist::PlaylistManager;
use crate::resolver::ContentResolver;

#[derive(Clone)]
struct ReconcileContext {
    downloads: Arc<dyn DownloadSubsystem>,
    store: PlaylistManager,
    storage: PrivateStorage,
    resolver: Arc<dyn ContentResolver>,
    pool: WorkerPool,
    in_flight: TaskTracker,
}

impl ReconcileContext {
    /// Hands one completion to the worker pool and returns immediately.
    fn dispatch(&self, download_id: i64) {
        log::debug!("Processing download complete for ID: {}", download_id);
        let ctx = self.clone();
        let job = self.pool.submit(async move { ctx.process(download_id).await });
        self.in_flight.spawn(async move {
            if let Err(e) = job.await {
                log::error!("Reconciliation of download {} panicked: {}", download_id, e);
            }
        });
    }

    async fn process(&self, download_id: i64) -> Option<Reconciliation> {
        let Some(outcome) = self.downloads.query(download_id).await else {
            log::warn!("Download subsystem has no record for ID: {}", download_id);
            return None;
        };

        let result = reconcile(outcome, &self.store, &self.storage, self.resolver.clone()).await;
        // Only failed downloads lose their transient file.
        match result {
            Reconciliation::Discarded => self.downloads.remove(download_id).await,
            _ => self.downloads.forget(download_id).await,
        };
        Some(result)
    }
}

/// Listens for download completions and reconciles each one in the background.
pub struct DownloadReceiver {
    ctx: ReconcileContext,
    listener: Option<JoinHandle<()>>,
    stop: CancellationToken,
}

impl DownloadReceiver {
    pub fn new(
        downloads: Arc<dyn DownloadSubsystem>,
        store: PlaylistManager,
        storage: PrivateStorage,
        resolver: Arc<dyn ContentResolver>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            ctx: ReconcileContext {
                downloads,
                store,
                storage,
                resolver,
                pool,
                in_flight: TaskTracker::new(),
            },
            listener: None,
            stop: CancellationToken::new(),
        }
    }

    /// Starts consuming completion events from the download subsystem.
    pub fn listen(&mut self) {
        if self.listener.is_some() {
            return;
        }

        let mut events = self.ctx.downloads.subscribe();
        let ctx = self.ctx.clone();
        let stop = self.stop.clone();
        self.listener = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => {
                        // Completions already broadcast still get reconciled.
                        loop {
                            match events.try_recv() {
                                Ok(DownloadEvent::Completed(id)) => ctx.dispatch(id),
                                Err(TryRecvError::Lagged(skipped)) => {
                                    log::warn!("Missed {} download completion events", skipped);
                                }
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                    event = events.recv() => match event {
                        Ok(DownloadEvent::Completed(id)) => ctx.dispatch(id),
                        Err(RecvError::Lagged(skipped)) => {
                            log::warn!("Missed {} download completion events", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            log::debug!("Download event stream closed");
        }));
        log::info!("Download receiver listening for completions");
    }

    pub fn on_download_complete(&self, download_id: i64) {
        self.ctx.dispatch(download_id);
    }

    /// Stops listening once buffered completions are dispatched, then waits
    /// for every started reconciliation.
    pub async fn shutdown(mut self) {
        self.stop.cancel();
        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.await {
                log::error!("Download listener failed: {}", e);
            }
        }
        self.ctx.in_flight.close();
        self.ctx.in_flight.wait().await;
        log::info!("Download receiver stopped");
    }
}
