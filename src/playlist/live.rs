use std::future::Future;
use tokio::sync::watch;

/// A query result that is re-read whenever the store changes. Intermediate
/// states may be skipped.
pub struct LiveQuery<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> LiveQuery<T> {
    pub fn current(&self) -> T {
        self.rx.borrow().clone()
    }

    pub async fn changed(&mut self) -> Result<T, String> {
        self.rx
            .changed()
            .await
            .map_err(|_| "Live query closed".to_string())?;
        Ok(self.rx.borrow_and_update().clone())
    }
}

/// Spawns the refresh loop. `changes` must be subscribed before `initial`
/// was read so that writes racing the first read still trigger a refresh.
pub(crate) fn spawn_live_query<T, F, Fut>(
    mut changes: watch::Receiver<u64>,
    initial: T,
    label: String,
    fetch: F,
) -> LiveQuery<T>
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, String>> + Send,
{
    let (tx, rx) = watch::channel(initial);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                res = changes.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
            changes.borrow_and_update();

            match fetch().await {
                Ok(snapshot) => {
                    if tx.send(snapshot).is_err() {
                        break;
                    }
                }
                Err(e) => log::warn!("[LiveQuery] Refresh of {} failed: {}", label, e),
            }
        }
        log::debug!("[LiveQuery] {} stopped", label);
    });

    LiveQuery { rx }
}
