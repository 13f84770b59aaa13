//! Background work and the serialized main sequence.
//!
//! Store writes, file copies and resolver lookups run on the [`WorkerPool`].
//! Controllers and the playback session are only touched from their owner's
//! [`MainSequence`]; workers hand results back through a [`MainHandle`].

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

/// Fixed-size pool: at most `size` jobs run at once, the rest wait for a permit.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of submitted jobs that have not finished yet.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    pub fn submit<F, T>(&self, job: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        self.tracker.spawn(async move {
            // The semaphore is never closed, so a permit always arrives.
            let _permit = permits.acquire_owned().await.ok();
            job.await
        })
    }

    /// Waits until every job submitted so far has finished.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

pub type MainTask<T> = Box<dyn FnOnce(&mut T) + Send + 'static>;

/// Posts work onto a [`MainSequence`] from any thread.
pub struct MainHandle<T: 'static> {
    tx: Sender<MainTask<T>>,
}

impl<T: 'static> Clone for MainHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: 'static> MainHandle<T> {
    /// Returns false once the sequence has been dropped.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.tx.send(Box::new(task)).is_ok()
    }
}

/// Single consumer queue of tasks applied to one owned value in order.
pub struct MainSequence<T: 'static> {
    tx: Sender<MainTask<T>>,
    rx: Receiver<MainTask<T>>,
}

impl<T: 'static> Default for MainSequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> MainSequence<T> {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub fn handle(&self) -> MainHandle<T> {
        MainHandle {
            tx: self.tx.clone(),
        }
    }

    /// Applies every task already queued. Returns how many ran.
    pub fn run_pending(&self, target: &mut T) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task(target);
            ran += 1;
        }
        ran
    }

    /// Blocks up to `timeout` for one task and applies it.
    pub fn run_next(&self, target: &mut T, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task(target);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Applies tasks until `done` holds or `timeout` passes without progress.
    pub fn run_until<P>(&self, target: &mut T, timeout: Duration, mut done: P) -> bool
    where
        P: FnMut(&T) -> bool,
    {
        self.run_pending(target);
        while !done(target) {
            if !self.run_next(target, timeout) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_bounds_concurrency() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_drain_waits_for_jobs() {
        let pool = WorkerPool::new(4);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = done.clone();
            pool.submit(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(pool.pending(), 0);

        // Still usable after a drain.
        let value = pool.submit(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_main_sequence_runs_in_order() {
        let main: MainSequence<Vec<u32>> = MainSequence::new();
        let handle = main.handle();
        for i in 0..3 {
            handle.post(move |v| v.push(i));
        }

        let mut target = Vec::new();
        assert_eq!(main.run_pending(&mut target), 3);
        assert_eq!(target, vec![0, 1, 2]);
        assert!(!main.run_next(&mut target, Duration::from_millis(5)));
    }

    #[test]
    fn test_post_from_other_thread() {
        let main: MainSequence<u32> = MainSequence::new();
        let handle = main.handle();
        std::thread::spawn(move || {
            handle.post(|v| *v += 5);
        });

        let mut target = 0;
        assert!(main.run_until(&mut target, Duration::from_secs(5), |v| *v == 5));
    }
}
