//! Rate-limited, bounded-concurrency fetch queue.
//!
//! Jobs are started in submission order by a single pump task. At most
//! `max_concurrency` run at once, and consecutive starts are at least
//! `min_spacing` apart.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A unit of work started by the pump.
pub type Job = BoxFuture<'static, ()>;

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    started: AtomicU64,
}

/// Handle for submitting jobs. Cheap to clone.
#[derive(Clone)]
pub struct FetchQueue {
    tx: mpsc::UnboundedSender<Job>,
    counters: Arc<Counters>,
}

impl FetchQueue {
    /// Start the pump task. It stops when `cancel` fires or every handle
    /// is dropped; jobs still queued at that point are dropped unstarted.
    pub fn spawn(max_concurrency: usize, min_spacing: Duration, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        tokio::spawn(pump(rx, semaphore, min_spacing, cancel, counters.clone()));
        Self { tx, counters }
    }

    /// Queue a job. Returns `false` if the pump has stopped.
    pub fn submit(&self, job: Job) -> bool {
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(job).is_err() {
            self.counters.queued.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Jobs waiting for a slot.
    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::Relaxed)
    }

    /// Jobs currently running.
    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::Relaxed)
    }

    /// Highest number of jobs ever running at once.
    pub fn peak_active(&self) -> usize {
        self.counters.peak_active.load(Ordering::Relaxed)
    }

    /// Jobs started so far.
    pub fn started(&self) -> u64 {
        self.counters.started.load(Ordering::Relaxed)
    }
}

async fn pump(
    mut rx: mpsc::UnboundedReceiver<Job>,
    semaphore: Arc<Semaphore>,
    min_spacing: Duration,
    cancel: CancellationToken,
    counters: Arc<Counters>,
) {
    let mut last_start: Option<Instant> = None;
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        if let Some(last) = last_start {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(last + min_spacing) => {}
            }
        }
        last_start = Some(Instant::now());

        counters.queued.fetch_sub(1, Ordering::Relaxed);
        let active = counters.active.fetch_add(1, Ordering::Relaxed) + 1;
        counters.peak_active.fetch_max(active, Ordering::Relaxed);
        counters.started.fetch_add(1, Ordering::Relaxed);

        let counters = counters.clone();
        tokio::spawn(async move {
            job.await;
            counters.active.fetch_sub(1, Ordering::Relaxed);
            drop(permit);
        });
    }
    tracing::debug!("Fetch queue pump stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures_util::FutureExt;
    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bounds_concurrency_and_spaces_starts() {
        let queue = FetchQueue::spawn(2, Duration::from_millis(100), CancellationToken::new());
        let starts = Arc::new(Mutex::new(Vec::new()));
        let mut done = Vec::new();

        for _ in 0..5 {
            let (tx, rx) = oneshot::channel();
            let starts = starts.clone();
            assert!(queue.submit(
                async move {
                    starts.lock().unwrap().push(Instant::now());
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    let _ = tx.send(());
                }
                .boxed()
            ));
            done.push(rx);
        }
        for rx in done {
            rx.await.unwrap();
        }

        assert_eq!(queue.started(), 5);
        assert!(queue.peak_active() <= 2);
        let starts = starts.lock().unwrap();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_queue_drops_pending_jobs() {
        let cancel = CancellationToken::new();
        let queue = FetchQueue::spawn(1, Duration::ZERO, cancel.clone());

        let (first_tx, first_rx) = oneshot::channel::<()>();
        queue.submit(
            async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                let _ = first_tx.send(());
            }
            .boxed(),
        );
        let (second_tx, second_rx) = oneshot::channel::<()>();
        queue.submit(
            async move {
                let _ = second_tx.send(());
            }
            .boxed(),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        // Never started: its sender is dropped with the job.
        assert!(second_rx.await.is_err());
        // The running job is left to finish.
        assert!(first_rx.await.is_ok());
    }
}
