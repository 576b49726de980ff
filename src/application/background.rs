//! Detached, bounded execution of revalidations and fire-and-forget writes.
//!
//! Nothing on the response path awaits these tasks. A semaphore caps how many
//! run at once; every task is cut off after the configured timeout.

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::{Notify, Semaphore};
use tracing::debug;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct Tracker {
    pending: AtomicUsize,
    idle: Notify,
}

/// Decrements the pending count when the task finishes, panics included.
struct PendingGuard(Arc<Tracker>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let remaining = self.0.pending.fetch_sub(1, Ordering::AcqRel) - 1;
        gauge!("shelfcache_background_in_flight").set(remaining as f64);
        if remaining == 0 {
            self.0.idle.notify_waiters();
        }
    }
}

#[derive(Clone)]
pub struct Background {
    permits: Arc<Semaphore>,
    timeout: Duration,
    tracker: Arc<Tracker>,
}

impl Default for Background {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT, DEFAULT_TASK_TIMEOUT)
    }
}

impl Background {
    pub fn new(max_in_flight: usize, timeout: Duration) -> Self {
        let capacity = max_in_flight.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            timeout,
            tracker: Arc::new(Tracker::default()),
        }
    }

    /// Tasks spawned and not yet finished, including those waiting for a permit.
    pub fn in_flight(&self) -> usize {
        self.tracker.pending.load(Ordering::Acquire)
    }

    /// Run a revalidation if a permit is free right now. Returns `false` when
    /// the limiter is saturated and the task was skipped.
    pub fn revalidate<F>(&self, label: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            counter!("shelfcache_revalidate_skipped_total", "task" => label).increment(1);
            debug!(task = label, "Background limiter saturated; revalidation skipped");
            return false;
        };

        let guard = self.track();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let _guard = guard;
            let _permit = permit;
            run_bounded(label, timeout, task).await;
        });
        true
    }

    /// Run a task that must not be dropped; it waits for a permit inside its
    /// own spawned task.
    pub fn detach<F>(&self, label: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.track();
        let permits = Arc::clone(&self.permits);
        let timeout = self.timeout;
        tokio::spawn(async move {
            let _guard = guard;
            let Ok(_permit) = permits.acquire_owned().await else {
                debug!(task = label, "Background limiter closed; task dropped");
                return;
            };
            run_bounded(label, timeout, task).await;
        });
    }

    /// Wait until every detached task has finished.
    pub async fn settle(&self) {
        loop {
            let mut notified = pin!(self.tracker.idle.notified());
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// [`Background::settle`] with an upper bound. Returns whether all work
    /// finished in time.
    pub async fn settle_within(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.settle()).await.is_ok()
    }

    fn track(&self) -> PendingGuard {
        let pending = self.tracker.pending.fetch_add(1, Ordering::AcqRel) + 1;
        gauge!("shelfcache_background_in_flight").set(pending as f64);
        PendingGuard(Arc::clone(&self.tracker))
    }
}

async fn run_bounded<F>(label: &'static str, timeout: Duration, task: F)
where
    F: Future<Output = ()>,
{
    if tokio::time::timeout(timeout, task).await.is_err() {
        counter!("shelfcache_background_timeouts_total", "task" => label).increment(1);
        debug!(task = label, ?timeout, "Background task timed out");
    }
}
