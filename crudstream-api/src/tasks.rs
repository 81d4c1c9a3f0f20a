//! Tracked fire-and-forget tasks.
//!
//! Write usecases publish and invalidate in the background so the caller
//! never waits on the broker. Every such task is spawned through a
//! [`TaskTracker`], which counts what is still running and keeps the join
//! handles so shutdown can wait for them.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct TrackerInner {
    in_flight: AtomicUsize,
    spawned: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Decrements the in-flight counter when the task ends, panics included.
struct InFlight(Arc<TrackerInner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Outcome of [`TaskTracker::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The counter reached zero before the drain timeout.
    pub drained: bool,
    /// Tasks joined after the drain.
    pub joined: usize,
    /// Tasks still running at the deadline, aborted.
    pub aborted: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TaskTracker {
    inner: Arc<TrackerInner>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` and track it until it finishes.
    pub fn spawn<F>(&self, label: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        self.inner.spawned.fetch_add(1, Ordering::Relaxed);
        let guard = InFlight(Arc::clone(&self.inner));

        let handle = tokio::spawn(async move {
            let _guard = guard;
            task.await;
            tracing::trace!(task = label, "Background task finished");
        });

        let mut handles = self.handles();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Tasks spawned and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Tasks spawned since creation.
    pub fn spawned(&self) -> usize {
        self.inner.spawned.load(Ordering::Relaxed)
    }

    /// Wait for in-flight tasks, checking the counter every `poll_interval`,
    /// then join every tracked handle.
    ///
    /// Tasks still running after `drain_timeout` are aborted.
    pub async fn shutdown(&self, poll_interval: Duration, drain_timeout: Duration) -> ShutdownReport {
        let deadline = Instant::now() + drain_timeout;
        let mut drained = true;

        loop {
            let remaining = self.in_flight();
            if remaining == 0 {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(remaining, "Drain timeout reached with tasks still running");
                drained = false;
                break;
            }
            tracing::info!(remaining, "Waiting for background tasks");
            tokio::time::sleep(poll_interval).await;
        }

        let handles = std::mem::take(&mut *self.handles());
        let mut report = ShutdownReport {
            drained,
            ..ShutdownReport::default()
        };
        for handle in handles {
            if !drained && !handle.is_finished() {
                handle.abort();
                report.aborted += 1;
            }
            match handle.await {
                Ok(()) => report.joined += 1,
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    tracing::error!(error = %e, "Background task panicked");
                    report.joined += 1;
                }
            }
        }

        tracing::info!(
            drained = report.drained,
            joined = report.joined,
            aborted = report.aborted,
            "Background tasks stopped"
        );
        report
    }

    fn handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight() {
        let tracker = TaskTracker::new();
        let done = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&done);
        tracker.spawn("slow", async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(tracker.in_flight(), 1);

        let report = tracker
            .shutdown(Duration::from_secs(1), Duration::from_secs(30))
            .await;

        assert!(done.load(Ordering::SeqCst));
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(
            report,
            ShutdownReport {
                drained: true,
                joined: 1,
                aborted: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_after_drain_timeout() {
        let tracker = TaskTracker::new();
        tracker.spawn("stuck", std::future::pending());

        let report = tracker
            .shutdown(Duration::from_secs(1), Duration::from_secs(5))
            .await;

        assert!(!report.drained);
        assert_eq!(report.aborted, 1);
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_still_decrements() {
        let tracker = TaskTracker::new();
        tracker.spawn("panics", async {
            panic!("boom");
        });

        let report = tracker
            .shutdown(Duration::from_millis(5), Duration::from_secs(5))
            .await;
        assert!(report.drained);
        assert_eq!(tracker.in_flight(), 0);
        assert_eq!(tracker.spawned(), 1);
    }
}
