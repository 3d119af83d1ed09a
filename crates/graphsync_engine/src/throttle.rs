//! Trailing-edge throttle for automatic commits.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Runs a task once, `delay` after the first request of a window.
///
/// Requests made while a run is scheduled coalesce into it. The run itself
/// must call [`Throttle::begin_run`] first so that requests made while it
/// executes schedule the next window.
#[derive(Debug)]
pub(crate) struct Throttle {
    delay: Option<Duration>,
    scheduled: Mutex<Option<JoinHandle<()>>>,
}

impl Throttle {
    pub(crate) fn new(delay: Option<Duration>) -> Self {
        Self {
            delay,
            scheduled: Mutex::new(None),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.delay.is_some()
    }

    pub(crate) fn is_scheduled(&self) -> bool {
        self.scheduled.lock().is_some()
    }

    /// Schedules `run` on the current tokio runtime unless a run is pending.
    pub(crate) fn schedule<F, Fut>(&self, run: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(delay) = self.delay else {
            return;
        };

        let mut scheduled = self.scheduled.lock();
        if scheduled.is_some() {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                *scheduled = Some(handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    run().await;
                }));
            }
            Err(_) => debug!("no tokio runtime; automatic commit not scheduled"),
        }
    }

    /// Marks the scheduled run as started.
    pub(crate) fn begin_run(&self) {
        self.scheduled.lock().take();
    }

    /// Cancels a pending run.
    pub(crate) fn cancel(&self) {
        if let Some(task) = self.scheduled.lock().take() {
            task.abort();
        }
    }
}

impl Drop for Throttle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(throttle: &Arc<Throttle>, runs: &Arc<AtomicUsize>) {
        let throttle_ref = throttle.clone();
        let runs = runs.clone();
        throttle.schedule(move || async move {
            throttle_ref.begin_run();
            runs.fetch_add(1, Ordering::SeqCst);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn coalesces_requests_within_window() {
        let throttle = Arc::new(Throttle::new(Some(Duration::from_millis(100))));
        let runs = Arc::new(AtomicUsize::new(0));

        counting(&throttle, &runs);
        counting(&throttle, &runs);
        tokio::time::sleep(Duration::from_millis(50)).await;
        counting(&throttle, &runs);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!throttle.is_scheduled());

        counting(&throttle, &runs);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_run() {
        let throttle = Arc::new(Throttle::new(Some(Duration::from_millis(100))));
        let runs = Arc::new(AtomicUsize::new(0));

        counting(&throttle, &runs);
        throttle.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn without_runtime_nothing_is_scheduled() {
        let throttle = Arc::new(Throttle::new(Some(Duration::from_millis(10))));
        let runs = Arc::new(AtomicUsize::new(0));
        counting(&throttle, &runs);
        assert!(!throttle.is_scheduled());
    }

    #[test]
    fn disabled_throttle_ignores_requests() {
        let throttle = Arc::new(Throttle::new(None));
        let runs = Arc::new(AtomicUsize::new(0));
        counting(&throttle, &runs);
        assert!(!throttle.is_enabled());
        assert!(!throttle.is_scheduled());
    }
}
