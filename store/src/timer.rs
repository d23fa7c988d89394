//! Delayed execution for the poll loop.
//!
//! [`TokioTimer`] runs scheduled work on the ambient tokio runtime.
//! [`ManualTimer`] queues it until a test fires it explicitly, and counts
//! every schedule call.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;

pub type TimerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub trait Timer: Send + Sync {
    /// Run `task` once after `delay`.
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

/// Cancels a scheduled task that has not started yet. Dropping the handle
/// does not cancel.
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    task: Option<AbortHandle>,
}

impl TimerHandle {
    fn new(cancelled: Arc<AtomicBool>, task: Option<AbortHandle>) -> Self {
        Self { cancelled, task }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!("No tokio runtime; scheduled poll tick dropped");
            cancelled.store(true, Ordering::SeqCst);
            return TimerHandle::new(cancelled, None);
        };

        let flag = Arc::clone(&cancelled);
        let join = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                task.await;
            }
        });
        TimerHandle::new(cancelled, Some(join.abort_handle()))
    }
}

struct Queued {
    delay: Duration,
    task: TimerTask,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct ManualState {
    queue: VecDeque<Queued>,
    schedule_calls: usize,
}

/// Deterministic timer for tests: nothing runs until [`ManualTimer::fire_next`].
#[derive(Clone, Default)]
pub struct ManualTimer {
    state: Arc<Mutex<ManualState>>,
}

impl ManualTimer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total number of `schedule` calls so far.
    #[must_use]
    pub fn schedule_calls(&self) -> usize {
        self.state().schedule_calls
    }

    /// Scheduled tasks that are neither fired nor cancelled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state()
            .queue
            .iter()
            .filter(|queued| !queued.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Delay requested by the oldest live scheduled task.
    #[must_use]
    pub fn next_delay(&self) -> Option<Duration> {
        self.state()
            .queue
            .iter()
            .find(|queued| !queued.cancelled.load(Ordering::SeqCst))
            .map(|queued| queued.delay)
    }

    /// Run the oldest live scheduled task to completion. Returns `false`
    /// when nothing was pending.
    pub async fn fire_next(&self) -> bool {
        let next = {
            let mut state = self.state();
            loop {
                match state.queue.pop_front() {
                    Some(queued) if queued.cancelled.load(Ordering::SeqCst) => {}
                    other => break other,
                }
            }
        };
        match next {
            Some(queued) => {
                queued.task.await;
                true
            }
            None => false,
        }
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.state();
        state.schedule_calls += 1;
        state.queue.push_back(Queued {
            delay,
            task,
            cancelled: Arc::clone(&cancelled),
        });
        TimerHandle::new(cancelled, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(counter: &Arc<AtomicUsize>) -> TimerTask {
        let counter = Arc::clone(counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn manual_timer_fires_in_order_and_skips_cancelled() {
        let timer = ManualTimer::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let first = timer.schedule(Duration::ZERO, counting_task(&counter));
        timer.schedule(Duration::from_secs(5), counting_task(&counter));
        first.cancel();

        assert_eq!(timer.schedule_calls(), 2);
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.next_delay(), Some(Duration::from_secs(5)));

        assert!(timer.fire_next().await);
        assert!(!timer.fire_next().await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tokio_timer_runs_after_delay() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = TokioTimer.schedule(Duration::from_millis(10), counting_task(&counter));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn tokio_timer_cancel_prevents_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = TokioTimer.schedule(Duration::from_millis(20), counting_task(&counter));
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
