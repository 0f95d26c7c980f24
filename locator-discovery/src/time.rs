//! Time and timer abstractions.
//!
//! [`TimeProvider`] gives the discovery protocol a monotonic clock plus sleep
//! and timeout helpers; [`Scheduler`] is the timer service that fires the
//! probe timeout of the active round. The Tokio implementations read
//! `tokio::time::Instant`, so tests running with a paused clock observe exact
//! timings.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::AbortHandle;

/// Errors that can occur during time operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    /// The operation timed out.
    #[error("operation timed out")]
    Elapsed,
}

/// Provider trait for time operations.
///
/// `now()` is monotonic: it never goes backwards and is unaffected by wall
/// clock adjustments.
#[async_trait]
pub trait TimeProvider: Clone + Send + Sync + 'static {
    /// Sleep for the specified duration.
    async fn sleep(&self, duration: Duration);

    /// Time elapsed since the provider was created.
    fn now(&self) -> Duration;

    /// Run a future with a timeout.
    ///
    /// Returns `Ok(result)` if the future completes within the timeout,
    /// or `Err(TimeError::Elapsed)` if it times out.
    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: Future<Output = T> + Send,
        T: Send;
}

/// Time provider backed by Tokio's clock.
#[derive(Debug, Clone)]
pub struct TokioTimeProvider {
    start_time: tokio::time::Instant,
}

impl TokioTimeProvider {
    /// Create a new Tokio time provider.
    pub fn new() -> Self {
        Self {
            start_time: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimeProvider for TokioTimeProvider {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> Duration {
        self.start_time.elapsed()
    }

    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: Future<Output = T> + Send,
        T: Send,
    {
        tokio::time::timeout(duration, future)
            .await
            .map_err(|_| TimeError::Elapsed)
    }
}

/// Callback run when a timer fires.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a scheduled timer, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// Timer service.
///
/// Cancelling a timer that already fired is a no-op. A callback may still run
/// after `cancel` returns if it was already executing, so receivers of timer
/// callbacks must tolerate stale firings.
pub trait Scheduler: Send + Sync + 'static {
    /// Run `task` once `after` has elapsed.
    fn schedule(&self, after: Duration, task: TimerTask) -> TimerHandle;

    /// Cancel a pending timer.
    fn cancel(&self, handle: TimerHandle);
}

/// Scheduler running each timer as a sleeping Tokio task.
///
/// Must be used from within a Tokio runtime.
#[derive(Debug, Default)]
pub struct TokioScheduler {
    next_id: AtomicU64,
    timers: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl TokioScheduler {
    /// Create a scheduler with no pending timers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers that have not fired or been cancelled.
    pub fn pending(&self) -> usize {
        self.timers.lock().map(|timers| timers.len()).unwrap_or(0)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, after: Duration, task: TimerTask) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);

        // Held across spawn so the task cannot deregister before it is registered.
        let mut guard = match self.timers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let join = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Ok(mut timers) = timers.lock() {
                timers.remove(&id);
            }
            task();
        });
        guard.insert(id, join.abort_handle());

        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        let removed = match self.timers.lock() {
            Ok(mut timers) => timers.remove(&handle.0),
            Err(_) => None,
        };
        if let Some(abort) = removed {
            abort.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        if let Ok(mut timers) = self.timers.lock() {
            for (_, abort) in timers.drain() {
                abort.abort();
            }
        }
    }
}
