//! Clock and timer capability.
//!
//! The timeout controller never talks to the system clock directly; it
//! goes through [`Clock`] so tests can substitute their own time source.
//! A scheduled callback fires at most once, and disarming after the
//! callback fired is a no-op.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Callback invoked when a timer fires.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

/// Handle to one scheduled timer.
pub struct TimerHandle {
    armed: Arc<AtomicBool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TimerHandle {
    /// Returns true while the timer has neither fired nor been disarmed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("armed", &self.is_armed())
            .finish()
    }
}

/// Time source capability.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;

    /// Schedules `callback` to run once after `duration`.
    fn schedule(&self, duration: Duration, callback: TimerCallback) -> TimerHandle;

    /// Disarms a scheduled timer. Best-effort: a timer that already fired
    /// stays fired, and disarming it again is a no-op.
    fn disarm(&self, timer: &TimerHandle);
}

/// Production clock backed by the tokio timer wheel.
///
/// Respects tokio's paused test clock, so timer behavior is deterministic
/// under `#[tokio::test(start_paused = true)]`.
#[derive(Debug, Clone)]
pub struct TokioClock {
    handle: tokio::runtime::Handle,
}

impl TokioClock {
    /// Creates a clock on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }

    /// Creates a clock on an explicit runtime handle.
    #[must_use]
    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(&self, duration: Duration, callback: TimerCallback) -> TimerHandle {
        let armed = Arc::new(AtomicBool::new(true));
        let fire_guard = armed.clone();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(duration).await;
            // Swap decides the race against disarm: exactly one side wins.
            if fire_guard.swap(false, Ordering::SeqCst) {
                callback();
            }
        });
        TimerHandle {
            armed,
            task: Mutex::new(Some(task)),
        }
    }

    fn disarm(&self, timer: &TimerHandle) {
        if timer.armed.swap(false, Ordering::SeqCst) {
            if let Some(task) = timer.task.lock().take() {
                task.abort();
            }
        }
    }
}
