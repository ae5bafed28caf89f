//! Timeout controller: race a computation against a deadline.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cancellation::CancelToken;
use crate::errors::TaskError;
use crate::runtime::{Clock, TimerHandle};
use crate::scope::Scope;

/// A timer-backed race partner.
///
/// Arming registers a callback with the clock capability that marks the
/// deadline fired and cancels the raced scope's token. Disarming is
/// best-effort: the clock guarantees the callback runs at most once, so
/// a disarm that loses the race simply leaves the fired flag set.
pub(crate) struct Deadline {
    fired: Arc<AtomicBool>,
    timer: TimerHandle,
}

impl Deadline {
    pub(crate) fn arm(
        clock: &Arc<dyn Clock>,
        duration: Duration,
        fired: Arc<AtomicBool>,
        token: CancelToken,
    ) -> Self {
        let flag = fired.clone();
        let timer = clock.schedule(
            duration,
            Box::new(move || {
                flag.store(true, Ordering::SeqCst);
                warn!(?duration, "deadline fired, cancelling raced scope");
                token.request_cancel();
            }),
        );
        Self { fired, timer }
    }

    pub(crate) fn disarm(&self, clock: &Arc<dyn Clock>) {
        clock.disarm(&self.timer);
    }

    pub(crate) fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Scope {
    /// Races `body` against a deadline of `duration`.
    ///
    /// The computation runs in an internal child scope of this one. If the
    /// deadline fires before the task reaches a terminal state, the inner
    /// scope's token is cancelled and the outcome is reported as
    /// `Timeout` — superseding the `Cancelled` the task produces from that
    /// same signal. A task that commits a value or a concrete failure
    /// first wins the race; the deadline is then disarmed and no second
    /// outcome is ever reported.
    pub async fn timeout<T, F, Fut>(&self, duration: Duration, body: F) -> Result<T, TaskError>
    where
        T: Send + 'static,
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let clock = self.context().clock().clone();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_probe = fired.clone();
        let started = clock.now();

        let result = self
            .child_scope(move |inner| async move {
                let deadline = Deadline::arm(&clock, duration, fired, inner.token().clone());
                let handle = inner.spawn(body);
                let outcome = handle.join().await.map_err(TaskError::from);
                deadline.disarm(&clock);
                if !deadline.fired() {
                    let elapsed = clock.now() - started;
                    debug!(?elapsed, "raced task finished before deadline");
                }
                outcome
            })
            .await;

        match result {
            Err(TaskError::Cancelled) if fired_probe.load(Ordering::SeqCst) => {
                Err(TaskError::Timeout)
            }
            other => other,
        }
    }
}
