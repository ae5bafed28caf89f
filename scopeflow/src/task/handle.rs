//! Task handles and the shared result slot.
//!
//! Every spawned task owns one [`TaskShared`] cell, shared between the
//! driver that runs the body, the [`TaskHandle`] the spawner holds, and
//! the scope that drains unjoined handles at exit. The terminal outcome
//! is committed exactly once; under races the first writer wins.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::debug;

use super::state::{TaskId, TaskState};
use crate::cancellation::CancelToken;
use crate::errors::{JoinError, TaskError};
use crate::scope::ScopeInner;

enum Slot<T> {
    /// No terminal outcome committed yet.
    Pending,
    /// Terminal outcome stored, not yet consumed.
    Done(Result<T, TaskError>),
    /// Outcome transferred to a joiner or swept during drain.
    Taken,
}

/// State shared between a task's driver, its handle, and its scope.
pub(crate) struct TaskShared<T> {
    id: TaskId,
    token: CancelToken,
    slot: Mutex<Slot<T>>,
    state: AtomicU8,
    done: Notify,
}

impl<T> TaskShared<T> {
    pub(crate) fn new(token: CancelToken) -> Self {
        Self {
            id: TaskId::new(),
            token,
            slot: Mutex::new(Slot::Pending),
            state: AtomicU8::new(TaskState::Pending.as_u8()),
            done: Notify::new(),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn token(&self) -> &CancelToken {
        &self.token
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Marks the task running, unless a terminal state already committed.
    pub(crate) fn mark_running(&self) {
        let _ = self.state.compare_exchange(
            TaskState::Pending.as_u8(),
            TaskState::Running.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Commits the terminal outcome. First writer wins; returns whether
    /// this call committed.
    pub(crate) fn commit(&self, outcome: Result<T, TaskError>) -> bool {
        let mut slot = self.slot.lock();
        if !matches!(*slot, Slot::Pending) {
            return false;
        }
        let state = match &outcome {
            Ok(_) => TaskState::Completed,
            Err(TaskError::Cancelled) => TaskState::Cancelled,
            Err(_) => TaskState::Failed,
        };
        *slot = Slot::Done(outcome);
        self.state.store(state.as_u8(), Ordering::SeqCst);
        drop(slot);
        self.done.notify_waiters();
        true
    }

    /// Suspends until a terminal outcome has been committed.
    pub(crate) async fn wait_done(&self) {
        loop {
            let notified = self.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state().is_terminal() {
                return;
            }
            notified.as_mut().await;
        }
    }

    /// Takes the stored outcome, leaving the slot `Taken`.
    ///
    /// Returns `None` when the outcome was already consumed.
    fn take(&self) -> Option<Result<T, TaskError>> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Done(outcome) => Some(outcome),
            Slot::Pending => {
                *slot = Slot::Pending;
                None
            }
            Slot::Taken => None,
        }
    }
}

/// Type-erased view of a task the scope drains at exit.
pub(crate) trait DrainEntry: Send + Sync {
    fn id(&self) -> TaskId;
    fn state(&self) -> TaskState;
    /// Suspends until the task is terminal.
    fn wait_terminal(&self) -> BoxFuture<'_, ()>;
    /// Consumes the stored outcome, returning the error if the task
    /// failed. A completed value swept here is dropped.
    fn sweep(&self) -> Option<TaskError>;
}

impl<T: Send + 'static> DrainEntry for TaskShared<T> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn state(&self) -> TaskState {
        TaskShared::state(self)
    }

    fn wait_terminal(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.wait_done())
    }

    fn sweep(&self) -> Option<TaskError> {
        self.take().and_then(Result::err)
    }
}

/// A handle to one spawned unit of concurrent work.
///
/// The handle observes the task's state and consumes its outcome through
/// [`join`](Self::join). Result ownership transfers to whichever caller
/// performs the single legal join; handles left unjoined are swept when
/// their scope drains.
pub struct TaskHandle<T> {
    shared: Arc<TaskShared<T>>,
    scope: Weak<ScopeInner>,
}

impl<T: Send + 'static> TaskHandle<T> {
    pub(crate) fn new(shared: Arc<TaskShared<T>>, scope: Weak<ScopeInner>) -> Self {
        Self { shared, scope }
    }

    /// Waits for the task to reach a terminal state and consumes its
    /// outcome.
    ///
    /// A suspension point for the caller. Joining an already-terminal
    /// handle returns the stored outcome immediately; a second join
    /// returns [`JoinError::AlreadyJoined`] rather than blocking.
    pub async fn join(&self) -> Result<T, JoinError> {
        self.shared.wait_done().await;
        match self.shared.take() {
            Some(outcome) => {
                if let Some(scope) = self.scope.upgrade() {
                    scope.remove_entry(self.shared.id());
                }
                debug!(task = %self.shared.id(), state = %self.shared.state(), "task joined");
                outcome.map_err(JoinError::Failed)
            }
            None => Err(JoinError::AlreadyJoined),
        }
    }

    /// The task's unique id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.shared.id()
    }

    /// The task's current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    /// Returns true once the task reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// The token derived for this task.
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        self.shared.token()
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.shared.id())
            .field("state", &self.shared.state())
            .finish()
    }
}
