//! Task scopes: the lexical concurrency boundary.
//!
//! A scope owns every task spawned inside it and a cancellation token the
//! tasks derive from. Leaving the scope body runs the exit protocol —
//! cancel if needed, drain every remaining handle to a terminal state,
//! aggregate failures — so control never returns past the boundary while
//! a child is still live.

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

use super::aggregate::ErrorAggregator;
use crate::cancellation::CancelToken;
use crate::errors::TaskError;
use crate::runtime::{panic_message, RuntimeContext};
use crate::task::{DrainEntry, TaskHandle, TaskId, TaskShared};

/// Lifecycle of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeState {
    /// Accepting spawns; the body is running.
    Open,
    /// The body finished; waiting for remaining handles.
    Draining,
    /// Every owned handle is terminal; the scope may not be reused.
    Closed,
}

impl fmt::Display for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Draining => write!(f, "draining"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Unique identifier for a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(Uuid);

impl ScopeId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State and owned entries, guarded together so spawn checks and drain
/// transitions are atomic.
struct ScopeBook {
    state: ScopeState,
    entries: Vec<Arc<dyn DrainEntry>>,
}

pub(crate) struct ScopeInner {
    ctx: RuntimeContext,
    id: ScopeId,
    token: CancelToken,
    book: Mutex<ScopeBook>,
}

impl ScopeInner {
    /// Removes a joined task from the owned set.
    pub(crate) fn remove_entry(&self, id: TaskId) {
        self.book.lock().entries.retain(|entry| entry.id() != id);
    }
}

/// A lexical concurrency boundary owning a set of tasks and a token.
///
/// Obtained through [`scope`] or [`scope_with_parent`]; the body receives
/// a clone and may hand further clones to its tasks. The exit protocol
/// runs exactly once when the body returns, whatever the exit path.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    fn enter(ctx: &RuntimeContext, parent: Option<&CancelToken>) -> Self {
        let token = parent.map_or_else(|| ctx.root_token(), CancelToken::child);
        let id = ScopeId::new();
        debug!(scope = %id, "scope entered");
        Self {
            inner: Arc::new(ScopeInner {
                ctx: ctx.clone(),
                id,
                token,
                book: Mutex::new(ScopeBook {
                    state: ScopeState::Open,
                    entries: Vec::new(),
                }),
            }),
        }
    }

    /// Spawns a task owned by this scope.
    ///
    /// The body receives a token derived from the scope's token and is
    /// expected to poll it at its suspension points. Returns immediately;
    /// the handle starts `Pending`.
    ///
    /// Spawning on a scope that is no longer `Open` yields a handle
    /// pre-committed to a `Fault` instead of scheduling anything.
    pub fn spawn<T, F, Fut>(&self, body: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let shared = Arc::new(TaskShared::new(self.inner.token.child()));
        {
            let mut book = self.inner.book.lock();
            if book.state != ScopeState::Open {
                let state = book.state;
                drop(book);
                warn!(scope = %self.inner.id, %state, "spawn on closed scope");
                shared.commit(Err(TaskError::fault("spawn on closed scope")));
                return TaskHandle::new(shared, Weak::new());
            }
            book.entries.push(shared.clone() as Arc<dyn DrainEntry>);
        }
        debug!(scope = %self.inner.id, task = %shared.id(), "task spawned");
        self.inner.ctx.drive(shared.clone(), body);
        TaskHandle::new(shared, Arc::downgrade(&self.inner))
    }

    /// Waits for every currently-owned task to reach a terminal state,
    /// sweeping their errors, without closing the scope.
    ///
    /// Errors are aggregated exactly like at scope exit.
    pub async fn join_all(&self) -> Result<(), TaskError> {
        let entries: Vec<Arc<dyn DrainEntry>> =
            std::mem::take(&mut self.inner.book.lock().entries);
        let mut agg = ErrorAggregator::new();
        for entry in entries {
            entry.wait_terminal().await;
            if let Some(error) = entry.sweep() {
                agg.append(error);
            }
        }
        agg.finalize().map_or(Ok(()), Err)
    }

    /// Runs `body` in a child scope whose token derives from this one.
    pub async fn child_scope<T, F, Fut>(&self, body: F) -> Result<T, TaskError>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        run_scope(&self.inner.ctx, Some(&self.inner.token), body).await
    }

    /// Requests cancellation on this scope's token.
    pub fn cancel(&self) {
        self.inner.token.request_cancel();
    }

    /// Returns whether this scope's token is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// This scope's cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancelToken {
        &self.inner.token
    }

    /// The runtime context this scope runs under.
    #[must_use]
    pub fn context(&self) -> &RuntimeContext {
        &self.inner.ctx
    }

    /// This scope's unique id.
    #[must_use]
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ScopeState {
        self.inner.book.lock().state
    }

    /// Number of tasks currently owned by the scope.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.inner.book.lock().entries.len()
    }

    /// Waits for every remaining entry in spawn order, sweeping errors
    /// into `agg`. Marks the scope `Draining` first, which stops further
    /// spawns.
    async fn drain(&self, agg: &mut ErrorAggregator) {
        let entries: Vec<Arc<dyn DrainEntry>> = {
            let mut book = self.inner.book.lock();
            book.state = ScopeState::Draining;
            std::mem::take(&mut book.entries)
        };
        if !entries.is_empty() {
            debug!(scope = %self.inner.id, remaining = entries.len(), "draining scope");
        }
        for entry in entries {
            entry.wait_terminal().await;
            if let Some(error) = entry.sweep() {
                agg.append(error);
            }
        }
    }

    /// The exit protocol. Runs exactly once, after the body resolved.
    async fn exit<T>(&self, body_result: Result<T, TaskError>) -> Result<T, TaskError> {
        let externally_cancelled = self.inner.token.is_cancelled();
        if body_result.is_err() || externally_cancelled {
            self.inner.token.request_cancel();
        }

        let mut agg = ErrorAggregator::new();
        self.drain(&mut agg).await;

        let result = match body_result {
            Ok(value) => match agg.finalize() {
                None => Ok(value),
                Some(error) => Err(error),
            },
            Err(body_error) => {
                // Swept child errors keep spawn order; the body's own
                // error goes last.
                agg.append(body_error.clone());
                Err(agg.finalize().unwrap_or(body_error))
            }
        };

        self.inner.book.lock().state = ScopeState::Closed;
        debug!(scope = %self.inner.id, ok = result.is_ok(), "scope closed");
        result
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("task_count", &self.task_count())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Enters a top-level scope with a fresh root token.
///
/// The body receives the [`Scope`]; when it resolves — normal return,
/// early `?`, or panic (reported as a `Fault`) — the exit protocol drains
/// every remaining task before this call returns.
pub async fn scope<T, F, Fut>(ctx: &RuntimeContext, body: F) -> Result<T, TaskError>
where
    F: FnOnce(Scope) -> Fut,
    Fut: Future<Output = Result<T, TaskError>>,
{
    run_scope(ctx, None, body).await
}

/// Enters a scope whose token derives from `parent`.
///
/// Cancelling `parent` cancels the scope and everything spawned in it;
/// this is how the request-handling layer ties a scope to a connection.
pub async fn scope_with_parent<T, F, Fut>(
    ctx: &RuntimeContext,
    parent: &CancelToken,
    body: F,
) -> Result<T, TaskError>
where
    F: FnOnce(Scope) -> Fut,
    Fut: Future<Output = Result<T, TaskError>>,
{
    run_scope(ctx, Some(parent), body).await
}

async fn run_scope<T, F, Fut>(
    ctx: &RuntimeContext,
    parent: Option<&CancelToken>,
    body: F,
) -> Result<T, TaskError>
where
    F: FnOnce(Scope) -> Fut,
    Fut: Future<Output = Result<T, TaskError>>,
{
    let scope = Scope::enter(ctx, parent);
    let body_result = match AssertUnwindSafe(body(scope.clone())).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Fault(panic_message(&payload))),
    };
    scope.exit(body_result).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::JoinError;
    use crate::task::TaskState;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_scope_spawn_and_join() {
        let ctx = RuntimeContext::new();
        let result = scope(&ctx, |s| async move {
            let handle = s.spawn(|_token| async { Ok(40 + 2) });
            handle.join().await.map_err(TaskError::from)
        })
        .await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_join_removes_entry_from_scope() {
        let ctx = RuntimeContext::new();
        let result = scope(&ctx, |s| async move {
            let handle = s.spawn(|_token| async { Ok(()) });
            assert_eq!(s.task_count(), 1);
            handle.join().await.map_err(TaskError::from)?;
            assert_eq!(s.task_count(), 0);
            Ok(())
        })
        .await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_double_join_rejected() {
        let ctx = RuntimeContext::new();
        scope(&ctx, |s| async move {
            let handle = s.spawn(|_token| async { Ok(5) });
            assert_eq!(handle.join().await, Ok(5));
            assert_eq!(handle.join().await, Err(JoinError::AlreadyJoined));
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_body_error_propagates_after_drain() {
        let ctx = RuntimeContext::new();
        let result: Result<(), _> = scope(&ctx, |s| async move {
            let _handle = s.spawn(|_token| async { Ok(()) });
            Err(TaskError::fault("body failed"))
        })
        .await;
        assert_eq!(result, Err(TaskError::fault("body failed")));
    }

    #[tokio::test]
    async fn test_body_panic_becomes_fault() {
        let ctx = RuntimeContext::new();
        let result: Result<(), _> = scope(&ctx, |_s| async move { panic!("scope body panic") }).await;
        assert_eq!(result, Err(TaskError::fault("scope body panic")));
    }

    #[tokio::test]
    async fn test_unjoined_handles_swept_at_exit() {
        let ctx = RuntimeContext::new();
        let result: Result<(), _> = scope(&ctx, |s| async move {
            let _a = s.spawn(|_token| async { Ok(1) });
            let _b = s.spawn(|_token| async { Err::<i32, _>(TaskError::fault("b failed")) });
            Ok(())
        })
        .await;
        assert_eq!(result, Err(TaskError::fault("b failed")));
    }

    #[tokio::test]
    async fn test_spawn_on_closed_scope_yields_fault() {
        let ctx = RuntimeContext::new();
        let escaped = scope(&ctx, |s| async move { Ok(s) }).await.unwrap();
        assert_eq!(escaped.state(), ScopeState::Closed);

        let handle = escaped.spawn(|_token| async { Ok(()) });
        assert_eq!(handle.state(), TaskState::Failed);
        assert_eq!(
            handle.join().await,
            Err(JoinError::Failed(TaskError::fault("spawn on closed scope")))
        );
    }

    #[tokio::test]
    async fn test_join_all_collects_errors() {
        let ctx = RuntimeContext::new();
        scope(&ctx, |s| async move {
            let _a = s.spawn(|_token| async { Err::<(), _>(TaskError::fault("first")) });
            let _b = s.spawn(|_token| async { Err::<(), _>(TaskError::fault("second")) });
            let result = s.join_all().await;
            assert_eq!(
                result,
                Err(TaskError::Many(vec![
                    TaskError::fault("first"),
                    TaskError::fault("second"),
                ]))
            );
            assert_eq!(s.task_count(), 0);
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_scope_cancel_reaches_tasks() {
        let ctx = RuntimeContext::new();
        let polls = std::sync::Arc::new(AtomicUsize::new(0));
        let probe = polls.clone();

        let result: Result<(), _> = scope(&ctx, |s| async move {
            let handle = s.spawn(move |token| async move {
                loop {
                    if token.is_cancelled() {
                        return Err(TaskError::Cancelled);
                    }
                    probe.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            });
            tokio::task::yield_now().await;
            s.cancel();
            handle.join().await.map_err(TaskError::from)
        })
        .await;

        assert_eq!(result, Err(TaskError::Cancelled));
    }
}
