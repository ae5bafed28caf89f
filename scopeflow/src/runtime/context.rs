//! Explicit runtime context.
//!
//! There is no ambient scheduler singleton: everything a scope needs — the
//! clock capability, the token arena, and the runtime handle tasks are
//! driven on — lives in a [`RuntimeContext`] constructed at startup and
//! passed to (or captured by) every scope. Tests build independent
//! contexts to avoid cross-test interference.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::debug;

use super::clock::{Clock, TokioClock};
use crate::cancellation::arena::TokenArena;
use crate::cancellation::CancelToken;
use crate::errors::TaskError;
use crate::task::TaskShared;

/// Runtime context shared by every scope spawned under it.
///
/// Cloning is cheap; clones share the same clock, token arena, and
/// runtime handle.
#[derive(Clone)]
pub struct RuntimeContext {
    clock: Arc<dyn Clock>,
    arena: Arc<TokenArena>,
    handle: tokio::runtime::Handle,
}

impl RuntimeContext {
    /// Creates a context on the current tokio runtime with the production
    /// clock.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns a builder for customizing the context.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// The clock capability.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Creates a fresh parentless cancellation token.
    ///
    /// The request-handling layer holds one of these per inbound unit of
    /// work and cancels it on disconnect.
    #[must_use]
    pub fn root_token(&self) -> CancelToken {
        CancelToken::root(self.arena.clone())
    }

    /// Drives a task body to completion on the runtime.
    ///
    /// Marks the task running, converts a panic into a `Fault`, and
    /// commits the outcome first-writer-wins.
    pub(crate) fn drive<T, F, Fut>(&self, shared: Arc<TaskShared<T>>, body: F)
    where
        T: Send + 'static,
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let token = shared.token().clone();
        self.handle.spawn(async move {
            shared.mark_running();
            let outcome = match AssertUnwindSafe(body(token)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(TaskError::Fault(panic_message(&payload))),
            };
            if !shared.commit(outcome) {
                debug!(task = %shared.id(), "terminal state already committed");
            }
        });
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext").finish_non_exhaustive()
    }
}

/// Builder for [`RuntimeContext`].
#[derive(Default)]
pub struct RuntimeBuilder {
    clock: Option<Arc<dyn Clock>>,
    handle: Option<tokio::runtime::Handle>,
}

impl RuntimeBuilder {
    /// Substitutes the clock capability.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Drives tasks on an explicit runtime handle instead of the current
    /// one.
    #[must_use]
    pub fn with_handle(mut self, handle: tokio::runtime::Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Builds the context.
    ///
    /// # Panics
    ///
    /// Panics when no handle was given and there is no current tokio
    /// runtime.
    #[must_use]
    pub fn build(self) -> RuntimeContext {
        let handle = self
            .handle
            .unwrap_or_else(tokio::runtime::Handle::current);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(TokioClock::with_handle(handle.clone())));
        RuntimeContext {
            clock,
            arena: TokenArena::new(),
            handle,
        }
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
