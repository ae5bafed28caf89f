//! Cancellation token for cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use super::arena::TokenArena;

struct TokenShared {
    arena: Arc<TokenArena>,
    index: usize,
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Drop for TokenShared {
    fn drop(&mut self) {
        self.arena.release(self.index);
    }
}

/// A monotonic, tree-propagated cancel signal.
///
/// Tokens form a parent/child tree; cancelling one cancels its whole
/// subtree synchronously with respect to the call. Cancellation never
/// stops running code by itself — it only makes the flag observable, and
/// tasks act on it at their suspension points.
///
/// Cloning is cheap and shares the same tree node; the node's arena slot
/// is released when the last clone drops.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenShared>,
}

impl CancelToken {
    /// Creates a parentless token in `arena`.
    pub(crate) fn root(arena: Arc<TokenArena>) -> Self {
        Self::alloc(arena, None)
    }

    fn alloc(arena: Arc<TokenArena>, parent: Option<usize>) -> Self {
        let node = arena.alloc(parent);
        Self {
            inner: Arc::new(TokenShared {
                arena,
                index: node.index,
                flag: node.flag,
                notify: node.notify,
            }),
        }
    }

    /// Derives a child token under this one.
    ///
    /// A child derived from a cancelled parent is born cancelled.
    #[must_use]
    pub fn child(&self) -> Self {
        Self::alloc(self.inner.arena.clone(), Some(self.inner.index))
    }

    /// Requests cancellation.
    ///
    /// Idempotent. On the first call the entire subtree has observed the
    /// transition by the time this returns.
    pub fn request_cancel(&self) {
        if !self.is_cancelled() {
            debug!(token = self.inner.index, "cancellation requested");
        }
        self.inner.arena.cancel(self.inner.index);
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Suspends until this token is cancelled.
    ///
    /// Resolves immediately if the token is already cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_token() -> CancelToken {
        CancelToken::root(TokenArena::new())
    }

    #[test]
    fn test_token_default_not_cancelled() {
        let token = root_token();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let token = root_token();
        token.request_cancel();
        token.request_cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let root = root_token();
        let mid = root.child();
        let leaf = mid.child();

        root.request_cancel();
        assert!(mid.is_cancelled());
        assert!(leaf.is_cancelled());
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let root = root_token();
        let child = root.child();

        child.request_cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_parent_is_born_cancelled() {
        let root = root_token();
        root.request_cancel();
        assert!(root.child().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wait_resolves() {
        let token = root_token();
        let waiter = token.clone();
        let wait = tokio::spawn(async move { waiter.cancelled().await });

        tokio::task::yield_now().await;
        token.request_cancel();
        wait.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_wait_on_already_cancelled() {
        let token = root_token();
        token.request_cancel();
        token.cancelled().await;
    }
}
