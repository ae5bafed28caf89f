//! Index-addressed arena backing the cancellation token tree.
//!
//! Parent/child links are plain indices into a slab, so cancellation
//! propagation is a tree walk over indices rather than a pointer graph.
//! Child lists keep registration order, which is the order the walk
//! visits siblings in.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// One node in the token tree.
struct TokenNode {
    /// The monotonic cancel flag, shared with the public handle.
    flag: Arc<AtomicBool>,
    /// Wakes async waiters when the flag flips.
    notify: Arc<Notify>,
    /// Parent index, if any.
    parent: Option<usize>,
    /// Child indices in registration order.
    children: Vec<usize>,
}

#[derive(Default)]
struct ArenaInner {
    nodes: Vec<Option<TokenNode>>,
    free: Vec<usize>,
}

/// Arena of cancellation tree nodes.
///
/// All structural mutation (alloc, release) takes the write lock;
/// cancellation walks take the read lock, so a walk always sees a
/// consistent tree and `alloc` can never interleave with it.
#[derive(Default)]
pub(crate) struct TokenArena {
    inner: RwLock<ArenaInner>,
}

/// What `alloc` hands back to the token constructor.
pub(crate) struct AllocatedNode {
    pub(crate) index: usize,
    pub(crate) flag: Arc<AtomicBool>,
    pub(crate) notify: Arc<Notify>,
}

impl TokenArena {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocates a node under `parent`.
    ///
    /// A node derived from a cancelled parent is born cancelled.
    pub(crate) fn alloc(&self, parent: Option<usize>) -> AllocatedNode {
        let mut inner = self.inner.write();

        let born_cancelled = parent
            .and_then(|p| inner.nodes.get(p).and_then(Option::as_ref))
            .is_some_and(|node| node.flag.load(Ordering::SeqCst));

        let node = TokenNode {
            flag: Arc::new(AtomicBool::new(born_cancelled)),
            notify: Arc::new(Notify::new()),
            parent,
            children: Vec::new(),
        };
        let flag = node.flag.clone();
        let notify = node.notify.clone();

        let index = if let Some(index) = inner.free.pop() {
            inner.nodes[index] = Some(node);
            index
        } else {
            inner.nodes.push(Some(node));
            inner.nodes.len() - 1
        };

        if let Some(p) = parent {
            if let Some(parent_node) = inner.nodes.get_mut(p).and_then(Option::as_mut) {
                parent_node.children.push(index);
            }
        }

        AllocatedNode { index, flag, notify }
    }

    /// Cancels the subtree rooted at `index`.
    ///
    /// Flips and notifies every descendant before returning. Siblings are
    /// visited in registration order. A node that is already cancelled is
    /// skipped together with its subtree: its descendants were flipped by
    /// the earlier walk, and nodes derived since were born cancelled.
    pub(crate) fn cancel(&self, index: usize) {
        let inner = self.inner.read();
        let mut pending = vec![index];
        while let Some(i) = pending.pop() {
            let Some(node) = inner.nodes.get(i).and_then(Option::as_ref) else {
                continue;
            };
            if node.flag.swap(true, Ordering::SeqCst) {
                continue;
            }
            node.notify.notify_waiters();
            // Reversed push so the stack pops children in registration order.
            pending.extend(node.children.iter().rev().copied());
        }
    }

    /// Releases the node at `index`, detaching it from its parent and
    /// freeing the slot for reuse.
    ///
    /// Tokens release child-before-parent in practice (a scope closes only
    /// after its children are terminal), but any children still present
    /// are re-parented onto the released node's parent so propagation from
    /// above keeps reaching them.
    pub(crate) fn release(&self, index: usize) {
        let mut inner = self.inner.write();
        let Some(node) = inner.nodes.get_mut(index).and_then(Option::take) else {
            return;
        };

        if let Some(p) = node.parent {
            if let Some(parent_node) = inner.nodes.get_mut(p).and_then(Option::as_mut) {
                if let Some(pos) = parent_node.children.iter().position(|&c| c == index) {
                    // Splice orphans in place to preserve sibling order.
                    parent_node
                        .children
                        .splice(pos..=pos, node.children.iter().copied());
                }
            }
        }
        for &child in &node.children {
            if let Some(child_node) = inner.nodes.get_mut(child).and_then(Option::as_mut) {
                child_node.parent = node.parent;
            }
        }

        inner.free.push(index);
    }

    /// Number of live nodes.
    #[cfg(test)]
    pub(crate) fn live_count(&self) -> usize {
        self.inner.read().nodes.iter().filter(|n| n.is_some()).count()
    }
}
