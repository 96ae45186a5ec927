use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};

use crate::{
    node::{Body, CodeLocation, Node, NodeId, NodeType},
    util::lock,
};

/// Which teardown a registered cleanup belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CleanupScope {
    /// Registered from an `It` or a `*Each` node; runs after the spec's `AfterEach` nodes.
    Each,
    /// Registered from a `BeforeAll`/`AfterAll`; runs when the Ordered container tears down.
    All(NodeId),
    /// Registered from a suite node; runs after `AfterSuite`.
    Suite,
}

impl CleanupScope {
    fn node_type(self) -> NodeType {
        match self {
            CleanupScope::Each => NodeType::CleanupAfterEach,
            CleanupScope::All(_) => NodeType::CleanupAfterAll,
            CleanupScope::Suite => NodeType::CleanupAfterSuite,
        }
    }
}

#[derive(Debug)]
struct CleanupEntry {
    node: Arc<Node>,
    scope: CleanupScope,
    seq: u64,
}

/// Cleanup ids are allocated from the top of the id space so they never
/// collide with tree nodes.
static NEXT_CLEANUP_ID: AtomicU32 = AtomicU32::new(u32::MAX);

/// Dynamically registered cleanup nodes (`DeferCleanup`).
///
/// Registration may happen from any thread a body spawns; draining happens
/// on the runner thread.
#[derive(Debug, Default)]
pub(crate) struct CleanupStack {
    entries: Mutex<Vec<CleanupEntry>>,
    seq: Mutex<u64>,
}

impl CleanupStack {
    pub fn push(&self, body: Body, scope: CleanupScope, nesting_level: usize, location: CodeLocation) {
        let id = NodeId(NEXT_CLEANUP_ID.fetch_sub(1, Ordering::Relaxed));
        let node = Node::new(id, scope.node_type(), "", location, nesting_level).with_body(body);
        let seq = {
            let mut seq = lock(&self.seq);
            *seq += 1;
            *seq
        };
        lock(&self.entries).push(CleanupEntry {
            node: Arc::new(node),
            scope,
            seq,
        });
    }

    /// Remove and return the cleanups matching `pred`, in execution order:
    /// innermost level first, last registered first within a level.
    pub fn drain(&self, mut pred: impl FnMut(CleanupScope, usize) -> bool) -> Vec<Arc<Node>> {
        let mut entries = lock(&self.entries);
        let (mut taken, kept): (Vec<_>, Vec<_>) = entries
            .drain(..)
            .partition(|entry| pred(entry.scope, entry.node.nesting_level));
        *entries = kept;
        drop(entries);

        taken.sort_by(|a, b| {
            b.node
                .nesting_level
                .cmp(&a.node.nesting_level)
                .then(b.seq.cmp(&a.seq))
        });
        taken.into_iter().map(|entry| entry.node).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }
}
