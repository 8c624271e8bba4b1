//! Lifecycle listeners.
//!
//! Listeners are side-channel notifications attached to nodes: an
//! observable gaining its first observer or losing its last one, or a
//! derivation becoming stale. They receive the id of the node and have no
//! access to the runtime, so they cannot mutate the graph mid-walk.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::ReactiveError;
use crate::graph::NodeId;

/// Unique identifier for a registered listener.
///
/// Used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback invoked with the id of the node it is attached to.
pub(crate) type Hook = Arc<dyn Fn(NodeId) + Send + Sync>;

/// Callback invoked when a reaction returns an error.
pub(crate) type ErrorHook = Arc<dyn Fn(NodeId, &ReactiveError) + Send + Sync>;

/// Ordered table of listeners of one kind.
pub(crate) struct Listeners<H = Hook> {
    entries: IndexMap<ListenerId, H>,
}

impl<H> Default for Listeners<H> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<H: Clone> Listeners<H> {
    pub(crate) fn insert(&mut self, hook: H) -> ListenerId {
        let id = ListenerId::new();
        self.entries.insert(id, hook);
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        self.entries.shift_remove(&id).is_some()
    }

    /// Clone the hooks out so they can run without borrowing the graph.
    pub(crate) fn snapshot(&self) -> SmallVec<[H; 2]> {
        self.entries.values().cloned().collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Invoke each hook with `node`.
pub(crate) fn notify_all(hooks: SmallVec<[Hook; 2]>, node: NodeId) {
    for hook in hooks {
        hook(node);
    }
}

impl<H> fmt::Debug for Listeners<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}
