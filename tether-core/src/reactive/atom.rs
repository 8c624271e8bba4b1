//! Atoms
//!
//! An atom is the smallest observable: it holds no value of its own, it
//! only reports reads and changes. Data structures that keep their state
//! outside the graph use an atom to take part in tracking.

use std::sync::Arc;

use super::listener::ListenerId;
use super::runtime::Runtime;
use crate::error::Result;
use crate::graph::{Node, NodeId};

/// Handle to a leaf observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Atom {
    id: NodeId,
}

impl Atom {
    pub fn new(rt: &mut Runtime, name: impl Into<Arc<str>>) -> Self {
        Self {
            id: rt.graph.insert(Node::atom(name.into())),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Report a read. Returns whether a derivation recorded it.
    pub fn report_observed(&self, rt: &mut Runtime) -> Result<bool> {
        rt.report_observed(self.id)
    }

    /// Report a change and notify dependents.
    pub fn report_changed(&self, rt: &mut Runtime) -> Result<()> {
        rt.report_changed(self.id)
    }

    pub fn on_become_observed<F>(&self, rt: &mut Runtime, listener: F) -> Result<ListenerId>
    where
        F: Fn(NodeId) + Send + Sync + 'static,
    {
        rt.on_become_observed(self.id, listener)
    }

    pub fn on_become_unobserved<F>(&self, rt: &mut Runtime, listener: F) -> Result<ListenerId>
    where
        F: Fn(NodeId) + Send + Sync + 'static,
    {
        rt.on_become_unobserved(self.id, listener)
    }

    pub fn dispose(&self, rt: &mut Runtime) -> Result<()> {
        rt.dispose(self.id)
    }
}

impl Runtime {
    /// Report that `observable` changed, after checking the write policy.
    pub fn report_changed(&mut self, observable: NodeId) -> Result<()> {
        self.check_state_change(observable)?;
        self.notify_changed(observable);
        Ok(())
    }

    /// Propagate a change of `observable` inside a batch.
    pub(crate) fn notify_changed(&mut self, observable: NodeId) {
        self.start_batch();
        self.propagate_changed(observable);
        self.end_batch();
    }
}
