//! Batching
//!
//! Mutations inside a batch only mark derivations stale; reactions run and
//! unobserved nodes are torn down once the outermost batch ends. Batches
//! nest freely, only the depth counter matters.
//!
//! # Teardown
//!
//! Suspending a computed value detaches it from its own dependencies, which
//! can leave those without observers too. The pending list is therefore
//! walked as a growing work-list until nothing new is appended.

use std::mem;
use std::ops::{Deref, DerefMut};
use std::thread;

use tracing::{debug, debug_span, error, trace};

use super::listener::notify_all;
use super::runtime::Runtime;
use crate::error::ReactiveError;
use crate::graph::NodeId;

impl Runtime {
    /// Open a batch.
    pub fn start_batch(&mut self) {
        self.in_batch += 1;
    }

    /// Close a batch. Closing the outermost batch runs pending reactions
    /// and settles every pending unobservation.
    ///
    /// # Panics
    ///
    /// Panics with [`ReactiveError::UnbalancedBatch`] if no batch is open.
    pub fn end_batch(&mut self) {
        if self.in_batch == 0 {
            panic!("{}", ReactiveError::UnbalancedBatch);
        }
        self.in_batch -= 1;
        if self.in_batch > 0 {
            return;
        }

        self.run_reactions();

        let mut index = 0;
        while index < self.pending_unobservations.len() {
            let observable = self.pending_unobservations[index];
            index += 1;
            self.settle_unobservation(observable);
        }
        self.pending_unobservations.clear();
    }

    /// Open a batch that closes when the returned guard is dropped.
    pub fn begin_batch(&mut self) -> BatchGuard<'_> {
        BatchGuard::new(self)
    }

    /// Run `f` inside a batch.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Runtime) -> R) -> R {
        let mut guard = BatchGuard::new(self);
        f(&mut guard)
    }

    /// Run `f` as an action: batched, untracked, and allowed to change and
    /// read state.
    pub fn action<R>(&mut self, name: &str, f: impl FnOnce(&mut Runtime) -> R) -> R {
        let _span = debug_span!("action", name).entered();
        let mut guard = BatchGuard::new(self);
        guard.context.enter_untracked();
        let prev_changes = mem::replace(&mut guard.allow_state_changes, true);
        let prev_reads = mem::replace(&mut guard.allow_state_reads, true);

        let result = f(&mut guard);

        guard.allow_state_reads = prev_reads;
        guard.allow_state_changes = prev_changes;
        guard.context.exit(None);
        result
    }

    /// Queue `observable` to be checked at the end of the outermost batch.
    pub(crate) fn queue_for_unobservation(&mut self, observable: NodeId) {
        if let Some(meta) = self.graph.observable_mut(observable) {
            if !meta.is_pending_unobservation {
                meta.is_pending_unobservation = true;
                self.pending_unobservations.push(observable);
            }
        }
    }

    /// Drop an observer edge, queueing the observable if it lost its last
    /// observer.
    pub(crate) fn remove_observer(&mut self, observable: NodeId, derivation: NodeId) {
        if self.graph.remove_observer(observable, derivation) {
            self.queue_for_unobservation(observable);
        }
    }

    fn settle_unobservation(&mut self, observable: NodeId) {
        let Some(node) = self.graph.get_mut(observable) else {
            return;
        };
        let is_computed = node.is_computed();
        let Some(meta) = node.observable_mut() else {
            return;
        };
        meta.is_pending_unobservation = false;
        if meta.has_observers() {
            return;
        }

        let hooks = if meta.is_being_observed {
            meta.is_being_observed = false;
            Some(meta.unobserved_listeners.snapshot())
        } else {
            None
        };
        if let Some(hooks) = hooks {
            trace!(observable = %self.display_name(observable), "observable became unobserved");
            notify_all(hooks, observable);
        }
        if is_computed {
            self.suspend_computed(observable);
        }
    }

    /// Run scheduled reactions until none are left.
    ///
    /// No-op inside a batch or while already running. Each round takes the
    /// whole queue; reactions scheduled meanwhile run in the next round. If
    /// the rounds exceed `max_reaction_iterations` the queue is dropped.
    pub(crate) fn run_reactions(&mut self) {
        if self.in_batch > 0 || self.is_running_reactions {
            return;
        }
        self.is_running_reactions = true;

        let mut rounds = 0;
        while !self.pending_reactions.is_empty() {
            rounds += 1;
            if rounds > self.config.max_reaction_iterations {
                let dropped = mem::take(&mut self.pending_reactions);
                error!(
                    limit = self.config.max_reaction_iterations,
                    reaction = %self.display_name(dropped[0]),
                    "reactions did not converge; dropping the queue"
                );
                for reaction in dropped {
                    if let Some(slot) = self.reaction_slot_mut(reaction) {
                        slot.is_scheduled = false;
                    }
                }
                break;
            }

            let round = mem::take(&mut self.pending_reactions);
            debug!(round = rounds, reactions = round.len(), "running reactions");
            for reaction in round {
                self.run_reaction(reaction);
            }
        }

        self.is_running_reactions = false;
    }
}

/// An open batch, closed on drop.
///
/// Derefs to the [`Runtime`], so the batch body keeps full access. If the
/// batch body panics, dropping the guard only restores the depth counter;
/// no reactions run while unwinding.
pub struct BatchGuard<'a> {
    runtime: &'a mut Runtime,
}

impl<'a> BatchGuard<'a> {
    pub fn new(runtime: &'a mut Runtime) -> Self {
        runtime.start_batch();
        Self { runtime }
    }
}

impl Deref for BatchGuard<'_> {
    type Target = Runtime;

    fn deref(&self) -> &Runtime {
        self.runtime
    }
}

impl DerefMut for BatchGuard<'_> {
    fn deref_mut(&mut self) -> &mut Runtime {
        self.runtime
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.runtime.in_batch = self.runtime.in_batch.saturating_sub(1);
        } else {
            self.runtime.end_batch();
        }
    }
}
