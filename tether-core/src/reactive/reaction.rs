//! Reactions
//!
//! A reaction is a derivation with side effects. It is never read by
//! anything; instead, whenever it becomes stale it is scheduled, and the
//! scheduler calls its invalidation handler once the outermost batch ends.
//!
//! The handler decides what to do. Typically it calls [`Reaction::track`]
//! to rerun a view function and record fresh dependencies, as
//! [`Runtime::autorun`] does.
//!
//! # Lifecycle
//!
//! 1. Creation: the node is inserted, not tracking anything.
//! 2. Scheduling: [`Reaction::schedule`] queues it and runs the queue
//!    unless a batch is open.
//! 3. Running: if its dependencies really changed, the handler is called.
//! 4. Disposal: dependencies are released. A reaction disposed while it is
//!    tracking is released when the tracked run returns.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use super::runtime::Runtime;
use crate::error::{ReactiveError, Result};
use crate::graph::{Node, NodeId, NodeKind};

type InvalidateFn = Box<dyn FnMut(&mut Runtime, Reaction) -> Result<()> + Send>;

/// Graph-side state of a reaction node.
pub struct ReactionSlot {
    on_invalidate: Arc<Mutex<InvalidateFn>>,
    pub(crate) is_scheduled: bool,
    pub(crate) is_disposed: bool,
    pub(crate) is_running: bool,
    pub(crate) is_track_pending: bool,
}

impl ReactionSlot {
    pub(crate) fn new<F>(on_invalidate: F) -> Self
    where
        F: FnMut(&mut Runtime, Reaction) -> Result<()> + Send + 'static,
    {
        Self {
            on_invalidate: Arc::new(Mutex::new(Box::new(on_invalidate))),
            is_scheduled: false,
            is_disposed: false,
            is_running: false,
            is_track_pending: false,
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.is_scheduled
    }

    pub fn is_disposed(&self) -> bool {
        self.is_disposed
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }
}

impl fmt::Debug for ReactionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactionSlot")
            .field("is_scheduled", &self.is_scheduled)
            .field("is_disposed", &self.is_disposed)
            .field("is_running", &self.is_running)
            .field("is_track_pending", &self.is_track_pending)
            .finish_non_exhaustive()
    }
}

/// Handle to a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reaction {
    id: NodeId,
}

impl Reaction {
    /// Create a reaction. It does nothing until scheduled.
    ///
    /// `on_invalidate` is called whenever the reaction must rerun; errors it
    /// returns are logged and passed to the reaction error listeners.
    pub fn new<F>(rt: &mut Runtime, name: impl Into<Arc<str>>, on_invalidate: F) -> Self
    where
        F: FnMut(&mut Runtime, Reaction) -> Result<()> + Send + 'static,
    {
        let id = rt
            .graph
            .insert(Node::reaction(name.into(), ReactionSlot::new(on_invalidate)));
        Self { id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Queue the reaction and run the queue unless a batch is open.
    pub fn schedule(&self, rt: &mut Runtime) {
        rt.schedule_reaction(self.id);
    }

    /// Run `f` as a tracked run of this reaction.
    pub fn track<R>(&self, rt: &mut Runtime, f: impl FnOnce(&mut Runtime) -> R) -> Result<R> {
        rt.track_reaction(self.id, f)
    }

    /// Release the reaction's dependencies and remove it from the graph.
    pub fn dispose(&self, rt: &mut Runtime) {
        rt.dispose_reaction(self.id);
    }

    pub fn is_disposed(&self, rt: &Runtime) -> bool {
        rt.reaction_slot(self.id).map_or(true, |slot| slot.is_disposed)
    }

    pub fn is_scheduled(&self, rt: &Runtime) -> bool {
        rt.reaction_slot(self.id).is_some_and(|slot| slot.is_scheduled)
    }

    pub fn is_running(&self, rt: &Runtime) -> bool {
        rt.reaction_slot(self.id).is_some_and(|slot| slot.is_running)
    }
}

impl Runtime {
    pub(crate) fn reaction_slot(&self, id: NodeId) -> Option<&ReactionSlot> {
        match self.graph.get(id)?.kind() {
            NodeKind::Reaction(slot) => Some(slot),
            _ => None,
        }
    }

    pub(crate) fn reaction_slot_mut(&mut self, id: NodeId) -> Option<&mut ReactionSlot> {
        match self.graph.get_mut(id)?.kind_mut() {
            NodeKind::Reaction(slot) => Some(slot),
            _ => None,
        }
    }

    /// Run `view` now and again whenever anything it read changes.
    pub fn autorun<F>(&mut self, name: impl Into<Arc<str>>, mut view: F) -> Reaction
    where
        F: FnMut(&mut Runtime) -> Result<()> + Send + 'static,
    {
        let reaction = Reaction::new(self, name, move |rt, reaction| {
            reaction.track(rt, |rt| view(rt))?
        });
        reaction.schedule(self);
        reaction
    }

    /// Track `expression` and run `effect` with its value whenever the
    /// value changes. The effect does not run for the initial value.
    pub fn reaction<T, E, F>(
        &mut self,
        name: impl Into<Arc<str>>,
        mut expression: E,
        mut effect: F,
    ) -> Reaction
    where
        T: PartialEq + Send + 'static,
        E: FnMut(&mut Runtime) -> Result<T> + Send + 'static,
        F: FnMut(&mut Runtime, &T) -> Result<()> + Send + 'static,
    {
        let mut previous: Option<T> = None;
        let reaction = Reaction::new(self, name, move |rt, reaction| {
            let value = reaction.track(rt, |rt| expression(rt))??;
            let changed = previous.as_ref().is_some_and(|prev| *prev != value);
            let result = if changed {
                rt.action("reaction effect", |rt| effect(rt, &value))
            } else {
                Ok(())
            };
            previous = Some(value);
            result
        });
        reaction.schedule(self);
        reaction
    }

    pub(crate) fn schedule_reaction(&mut self, id: NodeId) {
        let Some(slot) = self.reaction_slot_mut(id) else {
            return;
        };
        if slot.is_scheduled || slot.is_disposed {
            return;
        }
        slot.is_scheduled = true;
        self.pending_reactions.push(id);
        self.run_reactions();
    }

    /// Run one scheduled reaction if its dependencies really changed.
    pub(crate) fn run_reaction(&mut self, id: NodeId) {
        let handler = match self.reaction_slot_mut(id) {
            Some(slot) => {
                slot.is_scheduled = false;
                if slot.is_disposed {
                    return;
                }
                Arc::clone(&slot.on_invalidate)
            }
            None => return,
        };

        self.start_batch();
        if self.should_compute(id) {
            if let Some(slot) = self.reaction_slot_mut(id) {
                slot.is_track_pending = true;
            }
            debug!(reaction = %self.display_name(id), "running reaction");
            let result = {
                let mut on_invalidate = handler.lock();
                (&mut **on_invalidate)(self, Reaction { id })
            };
            if let Err(err) = result {
                self.report_reaction_error(id, &err);
            }
        }
        self.end_batch();
    }

    pub(crate) fn track_reaction<R>(&mut self, id: NodeId, f: impl FnOnce(&mut Runtime) -> R) -> Result<R> {
        match self.reaction_slot(id).map(|slot| slot.is_disposed) {
            None => return Err(self.kind_error(id, "a reaction")),
            Some(true) => {
                return Err(ReactiveError::Disposed {
                    name: self.owned_name(id),
                })
            }
            Some(false) => {}
        }

        self.start_batch();
        if let Some(slot) = self.reaction_slot_mut(id) {
            slot.is_running = true;
        }
        let result = self.track(id, f);
        let disposed = match self.reaction_slot_mut(id) {
            Some(slot) => {
                slot.is_running = false;
                slot.is_track_pending = false;
                slot.is_disposed
            }
            None => false,
        };
        if disposed {
            self.release_reaction(id);
        }
        self.end_batch();
        result
    }

    pub(crate) fn dispose_reaction(&mut self, id: NodeId) {
        let running = match self.reaction_slot_mut(id) {
            Some(slot) if !slot.is_disposed => {
                slot.is_disposed = true;
                slot.is_running
            }
            _ => return,
        };
        if !running {
            self.start_batch();
            self.release_reaction(id);
            self.end_batch();
        }
    }

    fn release_reaction(&mut self, id: NodeId) {
        self.clear_observing(id);
        self.pending_reactions.retain(|pending| *pending != id);
        trace!(reaction = %self.display_name(id), "reaction released");
        self.graph.remove(id);
    }

    fn report_reaction_error(&mut self, id: NodeId, err: &ReactiveError) {
        error!(reaction = %self.display_name(id), error = %err, "reaction failed");
        for listener in self.error_listeners.snapshot() {
            listener(id, err);
        }
    }
}
