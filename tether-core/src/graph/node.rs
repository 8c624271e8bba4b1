//! Graph Nodes
//!
//! This module defines the node records that live in the dependency graph.
//!
//! Every node carries the metadata of the roles it plays:
//!
//! - atoms are observable only,
//! - computed values are both observable and derivations,
//! - reactions are derivations only.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::reactive::{ComputedSlot, Listeners, ReactionSlot};

/// Generational handle to a node in the dependency graph.
///
/// A handle goes stale once its node is removed; the slot may be reused,
/// but with a new generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the arena.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Staleness of a derivation, ordered from freshest to least known.
///
/// Also used on observables as the `lowest_observer_state` hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DerivationState {
    /// All inputs are known to be unchanged since the last run.
    UpToDate,

    /// A computed input may have changed; it must be checked before rerunning.
    PossiblyStale,

    /// An input definitely changed.
    Stale,

    /// The derivation is not tracking anything (never ran, or torn down).
    NotTracking,
}

/// Observable-side bookkeeping.
#[derive(Debug)]
pub struct ObservableMeta {
    pub(crate) observers: IndexSet<NodeId>,
    pub(crate) lowest_observer_state: DerivationState,
    pub(crate) is_being_observed: bool,
    pub(crate) is_pending_unobservation: bool,
    pub(crate) last_accessed_by: u64,
    pub(crate) observed_listeners: Listeners,
    pub(crate) unobserved_listeners: Listeners,
}

impl ObservableMeta {
    fn new(lowest_observer_state: DerivationState) -> Self {
        Self {
            observers: IndexSet::new(),
            lowest_observer_state,
            is_being_observed: false,
            is_pending_unobservation: false,
            last_accessed_by: 0,
            observed_listeners: Listeners::default(),
            unobserved_listeners: Listeners::default(),
        }
    }

    /// Derivations currently depending on this observable.
    pub fn observers(&self) -> &IndexSet<NodeId> {
        &self.observers
    }

    pub fn has_observers(&self) -> bool {
        !self.observers.is_empty()
    }

    /// Conservative lower bound of the observers' states.
    pub fn lowest_observer_state(&self) -> DerivationState {
        self.lowest_observer_state
    }

    pub fn is_being_observed(&self) -> bool {
        self.is_being_observed
    }

    pub fn is_pending_unobservation(&self) -> bool {
        self.is_pending_unobservation
    }

    /// Run id of the last derivation run that read this observable.
    pub fn last_accessed_by(&self) -> u64 {
        self.last_accessed_by
    }
}

/// Derivation-side bookkeeping.
#[derive(Debug)]
pub struct DerivationMeta {
    pub(crate) dependencies_state: DerivationState,
    pub(crate) run_id: u64,
    pub(crate) observing: SmallVec<[NodeId; 4]>,
    pub(crate) stale_listeners: Listeners,
}

impl DerivationMeta {
    fn new() -> Self {
        Self {
            dependencies_state: DerivationState::NotTracking,
            run_id: 0,
            observing: SmallVec::new(),
            stale_listeners: Listeners::default(),
        }
    }

    pub fn dependencies_state(&self) -> DerivationState {
        self.dependencies_state
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Dependency set of the last completed run.
    pub fn observing(&self) -> &[NodeId] {
        &self.observing
    }
}

/// What a node is, with the behaviour payload for derivations.
#[derive(Debug)]
pub enum NodeKind {
    /// A leaf observable with no inputs.
    Atom,

    /// A memoized derivation that is itself observable.
    Computed(ComputedSlot),

    /// A side-effecting derivation.
    Reaction(ReactionSlot),
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    name: Arc<str>,
    kind: NodeKind,
    observable: Option<ObservableMeta>,
    derivation: Option<DerivationMeta>,
}

impl Node {
    /// Create a leaf observable.
    pub(crate) fn atom(name: Arc<str>) -> Self {
        Self {
            name,
            kind: NodeKind::Atom,
            observable: Some(ObservableMeta::new(DerivationState::NotTracking)),
            derivation: None,
        }
    }

    /// Create a computed node. It starts not tracking, with an up-to-date hint.
    pub(crate) fn computed(name: Arc<str>, slot: ComputedSlot) -> Self {
        Self {
            name,
            kind: NodeKind::Computed(slot),
            observable: Some(ObservableMeta::new(DerivationState::UpToDate)),
            derivation: Some(DerivationMeta::new()),
        }
    }

    /// Create a reaction node.
    pub(crate) fn reaction(name: Arc<str>, slot: ReactionSlot) -> Self {
        Self {
            name,
            kind: NodeKind::Reaction(slot),
            observable: None,
            derivation: Some(DerivationMeta::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    pub fn is_computed(&self) -> bool {
        matches!(self.kind, NodeKind::Computed(_))
    }

    pub fn is_reaction(&self) -> bool {
        matches!(self.kind, NodeKind::Reaction(_))
    }

    pub fn observable(&self) -> Option<&ObservableMeta> {
        self.observable.as_ref()
    }

    pub(crate) fn observable_mut(&mut self) -> Option<&mut ObservableMeta> {
        self.observable.as_mut()
    }

    pub fn derivation(&self) -> Option<&DerivationMeta> {
        self.derivation.as_ref()
    }

    pub(crate) fn derivation_mut(&mut self) -> Option<&mut DerivationMeta> {
        self.derivation.as_mut()
    }
}
