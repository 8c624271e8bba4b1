//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects atoms, computed
//! values, and reactions. It owns the dependency graph together with the
//! scheduler state every engine operation consults:
//!
//! - the tracking stack (which derivation is running, and what it read),
//! - the batch depth,
//! - the queue of observables pending unobservation,
//! - the queue of scheduled reactions,
//! - the run id counter.
//!
//! # Threading
//!
//! A runtime is an explicit context object passed by `&mut` to every entry
//! point; nothing is global. It is `Send`, so a multi-threaded host can
//! place it behind one lock with [`SharedRuntime`] and serialise all graph
//! mutation through it.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::context::TrackingStack;
use super::listener::{ErrorHook, ListenerId, Listeners};
use crate::config::{EnforceActions, RuntimeConfig};
use crate::error::{ReactiveError, Result};
use crate::graph::{DerivationMeta, DerivationState, Graph, NodeId, ObservableMeta};

/// Owner of one reactive graph and its scheduler state.
pub struct Runtime {
    pub(crate) graph: Graph,
    pub(crate) config: RuntimeConfig,
    pub(crate) context: TrackingStack,
    pub(crate) in_batch: u32,
    pub(crate) run_id_counter: u64,
    pub(crate) pending_unobservations: Vec<NodeId>,
    pub(crate) pending_reactions: Vec<NodeId>,
    pub(crate) is_running_reactions: bool,
    pub(crate) allow_state_reads: bool,
    pub(crate) allow_state_changes: bool,
    pub(crate) computation_depth: u32,
    pub(crate) error_listeners: Listeners<ErrorHook>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given policies.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            graph: Graph::new(),
            allow_state_reads: !config.observable_requires_reaction,
            allow_state_changes: config.enforce_actions == EnforceActions::Never,
            config,
            context: TrackingStack::default(),
            in_batch: 0,
            run_id_counter: 0,
            pending_unobservations: Vec::new(),
            pending_reactions: Vec::new(),
            is_running_reactions: false,
            computation_depth: 0,
            error_listeners: Listeners::default(),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Read-only view of the dependency graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn node_count(&self) -> usize {
        self.graph.len()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.graph.contains(id)
    }

    /// Diagnostic name of a node.
    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.graph.get(id).map(|node| node.name())
    }

    pub(crate) fn display_name(&self, id: NodeId) -> &str {
        self.name(id).unwrap_or("<disposed>")
    }

    pub(crate) fn owned_name(&self, id: NodeId) -> String {
        self.graph
            .get(id)
            .map_or_else(|| id.to_string(), |node| node.name().to_owned())
    }

    /// Error describing why `id` cannot be used as `expected`.
    pub(crate) fn kind_error(&self, id: NodeId, expected: &'static str) -> ReactiveError {
        match self.graph.get(id) {
            Some(node) => ReactiveError::WrongKind {
                name: node.name().to_owned(),
                expected,
            },
            None => ReactiveError::UnknownNode(id),
        }
    }

    pub(crate) fn observable_meta(&self, id: NodeId) -> Result<&ObservableMeta> {
        self.graph
            .observable(id)
            .ok_or_else(|| self.kind_error(id, "an observable"))
    }

    pub(crate) fn observable_meta_mut(&mut self, id: NodeId) -> Result<&mut ObservableMeta> {
        if self.graph.observable(id).is_none() {
            return Err(self.kind_error(id, "an observable"));
        }
        self.graph
            .observable_mut(id)
            .ok_or(ReactiveError::UnknownNode(id))
    }

    pub(crate) fn derivation_meta_mut(&mut self, id: NodeId) -> Result<&mut DerivationMeta> {
        if self.graph.derivation(id).is_none() {
            return Err(self.kind_error(id, "a derivation"));
        }
        self.graph
            .derivation_mut(id)
            .ok_or(ReactiveError::UnknownNode(id))
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Derivations currently observing `observable`.
    pub fn observers(&self, observable: NodeId) -> Vec<NodeId> {
        self.graph
            .observable(observable)
            .map(|meta| meta.observers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Dependencies recorded by the last completed run of `derivation`.
    pub fn observing(&self, derivation: NodeId) -> Vec<NodeId> {
        self.graph
            .derivation(derivation)
            .map(|meta| meta.observing.to_vec())
            .unwrap_or_default()
    }

    /// Reads accumulated so far by an in-progress run of `derivation`.
    pub fn new_observing(&self, derivation: NodeId) -> Option<Vec<NodeId>> {
        self.context.pending(derivation).map(<[NodeId]>::to_vec)
    }

    pub fn lowest_observer_state(&self, observable: NodeId) -> Option<DerivationState> {
        self.graph
            .observable(observable)
            .map(|meta| meta.lowest_observer_state)
    }

    pub fn dependencies_state(&self, derivation: NodeId) -> Option<DerivationState> {
        self.graph.dependencies_state(derivation)
    }

    pub fn run_id(&self, derivation: NodeId) -> Option<u64> {
        self.graph.derivation(derivation).map(|meta| meta.run_id)
    }

    pub fn last_accessed_by(&self, observable: NodeId) -> Option<u64> {
        self.graph
            .observable(observable)
            .map(|meta| meta.last_accessed_by)
    }

    pub fn is_being_observed(&self, observable: NodeId) -> bool {
        self.graph
            .observable(observable)
            .is_some_and(|meta| meta.is_being_observed)
    }

    pub fn is_pending_unobservation(&self, observable: NodeId) -> bool {
        self.graph
            .observable(observable)
            .is_some_and(|meta| meta.is_pending_unobservation)
    }

    /// Current batch depth; zero means no batch is open.
    pub fn in_batch(&self) -> u32 {
        self.in_batch
    }

    pub fn is_tracking(&self) -> bool {
        self.context.is_tracking()
    }

    /// The derivation whose reads are currently being recorded.
    pub fn tracking_derivation(&self) -> Option<NodeId> {
        self.context.current().map(|(derivation, _)| derivation)
    }

    pub fn pending_unobservations(&self) -> &[NodeId] {
        &self.pending_unobservations
    }

    pub fn pending_reactions(&self) -> &[NodeId] {
        &self.pending_reactions
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Call `listener` whenever `observable` gains its first observer.
    pub fn on_become_observed<F>(&mut self, observable: NodeId, listener: F) -> Result<ListenerId>
    where
        F: Fn(NodeId) + Send + Sync + 'static,
    {
        let meta = self.observable_meta_mut(observable)?;
        Ok(meta.observed_listeners.insert(Arc::new(listener)))
    }

    /// Call `listener` whenever `observable` loses its last observer at the
    /// end of a batch.
    ///
    /// For a computed value the listener runs before the value is
    /// suspended, so its cache is still readable.
    pub fn on_become_unobserved<F>(&mut self, observable: NodeId, listener: F) -> Result<ListenerId>
    where
        F: Fn(NodeId) + Send + Sync + 'static,
    {
        let meta = self.observable_meta_mut(observable)?;
        Ok(meta.unobserved_listeners.insert(Arc::new(listener)))
    }

    /// Call `listener` whenever `derivation` leaves the up-to-date state.
    pub fn on_become_stale<F>(&mut self, derivation: NodeId, listener: F) -> Result<ListenerId>
    where
        F: Fn(NodeId) + Send + Sync + 'static,
    {
        let meta = self.derivation_meta_mut(derivation)?;
        Ok(meta.stale_listeners.insert(Arc::new(listener)))
    }

    /// Remove a listener registered on `node`.
    pub fn remove_listener(&mut self, node: NodeId, listener: ListenerId) -> bool {
        let Some(node) = self.graph.get_mut(node) else {
            return false;
        };
        let mut removed = false;
        if let Some(meta) = node.observable_mut() {
            removed |= meta.observed_listeners.remove(listener);
            removed |= meta.unobserved_listeners.remove(listener);
        }
        if let Some(meta) = node.derivation_mut() {
            removed |= meta.stale_listeners.remove(listener);
        }
        removed
    }

    /// Call `listener` with every error a reaction returns.
    pub fn on_reaction_error<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(NodeId, &ReactiveError) + Send + Sync + 'static,
    {
        self.error_listeners.insert(Arc::new(listener))
    }

    pub fn remove_reaction_error_listener(&mut self, listener: ListenerId) -> bool {
        self.error_listeners.remove(listener)
    }

    // ------------------------------------------------------------------
    // Disposal
    // ------------------------------------------------------------------

    /// Remove a node from the graph.
    ///
    /// Reactions are disposed (deferred to the end of their run if they are
    /// running). Observables must no longer be observed; a computed value
    /// also drops its own dependency edges.
    pub fn dispose(&mut self, id: NodeId) -> Result<()> {
        let node = self.graph.get(id).ok_or(ReactiveError::UnknownNode(id))?;
        if node.is_reaction() {
            self.dispose_reaction(id);
            return Ok(());
        }

        let observers = node.observable().map_or(0, |meta| meta.observers.len());
        if observers > 0 {
            return Err(ReactiveError::StillObserved {
                name: node.name().to_owned(),
                observers,
            });
        }

        let is_computed = node.is_computed();
        self.start_batch();
        if is_computed {
            self.clear_observing(id);
        }
        self.graph.remove(id);
        self.end_batch();
        trace!(node = %id, "node disposed");
        Ok(())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("nodes", &self.graph.len())
            .field("in_batch", &self.in_batch)
            .field("tracking", &self.tracking_derivation())
            .field("pending_unobservations", &self.pending_unobservations.len())
            .field("pending_reactions", &self.pending_reactions.len())
            .field("run_id_counter", &self.run_id_counter)
            .finish()
    }
}

/// A runtime behind a mutex, for hosts that touch the graph from several
/// threads.
///
/// Every closure passed to [`SharedRuntime::with`] runs with exclusive
/// access, so no propagation walk ever observes a concurrent mutation.
#[derive(Clone, Default)]
pub struct SharedRuntime {
    inner: Arc<Mutex<Runtime>>,
}

impl SharedRuntime {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            inner: Arc::new(Mutex::new(runtime)),
        }
    }

    /// Run `f` with exclusive access to the runtime.
    pub fn with<R>(&self, f: impl FnOnce(&mut Runtime) -> R) -> R {
        let mut runtime = self.inner.lock();
        f(&mut runtime)
    }

    /// Like [`with`](Self::with), but returns `None` instead of waiting.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut Runtime) -> R) -> Option<R> {
        let mut runtime = self.inner.try_lock()?;
        Some(f(&mut runtime))
    }
}

impl fmt::Debug for SharedRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRuntime")
            .field("locked", &self.inner.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Atom, ObservableValue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn assert_send<T: Send>() {}

    #[test]
    fn runtime_is_send() {
        assert_send::<Runtime>();
        assert_send::<SharedRuntime>();
    }

    #[test]
    fn fresh_runtime_is_quiescent() {
        let rt = Runtime::new();
        assert_eq!(rt.in_batch(), 0);
        assert!(!rt.is_tracking());
        assert!(rt.pending_unobservations().is_empty());
        assert_eq!(rt.node_count(), 0);
    }

    #[test]
    fn dispose_unobserved_atom() {
        let mut rt = Runtime::new();
        let atom = Atom::new(&mut rt, "a");

        rt.dispose(atom.id()).unwrap();
        assert!(!rt.contains(atom.id()));
        assert_eq!(
            rt.dispose(atom.id()),
            Err(ReactiveError::UnknownNode(atom.id()))
        );
    }

    #[test]
    fn dispose_refuses_observed_atom() {
        let mut rt = Runtime::new();
        let value = ObservableValue::new(&mut rt, "v", 1);
        let reader = value.clone();
        let _watch = rt.autorun("watch", move |rt| reader.get(rt).map(drop));

        let err = rt.dispose(value.id()).unwrap_err();
        assert_eq!(
            err,
            ReactiveError::StillObserved {
                name: "v".into(),
                observers: 1
            }
        );
    }

    #[test]
    fn listeners_can_be_removed() {
        let mut rt = Runtime::new();
        let atom = Atom::new(&mut rt, "a");
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = calls.clone();
        let listener = rt
            .on_become_observed(atom.id(), move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(rt.remove_listener(atom.id(), listener));
        assert!(!rt.remove_listener(atom.id(), listener));

        let _watch = rt.autorun("watch", move |rt| atom.report_observed(rt).map(drop));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stale_listener_requires_derivation() {
        let mut rt = Runtime::new();
        let atom = Atom::new(&mut rt, "a");

        let err = rt.on_become_stale(atom.id(), |_| {}).unwrap_err();
        assert_eq!(
            err,
            ReactiveError::WrongKind {
                name: "a".into(),
                expected: "a derivation"
            }
        );
    }

    #[test]
    fn shared_runtime_serialises_threads() {
        let shared = SharedRuntime::default();
        let value = shared.with(|rt| ObservableValue::new(rt, "counter", 0u64));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                let value = value.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        shared.with(|rt| value.update(rt, |v| v + 1)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(value.get_untracked(), 400);
    }
}
