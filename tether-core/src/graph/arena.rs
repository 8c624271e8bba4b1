//! Node Arena
//!
//! The graph owns every node in a generational arena. Edges are stored as
//! a bidirectional index: each observable keeps the set of derivations
//! observing it and each derivation keeps the list of observables it read.
//! Neither side owns the other, so removing a node never leaves a dangling
//! reference, only a stale [`NodeId`] that fails lookups.

use super::node::{DerivationMeta, DerivationState, Node, NodeId, ObservableMeta};

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Generational arena holding every node of one runtime.
#[derive(Debug, Default)]
pub struct Graph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node and return its handle.
    ///
    /// # Panics
    ///
    /// Panics if the arena would grow past `u32::MAX` slots. Freed slots
    /// are reused first, so only that many live nodes can trigger it.
    pub fn insert(&mut self, node: Node) -> NodeId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId::new(index, slot.generation);
        }

        let index = u32::try_from(self.slots.len()).expect("node arena exceeded u32::MAX slots");
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId::new(index, 0)
    }

    /// Remove a node, invalidating its handle.
    ///
    /// Callers are responsible for detaching edges first.
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());
        self.len -= 1;
        Some(node)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_mut())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn observable(&self, id: NodeId) -> Option<&ObservableMeta> {
        self.get(id).and_then(Node::observable)
    }

    pub fn observable_mut(&mut self, id: NodeId) -> Option<&mut ObservableMeta> {
        self.get_mut(id).and_then(Node::observable_mut)
    }

    pub fn derivation(&self, id: NodeId) -> Option<&DerivationMeta> {
        self.get(id).and_then(Node::derivation)
    }

    pub fn derivation_mut(&mut self, id: NodeId) -> Option<&mut DerivationMeta> {
        self.get_mut(id).and_then(Node::derivation_mut)
    }

    /// Current state of a derivation, if `id` is one.
    pub fn dependencies_state(&self, id: NodeId) -> Option<DerivationState> {
        self.derivation(id).map(|meta| meta.dependencies_state)
    }

    /// Record `derivation` as an observer of `observable`.
    ///
    /// Lowers the observable's `lowest_observer_state` hint to the
    /// derivation's state so the hint never overestimates.
    pub fn add_observer(&mut self, observable: NodeId, derivation: NodeId) {
        let Some(state) = self.dependencies_state(derivation) else {
            return;
        };
        if let Some(meta) = self.observable_mut(observable) {
            meta.observers.insert(derivation);
            if meta.lowest_observer_state > state {
                meta.lowest_observer_state = state;
            }
        }
    }

    /// Drop `derivation` from the observers of `observable`.
    ///
    /// Returns `true` when this removed the last observer.
    pub fn remove_observer(&mut self, observable: NodeId, derivation: NodeId) -> bool {
        match self.observable_mut(observable) {
            Some(meta) => meta.observers.swap_remove(&derivation) && meta.observers.is_empty(),
            None => false,
        }
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ReactionSlot;

    fn reaction(name: &str) -> Node {
        Node::reaction(name.into(), ReactionSlot::new(|_, _| Ok(())))
    }

    #[test]
    fn insert_and_remove_nodes() {
        let mut graph = Graph::new();

        let a = graph.insert(Node::atom("a".into()));
        let b = graph.insert(Node::atom("b".into()));
        assert_eq!(graph.len(), 2);

        assert!(graph.remove(a).is_some());
        assert_eq!(graph.len(), 1);
        assert!(graph.get(a).is_none());
        assert!(graph.get(b).is_some());
    }

    #[test]
    fn reused_slot_gets_new_generation() {
        let mut graph = Graph::new();

        let old = graph.insert(Node::atom("old".into()));
        graph.remove(old);
        let new = graph.insert(Node::atom("new".into()));

        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());
        assert!(graph.get(old).is_none());
        assert_eq!(graph.get(new).unwrap().name(), "new");
        assert!(graph.remove(old).is_none());
    }

    #[test]
    fn freed_slots_are_reused_before_growing() {
        let mut graph = Graph::new();
        for round in 0..100 {
            let id = graph.insert(Node::atom("churn".into()));
            assert_eq!(id.index(), 0);
            assert_eq!(id.generation(), round);
            graph.remove(id);
        }
        assert_eq!(graph.slots.len(), 1);
        assert!(graph.is_empty());
    }

    #[test]
    fn add_observer_lowers_hint() {
        let mut graph = Graph::new();
        let atom = graph.insert(Node::atom("atom".into()));
        let watcher = graph.insert(reaction("watcher"));
        graph.derivation_mut(watcher).unwrap().dependencies_state = DerivationState::UpToDate;

        graph.add_observer(atom, watcher);

        let meta = graph.observable(atom).unwrap();
        assert!(meta.observers().contains(&watcher));
        assert_eq!(meta.lowest_observer_state(), DerivationState::UpToDate);
    }

    #[test]
    fn remove_observer_reports_last() {
        let mut graph = Graph::new();
        let atom = graph.insert(Node::atom("atom".into()));
        let first = graph.insert(reaction("first"));
        let second = graph.insert(reaction("second"));

        graph.add_observer(atom, first);
        graph.add_observer(atom, second);

        assert!(!graph.remove_observer(atom, first));
        assert!(graph.remove_observer(atom, second));
        assert!(!graph.remove_observer(atom, second));
    }
}
