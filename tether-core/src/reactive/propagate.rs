//! Change Propagation
//!
//! Three walks push staleness from an observable to its direct observers:
//!
//! | walk                         | trigger                              | effect on observers            |
//! |------------------------------|--------------------------------------|--------------------------------|
//! | [`propagate_changed`]        | an atom changed                      | everything becomes stale       |
//! | [`propagate_maybe_changed`]  | a computed input may have changed    | up-to-date becomes possibly stale |
//! | [`propagate_change_confirmed`] | a computed recomputed to a new value | possibly stale becomes stale   |
//!
//! Each walk is gated by the observable's `lowest_observer_state` hint, so
//! repeating a walk that cannot change anything is O(1).
//!
//! Every walk updates all states first and only then invokes the
//! became-stale hooks of the derivations that left the up-to-date state.
//!
//! [`propagate_changed`]: Runtime::propagate_changed
//! [`propagate_maybe_changed`]: Runtime::propagate_maybe_changed
//! [`propagate_change_confirmed`]: Runtime::propagate_change_confirmed

use smallvec::SmallVec;
use tracing::trace;

use super::listener::notify_all;
use super::runtime::Runtime;
use crate::graph::{DerivationState, NodeId};

type Observers = SmallVec<[NodeId; 8]>;

impl Runtime {
    /// Mark every observer of `observable` stale.
    pub fn propagate_changed(&mut self, observable: NodeId) {
        let observers: Observers = match self.graph.observable_mut(observable) {
            Some(meta) if meta.lowest_observer_state != DerivationState::Stale => {
                meta.lowest_observer_state = DerivationState::Stale;
                meta.observers.iter().copied().collect()
            }
            _ => return,
        };

        let mut became_stale = Observers::new();
        for derivation in observers {
            if let Some(meta) = self.graph.derivation_mut(derivation) {
                if meta.dependencies_state == DerivationState::UpToDate {
                    became_stale.push(derivation);
                }
                meta.dependencies_state = DerivationState::Stale;
            }
        }

        self.fire_became_stale(observable, became_stale);
    }

    /// A computed value recomputed and its value changed: observers that
    /// were only possibly stale are now stale.
    ///
    /// No hooks fire, since no derivation leaves the up-to-date state here.
    /// If an observer is found up to date the hint is lowered back to
    /// up-to-date.
    pub fn propagate_change_confirmed(&mut self, observable: NodeId) {
        let observers: Observers = match self.graph.observable_mut(observable) {
            Some(meta) if meta.lowest_observer_state != DerivationState::Stale => {
                meta.lowest_observer_state = DerivationState::Stale;
                meta.observers.iter().copied().collect()
            }
            _ => return,
        };

        let mut restore_hint = false;
        for derivation in observers {
            if let Some(meta) = self.graph.derivation_mut(derivation) {
                match meta.dependencies_state {
                    DerivationState::PossiblyStale => {
                        meta.dependencies_state = DerivationState::Stale;
                    }
                    DerivationState::UpToDate => restore_hint = true,
                    _ => {}
                }
            }
        }

        if restore_hint {
            if let Some(meta) = self.graph.observable_mut(observable) {
                meta.lowest_observer_state = DerivationState::UpToDate;
            }
        }
        trace!(observable = %self.display_name(observable), "change confirmed");
    }

    /// A computed value's inputs may have changed: mark up-to-date
    /// observers possibly stale.
    pub fn propagate_maybe_changed(&mut self, observable: NodeId) {
        let observers: Observers = match self.graph.observable_mut(observable) {
            Some(meta) if meta.lowest_observer_state == DerivationState::UpToDate => {
                meta.lowest_observer_state = DerivationState::PossiblyStale;
                meta.observers.iter().copied().collect()
            }
            _ => return,
        };

        let mut became_stale = Observers::new();
        for derivation in observers {
            if let Some(meta) = self.graph.derivation_mut(derivation) {
                if meta.dependencies_state == DerivationState::UpToDate {
                    meta.dependencies_state = DerivationState::PossiblyStale;
                    became_stale.push(derivation);
                }
            }
        }

        self.fire_became_stale(observable, became_stale);
    }

    fn fire_became_stale(&mut self, cause: NodeId, derivations: Observers) {
        for derivation in derivations {
            trace!(
                derivation = %self.display_name(derivation),
                cause = %self.display_name(cause),
                "derivation became stale"
            );
            self.notify_became_stale(derivation);
        }
    }

    /// Notify `derivation` that it left the up-to-date state.
    ///
    /// Stale listeners fire; a computed value forwards the news to its own
    /// observers and a reaction schedules itself.
    pub(crate) fn notify_became_stale(&mut self, derivation: NodeId) {
        let Some(node) = self.graph.get(derivation) else {
            return;
        };
        let hooks = node
            .derivation()
            .map(|meta| meta.stale_listeners.snapshot())
            .unwrap_or_default();
        let (is_computed, is_reaction) = (node.is_computed(), node.is_reaction());

        if is_computed {
            self.propagate_maybe_changed(derivation);
        } else if is_reaction {
            self.schedule_reaction(derivation);
        }
        notify_all(hooks, derivation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Atom, Computed, Reaction};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn observed_atom(rt: &mut Runtime, count: usize) -> (Atom, Vec<Reaction>) {
        let atom = Atom::new(rt, "a");
        let reactions = (0..count)
            .map(|i| {
                let r = Reaction::new(rt, format!("r{i}"), |_, _| Ok(()));
                r.track(rt, |rt| rt.report_observed(atom.id()).map(drop))
                    .unwrap()
                    .unwrap();
                r
            })
            .collect();
        (atom, reactions)
    }

    #[test]
    fn changed_marks_all_observers_stale() {
        let mut rt = Runtime::new();
        let (atom, reactions) = observed_atom(&mut rt, 3);

        rt.start_batch();
        rt.propagate_changed(atom.id());
        for r in &reactions {
            assert_eq!(rt.dependencies_state(r.id()), Some(DerivationState::Stale));
        }
        assert_eq!(
            rt.lowest_observer_state(atom.id()),
            Some(DerivationState::Stale)
        );
        assert_eq!(rt.pending_reactions().len(), 3);
        rt.end_batch();
    }

    #[test]
    fn repeated_change_is_gated_by_hint() {
        let mut rt = Runtime::new();
        let (atom, reactions) = observed_atom(&mut rt, 1);
        let stale_calls = Arc::new(AtomicUsize::new(0));
        let calls = stale_calls.clone();
        rt.on_become_stale(reactions[0].id(), move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        rt.start_batch();
        rt.propagate_changed(atom.id());
        rt.propagate_changed(atom.id());
        rt.end_batch();

        assert_eq!(stale_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn maybe_changed_only_touches_up_to_date() {
        let mut rt = Runtime::new();
        let atom = Atom::new(&mut rt, "a");
        let c = Computed::new(&mut rt, "c", move |rt| {
            atom.report_observed(rt)?;
            Ok(1)
        });
        let fresh = Reaction::new(&mut rt, "fresh", |_, _| Ok(()));
        let stale = Reaction::new(&mut rt, "stale", |_, _| Ok(()));

        rt.start_batch();
        fresh.track(&mut rt, |rt| c.get(rt)).unwrap().unwrap();
        stale.track(&mut rt, |rt| c.get(rt)).unwrap().unwrap();
        rt.derivation_meta_mut(stale.id()).unwrap().dependencies_state = DerivationState::Stale;

        rt.propagate_maybe_changed(c.id());
        assert_eq!(
            rt.dependencies_state(fresh.id()),
            Some(DerivationState::PossiblyStale)
        );
        assert_eq!(rt.dependencies_state(stale.id()), Some(DerivationState::Stale));
        assert_eq!(
            rt.lowest_observer_state(c.id()),
            Some(DerivationState::PossiblyStale)
        );
        rt.end_batch();
    }

    #[test]
    fn change_confirmed_promotes_possibly_stale() {
        let mut rt = Runtime::new();
        let atom = Atom::new(&mut rt, "a");
        let c = Computed::new(&mut rt, "c", move |rt| {
            atom.report_observed(rt)?;
            Ok(1)
        });
        let r = Reaction::new(&mut rt, "r", |_, _| Ok(()));

        rt.start_batch();
        r.track(&mut rt, |rt| c.get(rt)).unwrap().unwrap();
        rt.propagate_maybe_changed(c.id());
        rt.propagate_change_confirmed(c.id());

        assert_eq!(rt.dependencies_state(r.id()), Some(DerivationState::Stale));
        assert_eq!(rt.lowest_observer_state(c.id()), Some(DerivationState::Stale));
        rt.end_batch();
    }

    #[test]
    fn change_confirmed_restores_hint_for_fresh_observer() {
        let mut rt = Runtime::new();
        let atom = Atom::new(&mut rt, "a");
        let c = Computed::new(&mut rt, "c", move |rt| {
            atom.report_observed(rt)?;
            Ok(1)
        });
        let r = Reaction::new(&mut rt, "r", |_, _| Ok(()));

        rt.start_batch();
        r.track(&mut rt, |rt| c.get(rt)).unwrap().unwrap();
        rt.propagate_change_confirmed(c.id());

        assert_eq!(rt.dependencies_state(r.id()), Some(DerivationState::UpToDate));
        assert_eq!(
            rt.lowest_observer_state(c.id()),
            Some(DerivationState::UpToDate)
        );
        rt.end_batch();
    }

    #[test]
    fn computed_forwards_staleness_to_its_observers() {
        let mut rt = Runtime::new();
        let atom = Atom::new(&mut rt, "a");
        let c = Computed::new(&mut rt, "c", move |rt| {
            atom.report_observed(rt)?;
            Ok(1)
        });
        let r = Reaction::new(&mut rt, "r", |_, _| Ok(()));

        rt.start_batch();
        r.track(&mut rt, |rt| c.get(rt)).unwrap().unwrap();
        rt.propagate_changed(atom.id());

        assert_eq!(rt.dependencies_state(c.id()), Some(DerivationState::Stale));
        assert_eq!(
            rt.dependencies_state(r.id()),
            Some(DerivationState::PossiblyStale)
        );
        assert_eq!(rt.pending_reactions(), &[r.id()]);
        rt.end_batch();
    }

    #[test]
    fn stale_listener_on_computed_fires_alongside_forwarding() {
        let mut rt = Runtime::new();
        let atom = Atom::new(&mut rt, "a");
        let c = Computed::new(&mut rt, "c", move |rt| {
            atom.report_observed(rt)?;
            Ok(1)
        });
        let r = Reaction::new(&mut rt, "r", |_, _| Ok(()));
        let stale_calls = Arc::new(AtomicUsize::new(0));
        let calls = stale_calls.clone();
        rt.on_become_stale(c.id(), move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        rt.start_batch();
        r.track(&mut rt, |rt| c.get(rt)).unwrap().unwrap();
        rt.propagate_changed(atom.id());

        assert_eq!(stale_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            rt.dependencies_state(r.id()),
            Some(DerivationState::PossiblyStale)
        );
        rt.end_batch();
    }

    #[test]
    fn gated_change_leaves_possibly_stale_observer_alone() {
        let mut rt = Runtime::new();
        let direct = Atom::new(&mut rt, "direct");
        let input = Atom::new(&mut rt, "input");
        let c = Computed::new(&mut rt, "c", move |rt| {
            input.report_observed(rt)?;
            Ok(1)
        });
        let r = Reaction::new(&mut rt, "r", |_, _| Ok(()));
        let stale_calls = Arc::new(AtomicUsize::new(0));
        let calls = stale_calls.clone();
        rt.on_become_stale(r.id(), move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        rt.start_batch();
        r.track(&mut rt, |rt| {
            direct.report_observed(rt)?;
            c.get(rt)
        })
        .unwrap()
        .unwrap();

        rt.propagate_changed(input.id());
        assert_eq!(
            rt.dependencies_state(r.id()),
            Some(DerivationState::PossiblyStale)
        );
        assert_eq!(stale_calls.load(Ordering::SeqCst), 1);

        rt.graph.observable_mut(direct.id()).unwrap().lowest_observer_state =
            DerivationState::Stale;
        rt.propagate_changed(direct.id());

        assert_eq!(
            rt.dependencies_state(r.id()),
            Some(DerivationState::PossiblyStale)
        );
        assert_eq!(stale_calls.load(Ordering::SeqCst), 1);
        rt.end_batch();
    }
}
