//! Dependency Tracking
//!
//! A derivation run is wrapped in [`Runtime::track`]: every observable read
//! while it runs is reported through [`Runtime::report_observed`] and lands
//! in the run's accumulator. When the run finishes the accumulator is
//! diffed against the previous dependency set and the observer index is
//! patched in place.
//!
//! Read and write policies are checked here as well, since every read and
//! write funnels through this module.

use std::mem;

use indexmap::IndexSet;
use tracing::trace;

use super::context::{Accumulator, Frame};
use super::listener::notify_all;
use super::runtime::Runtime;
use crate::config::EnforceActions;
use crate::error::{ReactiveError, Result};
use crate::graph::{DerivationState, Node, NodeId};

impl Runtime {
    /// Report that `observable` was read.
    ///
    /// Inside a tracked run the observable is appended to the run's
    /// accumulator (once per run) and its first-observed listeners fire.
    /// Outside a run, an unobserved observable read inside a batch is
    /// queued for unobservation so a suspended computed is torn down again
    /// at batch end.
    ///
    /// Returns whether the read was recorded.
    pub fn report_observed(&mut self, observable: NodeId) -> Result<bool> {
        self.check_state_read(observable)?;

        if let Some((_, run_id)) = self.context.current() {
            let meta = self.observable_meta_mut(observable)?;
            if meta.last_accessed_by == run_id {
                return Ok(true);
            }
            meta.last_accessed_by = run_id;
            let hooks = if meta.is_being_observed {
                None
            } else {
                meta.is_being_observed = true;
                Some(meta.observed_listeners.snapshot())
            };
            self.context.record(observable);

            if let Some(hooks) = hooks {
                trace!(observable = %self.display_name(observable), "observable became observed");
                notify_all(hooks, observable);
            }
            return Ok(true);
        }

        let unobserved = !self.observable_meta(observable)?.has_observers();
        if unobserved && self.in_batch > 0 {
            self.queue_for_unobservation(observable);
        }
        Ok(false)
    }

    /// Fail if reading `observable` is currently disallowed.
    pub(crate) fn check_state_read(&self, observable: NodeId) -> Result<()> {
        self.observable_meta(observable)?;
        if self.allow_state_reads {
            Ok(())
        } else {
            Err(ReactiveError::IllegalStateRead {
                name: self.owned_name(observable),
            })
        }
    }

    /// Fail if changing `observable` is currently disallowed.
    pub fn check_state_change(&self, observable: NodeId) -> Result<()> {
        let has_observers = self.observable_meta(observable)?.has_observers();
        if self.computation_depth > 0 && has_observers {
            return Err(ReactiveError::IllegalStateChange {
                name: self.owned_name(observable),
                reason: "computed values may not change observed state",
            });
        }
        if !self.allow_state_changes
            && (has_observers || self.config.enforce_actions == EnforceActions::Always)
        {
            return Err(ReactiveError::IllegalStateChange {
                name: self.owned_name(observable),
                reason: "state changes must happen inside an action",
            });
        }
        Ok(())
    }

    /// Run `f` as a tracked run of `derivation`.
    ///
    /// The derivation's state is reset to up-to-date, a fresh run id is
    /// assigned, and on return its dependency set is replaced by what `f`
    /// read.
    pub fn track<R>(&mut self, derivation: NodeId, f: impl FnOnce(&mut Runtime) -> R) -> Result<R> {
        if self.graph.derivation(derivation).is_none() {
            return Err(self.kind_error(derivation, "a derivation"));
        }

        self.change_dependencies_state_to_0(derivation);
        self.run_id_counter += 1;
        let run_id = self.run_id_counter;
        if let Some(meta) = self.graph.derivation_mut(derivation) {
            meta.run_id = run_id;
        }

        self.context.enter(derivation, run_id);
        let prev_reads = mem::replace(&mut self.allow_state_reads, true);
        let result = f(self);
        self.allow_state_reads = prev_reads;
        let new_observing = self
            .context
            .exit(Some(derivation))
            .map(Frame::into_new_observing)
            .unwrap_or_default();

        self.bind_dependencies(derivation, new_observing);
        Ok(result)
    }

    /// Replace the dependency set of `derivation` with `new_observing`.
    ///
    /// Only edges that changed are touched. Observables that lose their
    /// last observer are queued for unobservation. If a newly observed
    /// computed value is already stale, the derivation inherits that state.
    fn bind_dependencies(&mut self, derivation: NodeId, new_observing: Accumulator) {
        let mut fresh: IndexSet<NodeId> = IndexSet::with_capacity(new_observing.len());
        let mut lowest_new = DerivationState::UpToDate;
        for dep in new_observing {
            let Some(node) = self.graph.get(dep) else {
                continue;
            };
            if !fresh.insert(dep) {
                continue;
            }
            if let Some(state) = node.derivation().map(|meta| meta.dependencies_state) {
                if matches!(state, DerivationState::PossiblyStale | DerivationState::Stale)
                    && state > lowest_new
                {
                    lowest_new = state;
                }
            }
        }

        let previous: IndexSet<NodeId> = match self.graph.derivation_mut(derivation) {
            Some(meta) => mem::take(&mut meta.observing).into_iter().collect(),
            None => return,
        };

        for dep in previous.iter().filter(|dep| !fresh.contains(*dep)) {
            self.remove_observer(*dep, derivation);
        }
        for dep in fresh.iter().filter(|dep| !previous.contains(*dep)) {
            self.graph.add_observer(*dep, derivation);
        }

        let count = fresh.len();
        if let Some(meta) = self.graph.derivation_mut(derivation) {
            meta.observing = fresh.into_iter().collect();
            if lowest_new != DerivationState::UpToDate {
                meta.dependencies_state = lowest_new;
            }
        }
        trace!(
            derivation = %self.display_name(derivation),
            dependencies = count,
            "dependencies bound"
        );

        if lowest_new != DerivationState::UpToDate {
            self.notify_became_stale(derivation);
        }
    }

    /// Drop every dependency edge of `derivation` and mark it not tracking.
    pub(crate) fn clear_observing(&mut self, derivation: NodeId) {
        let observing = match self.graph.derivation_mut(derivation) {
            Some(meta) => {
                meta.dependencies_state = DerivationState::NotTracking;
                mem::take(&mut meta.observing)
            }
            None => return,
        };
        for dep in observing {
            self.remove_observer(dep, derivation);
        }
    }

    /// Mark `derivation` up to date and reset its dependencies' hints.
    pub(crate) fn change_dependencies_state_to_0(&mut self, derivation: NodeId) {
        let observing = match self.graph.derivation_mut(derivation) {
            Some(meta) if meta.dependencies_state != DerivationState::UpToDate => {
                meta.dependencies_state = DerivationState::UpToDate;
                meta.observing.clone()
            }
            _ => return,
        };
        for dep in observing {
            if let Some(meta) = self.graph.observable_mut(dep) {
                meta.lowest_observer_state = DerivationState::UpToDate;
            }
        }
    }

    /// Decide whether `derivation` must rerun.
    ///
    /// A possibly-stale derivation pulls its computed dependencies in
    /// order; the first one that actually changed (or failed) settles the
    /// answer. If none changed the derivation is marked up to date.
    pub fn should_compute(&mut self, derivation: NodeId) -> bool {
        let Some(meta) = self.graph.derivation(derivation) else {
            return false;
        };
        match meta.dependencies_state {
            DerivationState::UpToDate => false,
            DerivationState::Stale | DerivationState::NotTracking => true,
            DerivationState::PossiblyStale => {
                let dependencies = meta.observing.clone();
                let prev_reads = mem::replace(&mut self.allow_state_reads, true);
                self.context.enter_untracked();

                let mut stale = false;
                for dep in dependencies {
                    if !self.graph.get(dep).is_some_and(Node::is_computed) {
                        continue;
                    }
                    let failed = match self.computed_get(dep) {
                        Ok(()) => self.computed_has_error(dep),
                        Err(_) => true,
                    };
                    if failed
                        || self.graph.dependencies_state(derivation) == Some(DerivationState::Stale)
                    {
                        stale = true;
                        break;
                    }
                }

                self.context.exit(None);
                self.allow_state_reads = prev_reads;
                if !stale {
                    self.change_dependencies_state_to_0(derivation);
                }
                stale
            }
        }
    }

    /// Run `f` without recording reads into the current derivation.
    pub fn untracked<R>(&mut self, f: impl FnOnce(&mut Runtime) -> R) -> R {
        self.context.enter_untracked();
        let result = f(self);
        self.context.exit(None);
        result
    }

    /// Run `f` with state reads allowed or forbidden.
    pub fn allow_state_reads<R>(&mut self, allowed: bool, f: impl FnOnce(&mut Runtime) -> R) -> R {
        let prev = mem::replace(&mut self.allow_state_reads, allowed);
        let result = f(self);
        self.allow_state_reads = prev;
        result
    }

    /// Run `f` with state changes allowed or forbidden.
    pub fn allow_state_changes<R>(&mut self, allowed: bool, f: impl FnOnce(&mut Runtime) -> R) -> R {
        let prev = mem::replace(&mut self.allow_state_changes, allowed);
        let result = f(self);
        self.allow_state_changes = prev;
        result
    }
}
