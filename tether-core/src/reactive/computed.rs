//! Computed Values
//!
//! A computed value is a cached derivation that is itself observable.
//!
//! # How Computed Values Work
//!
//! 1. While observed (or read inside a batch or a tracked run), a computed
//!    value tracks its inputs and caches the result. Later reads return the
//!    cache until an input changes.
//!
//! 2. When an input changes the computed value becomes stale and tells its
//!    observers they are possibly stale. It does not recompute yet.
//!
//! 3. The next read (or an observer checking whether it must rerun)
//!    recomputes. Only if the new value differs from the cached one are
//!    the observers confirmed stale.
//!
//! 4. Once the last observer goes away at the end of a batch, the computed
//!    value drops its inputs and its cache. A `keep_alive` computed value
//!    is never suspended.
//!
//! Read outside any batch or tracked run with no observers, a computed
//! value is evaluated on the spot without caching.
//!
//! Errors returned by the derivation are cached like values and returned
//! to every reader until the next recomputation.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{trace, warn};

use super::runtime::Runtime;
use super::value::{default_comparer, Comparer};
use crate::error::{ReactiveError, Result};
use crate::graph::{DerivationState, Node, NodeId, NodeKind};

type Derive<T> = Box<dyn Fn(&mut Runtime) -> Result<T> + Send + Sync>;

/// Type-erased cache of a computed node.
pub(crate) trait ComputedCell: Send + Sync {
    /// Run the derivation and store the result.
    ///
    /// With `track` the run records dependencies; the return value says
    /// whether observers must be told the value changed.
    fn recompute(&self, rt: &mut Runtime, id: NodeId, track: bool) -> bool;

    /// Drop the cached result.
    fn clear(&self);

    fn has_error(&self) -> bool;
}

/// Graph-side state of a computed node.
pub struct ComputedSlot {
    cell: Arc<dyn ComputedCell>,
    pub(crate) is_computing: bool,
    keep_alive: bool,
}

impl ComputedSlot {
    pub fn is_computing(&self) -> bool {
        self.is_computing
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }
}

impl fmt::Debug for ComputedSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedSlot")
            .field("is_computing", &self.is_computing)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

/// Options for [`Computed::with_options`].
pub struct ComputedOptions<T> {
    /// Keep the cache and dependencies alive while unobserved.
    pub keep_alive: bool,
    /// Decides whether a recomputed value counts as unchanged.
    pub equals: Comparer<T>,
}

impl<T: PartialEq + 'static> Default for ComputedOptions<T> {
    fn default() -> Self {
        Self {
            keep_alive: false,
            equals: default_comparer(),
        }
    }
}

impl<T> ComputedOptions<T> {
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn equals(mut self, equals: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        self.equals = Arc::new(equals);
        self
    }
}

struct ComputedInner<T> {
    derive: Derive<T>,
    equals: Comparer<T>,
    value: RwLock<Option<Result<T>>>,
}

impl<T: Send + Sync + 'static> ComputedCell for ComputedInner<T> {
    fn recompute(&self, rt: &mut Runtime, id: NodeId, track: bool) -> bool {
        if !track {
            let value = (self.derive)(rt);
            *self.value.write() = Some(value);
            return true;
        }

        let was_suspended = rt.graph.dependencies_state(id) == Some(DerivationState::NotTracking);
        let new_value = rt
            .track(id, |rt| (self.derive)(rt))
            .and_then(std::convert::identity);

        let mut cached = self.value.write();
        let changed = was_suspended
            || match (cached.as_ref(), &new_value) {
                (Some(Ok(old)), Ok(new)) => !(self.equals)(old, new),
                _ => true,
            };
        if changed {
            *cached = Some(new_value);
        }
        changed
    }

    fn clear(&self) {
        *self.value.write() = None;
    }

    fn has_error(&self) -> bool {
        matches!(*self.value.read(), Some(Err(_)))
    }
}

/// Handle to a computed value.
///
/// Cloning the handle is cheap; every clone refers to the same node.
pub struct Computed<T> {
    id: NodeId,
    inner: Arc<ComputedInner<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Computed<T> {
    /// Create a computed value compared with `PartialEq`.
    pub fn new<F>(rt: &mut Runtime, name: impl Into<Arc<str>>, derive: F) -> Self
    where
        F: Fn(&mut Runtime) -> Result<T> + Send + Sync + 'static,
    {
        Self::with_options(rt, name, derive, ComputedOptions::default())
    }
}

impl<T: Clone + Send + Sync + 'static> Computed<T> {
    pub fn with_options<F>(
        rt: &mut Runtime,
        name: impl Into<Arc<str>>,
        derive: F,
        options: ComputedOptions<T>,
    ) -> Self
    where
        F: Fn(&mut Runtime) -> Result<T> + Send + Sync + 'static,
    {
        let inner = Arc::new(ComputedInner {
            derive: Box::new(derive),
            equals: options.equals,
            value: RwLock::new(None),
        });
        let slot = ComputedSlot {
            cell: inner.clone(),
            is_computing: false,
            keep_alive: options.keep_alive,
        };
        let id = rt.graph.insert(Node::computed(name.into(), slot));
        Self { id, inner }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Read the value, recomputing it if needed.
    ///
    /// Inside a tracked run the computed value becomes a dependency of the
    /// running derivation.
    pub fn get(&self, rt: &mut Runtime) -> Result<T> {
        rt.computed_get(self.id)?;
        self.inner
            .value
            .read()
            .clone()
            .unwrap_or(Err(ReactiveError::UnknownNode(self.id)))
    }

    /// Last cached result, without reading through the runtime.
    pub fn peek(&self) -> Option<Result<T>> {
        self.inner.value.read().clone()
    }

    pub fn dispose(&self, rt: &mut Runtime) -> Result<()> {
        rt.dispose(self.id)
    }
}

impl<T> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed").field("id", &self.id).finish()
    }
}

impl Runtime {
    fn computed_slot(&self, id: NodeId) -> Option<&ComputedSlot> {
        match self.graph.get(id)?.kind() {
            NodeKind::Computed(slot) => Some(slot),
            _ => None,
        }
    }

    fn computed_slot_mut(&mut self, id: NodeId) -> Option<&mut ComputedSlot> {
        match self.graph.get_mut(id)?.kind_mut() {
            NodeKind::Computed(slot) => Some(slot),
            _ => None,
        }
    }

    /// Bring the computed node `id` up to date and report the read.
    pub(crate) fn computed_get(&mut self, id: NodeId) -> Result<()> {
        let (cell, is_computing, keep_alive) = match self.computed_slot(id) {
            Some(slot) => (Arc::clone(&slot.cell), slot.is_computing, slot.keep_alive),
            None => return Err(self.kind_error(id, "a computed value")),
        };
        if is_computing {
            return Err(ReactiveError::CycleDetected {
                name: self.owned_name(id),
            });
        }

        let has_observers = self.graph.observable(id).is_some_and(|meta| meta.has_observers());
        if self.in_batch == 0 && !self.context.is_tracking() && !has_observers && !keep_alive {
            self.check_state_read(id)?;
            if self.should_compute(id) {
                if self.config.computed_requires_reaction {
                    warn!(
                        computed = %self.display_name(id),
                        "computed value read outside a reactive context; it is recomputed on every read"
                    );
                }
                self.start_batch();
                self.compute_value(id, &cell, false);
                self.end_batch();
            }
        } else {
            self.report_observed(id)?;
            if self.should_compute(id) && self.compute_value(id, &cell, true) {
                self.propagate_change_confirmed(id);
            }
        }
        Ok(())
    }

    fn compute_value(&mut self, id: NodeId, cell: &Arc<dyn ComputedCell>, track: bool) -> bool {
        if let Some(slot) = self.computed_slot_mut(id) {
            slot.is_computing = true;
        }
        self.computation_depth += 1;
        let prev_changes = std::mem::replace(&mut self.allow_state_changes, false);
        let changed = cell.recompute(self, id, track);
        self.allow_state_changes = prev_changes;
        self.computation_depth -= 1;
        if let Some(slot) = self.computed_slot_mut(id) {
            slot.is_computing = false;
        }
        trace!(computed = %self.display_name(id), changed, "computed value evaluated");
        changed
    }

    pub(crate) fn computed_has_error(&self, id: NodeId) -> bool {
        self.computed_slot(id).is_some_and(|slot| slot.cell.has_error())
    }

    /// Drop the dependencies and cache of an unobserved computed node.
    pub(crate) fn suspend_computed(&mut self, id: NodeId) {
        let cell = match self.computed_slot(id) {
            Some(slot) if !slot.keep_alive => Arc::clone(&slot.cell),
            _ => return,
        };
        self.clear_observing(id);
        cell.clear();
        trace!(computed = %self.display_name(id), "computed value suspended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::reactive::{ObservableValue, Reaction};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting<T: Clone + PartialEq + Send + Sync + 'static>(
        rt: &mut Runtime,
        source: &ObservableValue<T>,
    ) -> (Computed<T>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let source = source.clone();
        let counter = runs.clone();
        let computed = Computed::new(rt, "derived", move |rt| {
            counter.fetch_add(1, Ordering::SeqCst);
            source.get(rt)
        });
        (computed, runs)
    }

    #[test]
    fn unobserved_read_recomputes_every_time() {
        let mut rt = Runtime::new();
        let source = ObservableValue::new(&mut rt, "source", 2);
        let (computed, runs) = counting(&mut rt, &source);

        assert_eq!(computed.get(&mut rt), Ok(2));
        assert_eq!(computed.get(&mut rt), Ok(2));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(rt.observing(computed.id()).is_empty());
        assert_eq!(
            rt.dependencies_state(computed.id()),
            Some(DerivationState::NotTracking)
        );
    }

    #[test]
    fn batched_reads_are_cached_then_suspended() {
        let mut rt = Runtime::new();
        let source = ObservableValue::new(&mut rt, "source", 2);
        let (computed, runs) = counting(&mut rt, &source);

        rt.batch(|rt| {
            assert_eq!(computed.get(rt), Ok(2));
            assert_eq!(computed.get(rt), Ok(2));
            assert_eq!(rt.observing(computed.id()), vec![source.id()]);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(rt.observing(computed.id()).is_empty());
        assert!(rt.observers(source.id()).is_empty());
        assert_eq!(computed.peek(), None);
    }

    #[test]
    fn observed_computed_is_memoized() {
        let mut rt = Runtime::new();
        let source = ObservableValue::new(&mut rt, "source", 1);
        let (computed, runs) = counting(&mut rt, &source);
        let reader = computed.clone();
        let _watch = rt.autorun("watch", move |rt| reader.get(rt).map(drop));

        assert_eq!(computed.get(&mut rt), Ok(1));
        assert_eq!(computed.get(&mut rt), Ok(1));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        source.set(&mut rt, 5).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(computed.get(&mut rt), Ok(5));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn keep_alive_survives_unobservation() {
        let mut rt = Runtime::new();
        let source = ObservableValue::new(&mut rt, "source", 3);
        let runs = Arc::new(AtomicUsize::new(0));
        let (reader, counter) = (source.clone(), runs.clone());
        let computed = Computed::with_options(
            &mut rt,
            "kept",
            move |rt| {
                counter.fetch_add(1, Ordering::SeqCst);
                reader.get(rt)
            },
            ComputedOptions::default().keep_alive(true),
        );

        assert_eq!(computed.get(&mut rt), Ok(3));
        assert_eq!(computed.get(&mut rt), Ok(3));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(rt.observers(source.id()), vec![computed.id()]);

        source.set(&mut rt, 4).unwrap();
        assert_eq!(computed.get(&mut rt), Ok(4));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn errors_are_cached_and_returned() {
        let mut rt = Runtime::new();
        let divisor = ObservableValue::new(&mut rt, "divisor", 0);
        let reader = divisor.clone();
        let quotient = Computed::new(&mut rt, "quotient", move |rt| {
            let d = reader.get(rt)?;
            if d == 0 {
                return Err(ReactiveError::derivation("division by zero"));
            }
            Ok(10 / d)
        });

        let expected = Err(ReactiveError::Derivation("division by zero".into()));
        rt.batch(|rt| {
            assert_eq!(quotient.get(rt), expected);
            assert!(rt.computed_has_error(quotient.id()));
            assert_eq!(quotient.peek(), Some(expected.clone()));
        });

        divisor.set(&mut rt, 2).unwrap();
        assert_eq!(quotient.get(&mut rt), Ok(5));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut rt = Runtime::new();
        let slot: Arc<RwLock<Option<Computed<i32>>>> = Arc::new(RwLock::new(None));
        let this = slot.clone();
        let looped = Computed::new(&mut rt, "looped", move |rt| {
            let me = this.read().clone();
            match me {
                Some(me) => me.get(rt),
                None => Ok(0),
            }
        });
        *slot.write() = Some(looped.clone());

        assert_eq!(
            looped.get(&mut rt),
            Err(ReactiveError::CycleDetected {
                name: "looped".into()
            })
        );
    }

    #[test]
    fn custom_comparer_suppresses_changes() {
        let mut rt = Runtime::new();
        let source = ObservableValue::new(&mut rt, "source", 10);
        let reader = source.clone();
        let bucket = Computed::with_options(
            &mut rt,
            "bucket",
            move |rt| reader.get(rt),
            ComputedOptions::default().equals(|a: &i32, b: &i32| a / 10 == b / 10),
        );
        let runs = Arc::new(AtomicUsize::new(0));
        let (observer, counter) = (bucket.clone(), runs.clone());
        let _watch = rt.autorun("watch", move |rt| {
            observer.get(rt)?;
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        source.set(&mut rt, 15).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        source.set(&mut rt, 25).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn writes_inside_computed_to_observed_state_fail() {
        let mut rt = Runtime::new();
        let target = ObservableValue::new(&mut rt, "target", 0);
        let writer = target.clone();
        let bad = Computed::new(&mut rt, "bad", move |rt| writer.set(rt, 1).map(|_| 1));
        let watcher = target.clone();
        let _watch = rt.autorun("watch", move |rt| watcher.get(rt).map(drop));

        let err = bad.get(&mut rt).unwrap_err();
        assert!(matches!(err, ReactiveError::IllegalStateChange { .. }));
    }

    #[test]
    fn requires_reaction_still_computes() {
        let config = RuntimeConfig::default().with_computed_requires_reaction(true);
        let mut rt = Runtime::with_config(config);
        let c = Computed::new(&mut rt, "loose", |_| Ok(7));
        assert_eq!(c.get(&mut rt), Ok(7));
        let r = Reaction::new(&mut rt, "r", |_, _| Ok(()));
        assert_eq!(r.track(&mut rt, |rt| c.get(rt)).unwrap(), Ok(7));
    }
}
