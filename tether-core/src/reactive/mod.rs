//! Reactive Engine
//!
//! This module implements the dependency-tracking and change-propagation
//! core: atoms, computed values, reactions, and the runtime that connects
//! them.
//!
//! # Concepts
//!
//! ## Observables
//!
//! An observable is anything a derivation can read. [`Atom`] is the bare
//! version; [`ObservableValue`] pairs an atom with a value. When an
//! observable is read inside a tracked run, the running derivation records
//! it as a dependency.
//!
//! ## Computed Values
//!
//! A [`Computed`] value is a cached derivation that is itself observable.
//! It recomputes lazily, only when read after one of its inputs changed,
//! and only notifies its observers if the result is different.
//!
//! ## Reactions
//!
//! A [`Reaction`] is a side-effecting derivation. It reruns after the
//! outermost batch in which one of its dependencies changed.
//!
//! # Implementation Notes
//!
//! Tracking is explicit: every operation takes the [`Runtime`] by `&mut`,
//! and the runtime keeps a stack of tracking frames. A read checks the top
//! frame and, if it belongs to a derivation, appends to that frame's
//! accumulator. When the run finishes, the accumulator is diffed against
//! the previous dependency set.
//!
//! Propagation is push-pull. A change pushes staleness one level down
//! (stale to direct observers, possibly-stale further through computed
//! values); a read pulls, recomputing only the computed values whose inputs
//! really changed.

mod atom;
mod batch;
mod computed;
mod context;
mod introspect;
mod listener;
mod propagate;
mod reaction;
mod runtime;
mod tracking;
mod value;

pub use atom::Atom;
pub use batch::BatchGuard;
pub use computed::{Computed, ComputedOptions, ComputedSlot};
pub use introspect::{DependencyTree, ObserverTree};
pub use listener::ListenerId;
pub(crate) use listener::Listeners;
pub use reaction::{Reaction, ReactionSlot};
pub use runtime::{Runtime, SharedRuntime};
pub use value::{default_comparer, Comparer, ObservableValue};
