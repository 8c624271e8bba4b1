//! Dependency Graph
//!
//! This module holds the nodes of the reactive graph and the observer
//! index connecting them.
//!
//! # Overview
//!
//! - Observables (atoms and computed values) know which derivations
//!   currently observe them.
//! - Derivations (computed values and reactions) know which observables
//!   they read during their last run.
//!
//! The two directions are always updated together so that
//! `d ∈ observers(o) ⇔ o ∈ observing(d)` holds between engine calls.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a generational arena addressed by [`NodeId`]. Edges are
//!    plain ids, so neither side owns the other and removal cannot dangle.
//!
//! 2. The node kind is a tagged variant; computed and reaction behaviour is
//!    dispatched through its payload instead of downcasting.
//!
//! 3. Every observable carries a `lowest_observer_state` hint that lets
//!    propagation skip walks that cannot change anything.

mod arena;
mod node;

pub use arena::Graph;
pub use node::{DerivationMeta, DerivationState, Node, NodeId, NodeKind, ObservableMeta};
