//! Tether Core
//!
//! This crate provides the dependency-tracking engine of the Tether
//! reactive runtime. It implements:
//!
//! - Observables (atoms and observable values)
//! - Computed values with lazy, memoized recomputation
//! - Reactions scheduled at the end of the outermost batch
//! - Three-level staleness propagation (up to date, possibly stale, stale)
//! - Deferred teardown of nodes that lose their last observer
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: the node arena and the bidirectional observer index
//! - `reactive`: the runtime, tracking, batching, and the node handles
//! - `config`: runtime policies, loadable from JSON
//! - `error`: error types
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use tether_core::{Computed, ObservableValue, Runtime};
//!
//! let mut rt = Runtime::new();
//!
//! // Create an observable value
//! let count = ObservableValue::new(&mut rt, "count", 0);
//!
//! // Create a derived value
//! let source = count.clone();
//! let doubled = Computed::new(&mut rt, "doubled", move |rt| Ok(source.get(rt)? * 2));
//!
//! // Create a reaction
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let log = seen.clone();
//! let reader = doubled.clone();
//! rt.autorun("print", move |rt| {
//!     log.lock().unwrap().push(reader.get(rt)?);
//!     Ok(())
//! });
//!
//! // Update the value; the reaction reruns
//! count.set(&mut rt, 5).unwrap();
//! assert_eq!(*seen.lock().unwrap(), vec![0, 10]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{EnforceActions, RuntimeConfig};
pub use error::{ConfigError, ReactiveError, Result};
pub use graph::{DerivationState, NodeId};
pub use reactive::{
    Atom, BatchGuard, Computed, ComputedOptions, DependencyTree, ListenerId, ObservableValue,
    ObserverTree, Reaction, Runtime, SharedRuntime,
};
