//! Error Types
//!
//! Every fallible engine operation returns [`ReactiveError`]. Errors raised
//! inside a computed derivation are cached alongside its value, which is why
//! the type is `Clone`.

use thiserror::Error;

use crate::graph::NodeId;

/// Errors produced by the reactive engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// An observable was read where the read policy forbids it.
    #[error("observable '{name}' cannot be read in the current context")]
    IllegalStateRead { name: String },

    /// An observable was written where the state-change policy forbids it.
    #[error("observable '{name}' cannot be changed here: {reason}")]
    IllegalStateChange { name: String, reason: &'static str },

    /// `end_batch` was called with no open batch.
    #[error("end_batch called without a matching start_batch")]
    UnbalancedBatch,

    /// A computed value read itself while computing.
    #[error("cycle detected in computation '{name}'")]
    CycleDetected { name: String },

    /// The handle does not refer to a live node.
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    /// The node exists but cannot take part in the requested operation.
    #[error("node '{name}' is not {expected}")]
    WrongKind { name: String, expected: &'static str },

    /// An observable cannot be disposed while derivations depend on it.
    #[error("observable '{name}' still has {observers} observer(s)")]
    StillObserved { name: String, observers: usize },

    /// The reaction was disposed before it could track.
    #[error("reaction '{name}' has been disposed")]
    Disposed { name: String },

    /// Failure reported by user code running inside a derivation.
    #[error("{0}")]
    Derivation(String),
}

impl ReactiveError {
    /// Build a [`ReactiveError::Derivation`] from any displayable error.
    pub fn derivation(err: impl std::fmt::Display) -> Self {
        Self::Derivation(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors raised while loading a [`RuntimeConfig`](crate::RuntimeConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid runtime config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("max_reaction_iterations must be at least 1")]
    ZeroIterations,
}
