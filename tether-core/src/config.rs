//! Runtime Configuration
//!
//! Policies that govern where observable state may be read or written.
//! The defaults impose no restrictions.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How strictly writes must be wrapped in actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforceActions {
    /// Writes are allowed anywhere (except inside computed values).
    #[default]
    Never,

    /// Writes to observables that have observers must happen in an action.
    Observed,

    /// Every write must happen in an action.
    Always,
}

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// State-change policy.
    pub enforce_actions: EnforceActions,

    /// Reject reads outside derivations, actions and allow-regions.
    pub observable_requires_reaction: bool,

    /// Warn when a computed value is read with nothing observing it.
    pub computed_requires_reaction: bool,

    /// Reaction rounds allowed before the loop is considered divergent.
    pub max_reaction_iterations: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enforce_actions: EnforceActions::Never,
            observable_requires_reaction: false,
            computed_requires_reaction: false,
            max_reaction_iterations: 100,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a JSON configuration document.
    ///
    /// Missing fields take their default values.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants `from_json` enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_reaction_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        Ok(())
    }

    pub fn with_enforce_actions(mut self, enforce_actions: EnforceActions) -> Self {
        self.enforce_actions = enforce_actions;
        self
    }

    pub fn with_observable_requires_reaction(mut self, enabled: bool) -> Self {
        self.observable_requires_reaction = enabled;
        self
    }

    pub fn with_computed_requires_reaction(mut self, enabled: bool) -> Self {
        self.computed_requires_reaction = enabled;
        self
    }

    /// Set the reaction round limit. Zero is raised to one.
    pub fn with_max_reaction_iterations(mut self, iterations: usize) -> Self {
        self.max_reaction_iterations = iterations.max(1);
        self
    }
}
