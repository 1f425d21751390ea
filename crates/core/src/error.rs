//! Error types shared by the orchestration crates.

use std::time::Duration;

use crate::id::StepId;

/// Result alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while creating or executing tasks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// No template is registered under this name
    #[error("Unknown task template: {0}")]
    UnknownTemplate(String),

    /// The agent directory has no agent with this ID
    #[error("Agent '{0}' not found")]
    AgentNotFound(String),

    /// The executor cannot perform this action
    #[error("Agent '{agent}' does not support action '{action}'")]
    UnsupportedAction {
        /// Agent the step was bound to
        agent: String,
        /// Rejected action name
        action: String,
    },

    /// Pending steps remain but none of them can ever become ready
    #[error("Circular dependencies or missing steps detected: {}", join_ids(.pending))]
    DeadlockOrMissingStep {
        /// Steps still waiting when progress stopped
        pending: Vec<StepId>,
    },

    /// A step's agent call returned an error
    #[error("Step '{step}' failed: {cause}")]
    StepExecutionFailed {
        /// Step name
        step: String,
        /// Human-readable cause
        cause: String,
    },

    /// A step's agent call did not return in time
    #[error("timed out after {after:?}")]
    StepTimeout {
        /// Configured timeout
        after: Duration,
    },

    /// A step's agent call panicked
    #[error("agent panicked: {0}")]
    AgentPanicked(String),

    /// A state change was requested from a state that does not allow it
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state name
        from: String,
        /// Requested state name
        to: String,
    },
}

impl Error {
    /// Build an [`Error::InvalidTransition`] from any displayable states.
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

fn join_ids(ids: &[StepId]) -> String {
    ids.iter().map(StepId::as_str).collect::<Vec<_>>().join(", ")
}
