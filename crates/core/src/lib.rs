//! AgentFlow core data models.
//!
//! This crate defines the task and step records the orchestration engine
//! drives, the snapshots it hands out, and the agent traits it calls into.

#![warn(missing_docs)]

// Core identities
mod id;
mod error;

// Task execution
mod step;
mod task;
mod snapshot;

// Collaborators
mod agent;

// Re-exports
pub use id::*;
pub use error::{Error, Result};

pub use step::{Step, StepStatus, StepSpec, step_key};
pub use task::{Task, TaskStatus, TaskPriority, TaskResult, StepSummary};
pub use snapshot::{TaskSnapshot, StepSnapshot, TaskStatusSnapshot, TaskSummary};

pub use agent::{AgentDescriptor, AgentExecutor, AgentDirectory, StaticAgentDirectory};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;

/// Opaque key-value parameters passed to agents
pub type Parameters = serde_json::Map<String, serde_json::Value>;
