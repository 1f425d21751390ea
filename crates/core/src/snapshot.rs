//! Serializable task views handed to observers and API handlers.
//!
//! Snapshots are deep copies: enums are rendered to their lowercase names and
//! timestamps to RFC 3339 strings, so later mutation of the live task cannot
//! change what a consumer already holds.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::step::Step;
use crate::task::{Task, TaskResult};
use crate::{Parameters, Time};

fn rfc3339(t: Option<Time>) -> Option<String> {
    t.map(|t| t.to_rfc3339())
}

/// Point-in-time copy of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    /// Step ID
    pub id: String,
    /// Step name
    pub name: String,
    /// Agent capability key
    pub agent_id: String,
    /// Operation name
    pub action: String,
    /// Agent parameters
    pub parameters: Parameters,
    /// Dependency step IDs
    pub dependencies: Vec<String>,
    /// Status name
    pub status: String,
    /// Agent result
    pub result: Option<Value>,
    /// Failure cause
    pub error: Option<String>,
    /// Start time (RFC 3339)
    pub started_at: Option<String>,
    /// Completion time (RFC 3339)
    pub completed_at: Option<String>,
    /// Fraction done
    pub progress: f32,
}

impl From<&Step> for StepSnapshot {
    fn from(step: &Step) -> Self {
        Self {
            id: step.id.to_string(),
            name: step.name.clone(),
            agent_id: step.agent_id.to_string(),
            action: step.action.clone(),
            parameters: step.parameters.clone(),
            dependencies: step.dependencies.iter().map(ToString::to_string).collect(),
            status: step.status.to_string(),
            result: step.result.clone(),
            error: step.error.clone(),
            started_at: rfc3339(step.started_at),
            completed_at: rfc3339(step.completed_at),
            progress: step.progress,
        }
    }
}

/// Point-in-time copy of a task, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task ID
    pub id: String,
    /// Owner
    pub user_id: String,
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Task type
    pub task_type: String,
    /// Priority name
    pub priority: String,
    /// Steps in task order
    pub steps: Vec<StepSnapshot>,
    /// Status name
    pub status: String,
    /// Fraction of steps completed
    pub progress: f32,
    /// Aggregate result
    pub result: Option<TaskResult>,
    /// First fatal reason
    pub error: Option<String>,
    /// Creation time (RFC 3339)
    pub created_at: String,
    /// Start time (RFC 3339)
    pub started_at: Option<String>,
    /// Completion time (RFC 3339)
    pub completed_at: Option<String>,
    /// Estimated seconds
    pub estimated_duration: Option<u64>,
    /// Actual seconds
    pub actual_duration: Option<u64>,
    /// Creation metadata
    pub metadata: Parameters,
}

impl From<&Task> for TaskSnapshot {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.to_string(),
            user_id: task.user_id.to_string(),
            title: task.title.clone(),
            description: task.description.clone(),
            task_type: task.task_type.clone(),
            priority: task.priority.to_string(),
            steps: task.steps.iter().map(StepSnapshot::from).collect(),
            status: task.status.to_string(),
            progress: task.progress,
            result: task.result.clone(),
            error: task.error.clone(),
            created_at: task.created_at.to_rfc3339(),
            started_at: rfc3339(task.started_at),
            completed_at: rfc3339(task.completed_at),
            estimated_duration: task.estimated_duration,
            actual_duration: task.actual_duration,
            metadata: task.metadata.clone(),
        }
    }
}

/// Compact status view returned by `get_task_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusSnapshot {
    /// Task ID
    pub id: String,
    /// Status name
    pub status: String,
    /// Fraction of steps completed
    pub progress: f32,
    /// Steps that completed
    pub steps_completed: usize,
    /// All steps
    pub total_steps: usize,
    /// First fatal reason
    pub error: Option<String>,
    /// Estimated seconds
    pub estimated_duration: Option<u64>,
    /// Actual seconds
    pub actual_duration: Option<u64>,
}

impl From<&Task> for TaskStatusSnapshot {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.to_string(),
            status: task.status.to_string(),
            progress: task.progress,
            steps_completed: task.completed_steps(),
            total_steps: task.steps.len(),
            error: task.error.clone(),
            estimated_duration: task.estimated_duration,
            actual_duration: task.actual_duration,
        }
    }
}

/// List row for a user's tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Task ID
    pub id: String,
    /// Title
    pub title: String,
    /// Task type
    pub task_type: String,
    /// Priority name
    pub priority: String,
    /// Status name
    pub status: String,
    /// Fraction of steps completed
    pub progress: f32,
    /// Creation time (RFC 3339)
    pub created_at: String,
    /// Completion time (RFC 3339)
    pub completed_at: Option<String>,
    /// All steps
    pub steps_count: usize,
    /// Steps that completed
    pub completed_steps: usize,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.to_string(),
            title: task.title.clone(),
            task_type: task.task_type.clone(),
            priority: task.priority.to_string(),
            status: task.status.to_string(),
            progress: task.progress,
            created_at: task.created_at.to_rfc3339(),
            completed_at: rfc3339(task.completed_at),
            steps_count: task.steps.len(),
            completed_steps: task.completed_steps(),
        }
    }
}
