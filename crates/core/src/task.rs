//! Task model - a user-submitted unit of work composed of ordered steps.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::id::{StepId, TaskId, UserId};
use crate::step::{Step, StepStatus};
use crate::{Parameters, Time};

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, waiting in the queue
    Pending,
    /// Admitted and executing rounds
    Running,
    /// Every step completed
    Completed,
    /// A step failed or the graph stalled
    Failed,
    /// Cancelled by the caller
    Cancelled,
    /// Running, but no new round may start
    Paused,
}

impl TaskStatus {
    /// Whether no further execution may happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission priority. Stored on the task; the queue is FIFO regardless.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Background work
    Low,
    /// Default
    #[default]
    Normal,
    /// Ahead of normal work
    High,
    /// Needs attention now
    Urgent,
}

impl TaskPriority {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Outcome of one step inside a [`TaskResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    /// Step ID
    pub step_id: StepId,
    /// Step name
    pub name: String,
    /// Final step status
    pub status: StepStatus,
    /// Agent result, if completed
    pub result: Option<Value>,
    /// Failure cause, if failed
    pub error: Option<String>,
}

/// Aggregate result stored on a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task ID
    pub task_id: TaskId,
    /// Task title
    pub title: String,
    /// Final task status
    pub status: TaskStatus,
    /// Final progress
    pub progress: f32,
    /// Steps that completed
    pub steps_completed: usize,
    /// All steps
    pub total_steps: usize,
    /// Wall-clock seconds between start and completion
    pub duration: Option<u64>,
    /// Per-step outcomes in task order
    pub step_results: Vec<StepSummary>,
}

/// A task and its steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,

    /// Owner
    pub user_id: UserId,

    /// Task title
    pub title: String,

    /// Detailed description
    pub description: String,

    /// Template key or caller-chosen type
    pub task_type: String,

    /// Admission metadata
    pub priority: TaskPriority,

    /// Steps, owned exclusively by this task
    pub steps: Vec<Step>,

    /// Current status
    pub status: TaskStatus,

    /// Fraction of steps completed
    pub progress: f32,

    /// Aggregate result, set on completion
    pub result: Option<TaskResult>,

    /// First fatal reason
    pub error: Option<String>,

    /// Creation timestamp
    pub created_at: Time,

    /// When execution started
    pub started_at: Option<Time>,

    /// When the task reached a terminal state
    pub completed_at: Option<Time>,

    /// Estimated seconds to complete
    pub estimated_duration: Option<u64>,

    /// Seconds between start and completion
    pub actual_duration: Option<u64>,

    /// Free-form data carried from creation
    pub metadata: Parameters,
}

impl Task {
    /// Create a new pending task.
    pub fn new(
        id: TaskId,
        user_id: UserId,
        title: impl Into<String>,
        description: impl Into<String>,
        task_type: impl Into<String>,
        steps: Vec<Step>,
    ) -> Self {
        Self {
            id,
            user_id,
            title: title.into(),
            description: description.into(),
            task_type: task_type.into(),
            priority: TaskPriority::default(),
            steps,
            status: TaskStatus::Pending,
            progress: 0.0,
            result: None,
            error: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            estimated_duration: None,
            actual_duration: None,
            metadata: Parameters::new(),
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the metadata.
    pub fn with_metadata(mut self, metadata: Parameters) -> Self {
        self.metadata = metadata;
        self
    }

    /// Whether no further execution may happen.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of completed steps.
    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// Look up a step by ID.
    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// Look up a step by ID, mutably.
    pub fn step_mut(&mut self, id: &StepId) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| &s.id == id)
    }

    /// Recompute `progress` from step statuses.
    pub fn recompute_progress(&mut self) -> f32 {
        if !self.steps.is_empty() {
            self.progress = self.completed_steps() as f32 / self.steps.len() as f32;
        }
        self.progress
    }

    /// PENDING -> RUNNING.
    pub fn start(&mut self, now: Time) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(Error::invalid_transition(self.status, TaskStatus::Running));
        }
        self.status = TaskStatus::Running;
        self.started_at.get_or_insert(now);
        Ok(())
    }

    /// RUNNING -> PAUSED.
    pub fn pause(&mut self) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(Error::invalid_transition(self.status, TaskStatus::Paused));
        }
        self.status = TaskStatus::Paused;
        Ok(())
    }

    /// PAUSED -> RUNNING.
    pub fn resume(&mut self) -> Result<()> {
        if self.status != TaskStatus::Paused {
            return Err(Error::invalid_transition(self.status, TaskStatus::Running));
        }
        self.status = TaskStatus::Running;
        Ok(())
    }

    /// PENDING | RUNNING | PAUSED -> CANCELLED.
    pub fn cancel(&mut self, now: Time) -> Result<()> {
        if self.is_terminal() {
            return Err(Error::invalid_transition(self.status, TaskStatus::Cancelled));
        }
        self.status = TaskStatus::Cancelled;
        self.completed_at.get_or_insert(now);
        Ok(())
    }

    /// Any non-terminal state -> FAILED. Keeps the first recorded error.
    pub fn fail(&mut self, error: impl Into<String>, now: Time) -> Result<()> {
        if self.is_terminal() {
            return Err(Error::invalid_transition(self.status, TaskStatus::Failed));
        }
        self.status = TaskStatus::Failed;
        if self.error.is_none() {
            self.error = Some(error.into());
        }
        self.completed_at.get_or_insert(now);
        self.actual_duration = self.elapsed_seconds();
        Ok(())
    }

    /// RUNNING -> COMPLETED, computing duration and the aggregate result.
    pub fn complete(&mut self, now: Time) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(Error::invalid_transition(self.status, TaskStatus::Completed));
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        self.progress = 1.0;
        self.actual_duration = self.elapsed_seconds();
        self.result = Some(self.compile_result());
        Ok(())
    }

    /// Build the aggregate result from the current step records.
    pub fn compile_result(&self) -> TaskResult {
        TaskResult {
            task_id: self.id,
            title: self.title.clone(),
            status: self.status,
            progress: self.progress,
            steps_completed: self.completed_steps(),
            total_steps: self.steps.len(),
            duration: self.actual_duration,
            step_results: self
                .steps
                .iter()
                .map(|s| StepSummary {
                    step_id: s.id.clone(),
                    name: s.name.clone(),
                    status: s.status,
                    result: s.result.clone(),
                    error: s.error.clone(),
                })
                .collect(),
        }
    }

    fn elapsed_seconds(&self) -> Option<u64> {
        let (start, end) = (self.started_at?, self.completed_at?);
        Some((end - start).num_seconds().max(0) as u64)
    }
}
