//! Step model - an atomic action bound to one agent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::id::{AgentId, StepId};
use crate::{Parameters, Time};

/// Lifecycle of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Waiting for its dependencies
    Pending,
    /// Agent call in flight
    Running,
    /// Agent returned a result
    Completed,
    /// Agent returned an error
    Failed,
}

impl StepStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique within the owning task
    pub id: StepId,

    /// Display name
    pub name: String,

    /// Capability key of the agent that runs this step
    pub agent_id: AgentId,

    /// Operation name passed to the agent executor
    pub action: String,

    /// Opaque parameters passed to the agent executor
    pub parameters: Parameters,

    /// Steps that must complete before this one starts
    pub dependencies: Vec<StepId>,

    /// Current status
    pub status: StepStatus,

    /// Success payload
    pub result: Option<Value>,

    /// Failure description
    pub error: Option<String>,

    /// When the agent call started
    pub started_at: Option<Time>,

    /// When the step reached a terminal state
    pub completed_at: Option<Time>,

    /// Fraction done, in [0, 1]
    pub progress: f32,
}

impl Step {
    /// Create a new pending step.
    pub fn new(
        id: StepId,
        name: impl Into<String>,
        agent_id: AgentId,
        action: impl Into<String>,
        parameters: Parameters,
        dependencies: Vec<StepId>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            agent_id,
            action: action.into(),
            parameters,
            dependencies,
            status: StepStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            progress: 0.0,
        }
    }

    /// PENDING -> RUNNING.
    pub fn start(&mut self, now: Time) -> Result<()> {
        if self.status != StepStatus::Pending {
            return Err(Error::invalid_transition(self.status, StepStatus::Running));
        }
        self.status = StepStatus::Running;
        self.started_at.get_or_insert(now);
        Ok(())
    }

    /// RUNNING -> COMPLETED, storing the agent result.
    pub fn complete(&mut self, result: Value, now: Time) -> Result<()> {
        if self.status != StepStatus::Running {
            return Err(Error::invalid_transition(self.status, StepStatus::Completed));
        }
        self.status = StepStatus::Completed;
        self.result = Some(result);
        self.completed_at.get_or_insert(now);
        self.set_progress(1.0);
        Ok(())
    }

    /// RUNNING -> FAILED, storing the failure cause.
    pub fn fail(&mut self, error: impl Into<String>, now: Time) -> Result<()> {
        if self.status != StepStatus::Running {
            return Err(Error::invalid_transition(self.status, StepStatus::Failed));
        }
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.completed_at.get_or_insert(now);
        Ok(())
    }

    /// Raise progress; lower values are ignored.
    pub fn set_progress(&mut self, progress: f32) {
        let progress = progress.clamp(0.0, 1.0);
        if progress > self.progress {
            self.progress = progress;
        }
    }
}

/// Caller-supplied description of a step for custom tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Display name
    pub name: String,

    /// Agent capability key
    pub agent_id: AgentId,

    /// Operation name
    pub action: String,

    /// Per-step parameters
    #[serde(default)]
    pub parameters: Parameters,

    /// References to sibling steps (step key, name or ID)
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl StepSpec {
    /// Create a step spec without parameters or dependencies.
    pub fn new(name: impl Into<String>, agent_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent_id: AgentId::new(agent_id),
            action: action.into(),
            parameters: Parameters::new(),
            dependencies: Vec::new(),
        }
    }

    /// Add a dependency reference.
    pub fn depends_on(mut self, reference: impl Into<String>) -> Self {
        self.dependencies.push(reference.into());
        self
    }

    /// Set a parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Derive the key a step can be referenced by: its name in snake_case.
///
/// `"Research Topic"` becomes `research_topic`.
pub fn step_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_alphanumeric() {
            key.extend(c.to_lowercase());
        } else if !key.ends_with('_') {
            key.push('_');
        }
    }
    key.trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_step() -> Step {
        Step::new(
            StepId::new("t_step_0"),
            "Research Topic",
            AgentId::new("research"),
            "web_search",
            Parameters::new(),
            Vec::new(),
        )
    }

    #[test]
    fn test_step_lifecycle() {
        let mut step = create_test_step();
        let now = chrono::Utc::now();

        step.start(now).unwrap();
        assert_eq!(step.status, StepStatus::Running);
        assert_eq!(step.started_at, Some(now));

        step.complete(json!({"ok": true}), now).unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.progress, 1.0);
        assert!(step.error.is_none());
    }

    #[test]
    fn test_step_cannot_restart() {
        let mut step = create_test_step();
        let now = chrono::Utc::now();
        step.start(now).unwrap();
        step.fail("boom", now).unwrap();

        assert!(matches!(step.start(now), Err(Error::InvalidTransition { .. })));
        assert!(step.complete(json!(null), now).is_err());
        assert_eq!(step.error.as_deref(), Some("boom"));
        assert!(step.result.is_none());
    }

    #[test]
    fn test_step_cannot_skip_running() {
        let mut step = create_test_step();
        assert!(step.complete(json!(1), chrono::Utc::now()).is_err());
        assert_eq!(step.status, StepStatus::Pending);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut step = create_test_step();
        step.set_progress(0.6);
        step.set_progress(0.2);
        assert_eq!(step.progress, 0.6);
        step.set_progress(7.0);
        assert_eq!(step.progress, 1.0);
    }

    #[test]
    fn test_step_key() {
        assert_eq!(step_key("Research Topic"), "research_topic");
        assert_eq!(step_key("Review and Edit"), "review_and_edit");
        assert_eq!(step_key("  Load  Data! "), "load_data");
    }

    #[test]
    fn test_step_spec_deserialize_defaults() {
        let spec: StepSpec = serde_json::from_value(json!({
            "name": "Load Data",
            "agent_id": "data",
            "action": "load_data"
        }))
        .unwrap();
        assert!(spec.parameters.is_empty());
        assert!(spec.dependencies.is_empty());
        assert_eq!(spec.agent_id, AgentId::new("data"));
    }
}
