//! Stand-in agent executor for local runs.

use std::collections::HashSet;
use std::time::Duration;

use agentflow_core::{AgentDescriptor, AgentExecutor, Parameters};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Sleeps for a fixed latency and echoes what it was asked to do.
pub struct SimulatedExecutor {
    latency: Duration,
    failing: HashSet<String>,
}

impl SimulatedExecutor {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            failing: HashSet::new(),
        }
    }

    /// Make every call to `action` fail.
    pub fn with_failing_action(mut self, action: impl Into<String>) -> Self {
        self.failing.insert(action.into());
        self
    }
}

#[async_trait]
impl AgentExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        agent: &AgentDescriptor,
        action: &str,
        parameters: &Parameters,
    ) -> Result<Value, anyhow::Error> {
        tokio::time::sleep(self.latency).await;

        if self.failing.contains(action) {
            anyhow::bail!("simulated failure in {}", action);
        }

        Ok(json!({
            "agent": agent.id,
            "agent_name": agent.name,
            "action": action,
            "parameters": parameters,
            "simulated": true,
        }))
    }
}
