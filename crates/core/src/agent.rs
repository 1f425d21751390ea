//! Agent abstraction - the collaborators that actually perform step actions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::AgentId;
use crate::Parameters;

/// Description of an available agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Capability key steps are bound to
    pub id: AgentId,

    /// Display name
    pub name: String,

    /// What the agent is for
    pub description: String,

    /// Capability tags
    pub capabilities: Vec<String>,
}

impl AgentDescriptor {
    /// Create a new descriptor.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        capabilities: &[&str],
    ) -> Self {
        Self {
            id: AgentId::new(id),
            name: name.into(),
            description: description.into(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Performs step actions on behalf of agents.
///
/// Implementations must be safe to call concurrently for distinct steps.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Run `action` with `parameters` as `agent`.
    async fn execute(
        &self,
        agent: &AgentDescriptor,
        action: &str,
        parameters: &Parameters,
    ) -> Result<Value, anyhow::Error>;

    /// Whether this executor knows how to run `action`.
    ///
    /// Checked when a task is created so unknown actions fail before any
    /// step runs.
    fn supports(&self, _action: &str) -> bool {
        true
    }
}

/// Lists the agents steps can be bound to.
pub trait AgentDirectory: Send + Sync {
    /// All known agents.
    fn list_agents(&self) -> Vec<AgentDescriptor>;

    /// Find an agent by ID.
    fn find(&self, id: &AgentId) -> Option<AgentDescriptor> {
        self.list_agents().into_iter().find(|a| &a.id == id)
    }
}

/// In-memory agent directory, fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticAgentDirectory {
    agents: Vec<AgentDescriptor>,
}

impl StaticAgentDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent, replacing any agent with the same ID.
    pub fn with_agent(mut self, agent: AgentDescriptor) -> Self {
        self.agents.retain(|a| a.id != agent.id);
        self.agents.push(agent);
        self
    }

    /// Directory with the standard agent roster.
    pub fn with_defaults() -> Self {
        [
            AgentDescriptor::new(
                "executor",
                "Task Executor",
                "General-purpose agent for executing various tasks",
                &["task_execution", "problem_solving", "general_assistance"],
            ),
            AgentDescriptor::new(
                "planning",
                "Strategic Planner",
                "Creates detailed execution plans and strategies",
                &["strategic_planning", "project_management", "task_breakdown"],
            ),
            AgentDescriptor::new(
                "knowledge",
                "Knowledge Researcher",
                "Searches and synthesizes information from various sources",
                &["web_search", "information_synthesis", "fact_checking"],
            ),
            AgentDescriptor::new(
                "content",
                "Content Creator",
                "Generates various types of written content",
                &["article_writing", "blog_posts", "social_media", "copywriting"],
            ),
            AgentDescriptor::new(
                "image",
                "Visual Designer",
                "Creates and generates images and visual content",
                &["image_generation", "visual_design", "graphic_creation"],
            ),
            AgentDescriptor::new(
                "video",
                "Video Producer",
                "Creates and edits video content",
                &["video_generation", "video_editing", "animation"],
            ),
            AgentDescriptor::new(
                "code",
                "Code Developer",
                "Generates and debugs code in multiple languages",
                &["code_generation", "debugging", "software_development"],
            ),
            AgentDescriptor::new(
                "data",
                "Data Analyst",
                "Analyzes data and creates insights",
                &["data_analysis", "visualization", "statistical_analysis"],
            ),
            AgentDescriptor::new(
                "web",
                "Web Developer",
                "Creates web applications and websites",
                &["web_development", "frontend", "backend", "full_stack"],
            ),
            AgentDescriptor::new(
                "research",
                "Research Specialist",
                "Conducts comprehensive research and analysis",
                &["academic_research", "market_research", "competitive_analysis"],
            ),
            AgentDescriptor::new(
                "communication",
                "Communication Expert",
                "Creates professional communications and presentations",
                &["email_writing", "presentations", "business_communication"],
            ),
        ]
        .into_iter()
        .fold(Self::new(), Self::with_agent)
    }
}

impl AgentDirectory for StaticAgentDirectory {
    fn list_agents(&self) -> Vec<AgentDescriptor> {
        self.agents.clone()
    }

    fn find(&self, id: &AgentId) -> Option<AgentDescriptor> {
        self.agents.iter().find(|a| &a.id == id).cloned()
    }
}
