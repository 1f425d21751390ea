//! Task templates - named, reusable step graphs.

use std::collections::BTreeMap;

use agentflow_core::{
    step_key, AgentId, Error, Parameters, Result, Step, StepId, StepSpec, TaskId,
};
use serde::{Deserialize, Serialize};

/// A step inside a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepBlueprint {
    /// Step name
    pub name: String,

    /// Agent capability key
    pub agent_id: AgentId,

    /// Operation name
    pub action: String,

    /// Keys of sibling steps this step waits for
    pub dependencies: Vec<String>,
}

impl StepBlueprint {
    /// Create a blueprint with no dependencies.
    pub fn new(name: impl Into<String>, agent_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent_id: AgentId::new(agent_id),
            action: action.into(),
            dependencies: Vec::new(),
        }
    }

    /// Wait for the sibling step with this key.
    pub fn after(mut self, key: impl Into<String>) -> Self {
        self.dependencies.push(key.into());
        self
    }
}

/// A named, reusable step graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Lookup key (also the task type of instantiated tasks)
    pub key: String,

    /// Title given to instantiated tasks
    pub name: String,

    /// Description given to instantiated tasks
    pub description: String,

    /// Steps in order
    pub steps: Vec<StepBlueprint>,
}

impl TaskTemplate {
    /// Create an empty template.
    pub fn new(key: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            description: description.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step.
    pub fn step(mut self, step: StepBlueprint) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a step that depends on the previously appended one.
    pub fn then(self, step: StepBlueprint) -> Self {
        let step = match self.steps.last() {
            Some(prev) => step.after(step_key(&prev.name)),
            None => step,
        };
        self.step(step)
    }
}

/// Read-only registry of task templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, TaskTemplate>,
}

impl TemplateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template, replacing any with the same key.
    pub fn with_template(mut self, template: TaskTemplate) -> Self {
        self.templates.insert(template.key.clone(), template);
        self
    }

    /// Registry with the built-in templates.
    pub fn with_builtin() -> Self {
        Self::new()
            .with_template(
                TaskTemplate::new("content_creation", "Content Creation", "Create various types of content")
                    .then(StepBlueprint::new("Research Topic", "research", "web_search"))
                    .then(StepBlueprint::new("Generate Content", "content", "generate_text"))
                    .then(StepBlueprint::new("Review and Edit", "content", "review_content")),
            )
            .with_template(
                TaskTemplate::new("presentation_creation", "Presentation Creation", "Create a complete presentation")
                    .then(StepBlueprint::new("Research Topic", "research", "web_search"))
                    .then(StepBlueprint::new("Generate Outline", "planning", "create_outline"))
                    .then(StepBlueprint::new("Create Slides", "content", "generate_slides"))
                    .then(StepBlueprint::new("Generate Images", "image", "generate_images"))
                    .then(StepBlueprint::new("Compile Presentation", "executor", "create_presentation")),
            )
            .with_template(
                TaskTemplate::new("web_automation", "Web Automation", "Automate web-based tasks")
                    .then(StepBlueprint::new("Analyze Task", "planning", "analyze_automation_task"))
                    .then(StepBlueprint::new("Create Browser Session", "executor", "create_browser_session"))
                    .then(StepBlueprint::new("Execute Automation", "executor", "execute_automation"))
                    .then(StepBlueprint::new("Extract Results", "executor", "extract_results")),
            )
            .with_template(
                TaskTemplate::new("data_analysis", "Data Analysis", "Analyze data and create insights")
                    .then(StepBlueprint::new("Load Data", "data", "load_data"))
                    .then(StepBlueprint::new("Clean Data", "data", "clean_data"))
                    .then(StepBlueprint::new("Analyze Data", "data", "analyze_data"))
                    .then(StepBlueprint::new("Create Visualizations", "data", "create_visualizations"))
                    .then(StepBlueprint::new("Generate Report", "content", "generate_report")),
            )
    }

    /// Look up a template.
    pub fn get(&self, key: &str) -> Option<&TaskTemplate> {
        self.templates.get(key)
    }

    /// Registered template keys, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    /// All templates, sorted by key.
    pub fn templates(&self) -> Vec<TaskTemplate> {
        self.templates.values().cloned().collect()
    }

    /// Build the concrete steps of `template` for task `task_id`.
    ///
    /// Every step receives its own copy of `parameters`.
    pub fn instantiate(&self, template: &str, task_id: TaskId, parameters: &Parameters) -> Result<Vec<Step>> {
        let template = self
            .get(template)
            .ok_or_else(|| Error::UnknownTemplate(template.to_string()))?;

        let specs: Vec<StepSpec> = template
            .steps
            .iter()
            .map(|b| StepSpec {
                name: b.name.clone(),
                agent_id: b.agent_id.clone(),
                action: b.action.clone(),
                parameters: parameters.clone(),
                dependencies: b.dependencies.clone(),
            })
            .collect();

        Ok(build_steps(task_id, specs))
    }
}

/// Turn step specs into steps of `task_id`, linking dependency references.
///
/// A reference may be a sibling's step key, its exact name, or the step ID
/// it will receive. Unresolvable references are kept verbatim; the resolver
/// reports them as missing once the task stalls.
pub fn build_steps(task_id: TaskId, specs: Vec<StepSpec>) -> Vec<Step> {
    let ids: Vec<StepId> = (0..specs.len()).map(|i| StepId::for_task(task_id, i)).collect();

    let mut lookup: BTreeMap<String, StepId> = BTreeMap::new();
    for (spec, id) in specs.iter().zip(&ids) {
        lookup.entry(step_key(&spec.name)).or_insert_with(|| id.clone());
        lookup.entry(spec.name.clone()).or_insert_with(|| id.clone());
        lookup.insert(id.to_string(), id.clone());
    }

    specs
        .into_iter()
        .zip(ids)
        .map(|(spec, id)| {
            let dependencies = spec
                .dependencies
                .iter()
                .map(|r| lookup.get(r).cloned().unwrap_or_else(|| StepId::new(r.as_str())))
                .collect();
            Step::new(id, spec.name, spec.agent_id, spec.action, spec.parameters, dependencies)
        })
        .collect()
}
