//! AgentFlow CLI - run multi-step agent tasks locally.

mod simulated;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agentflow_core::{
    Parameters, StaticAgentDirectory, StepSpec, TaskId, TaskPriority, TaskSnapshot, TaskStatus,
    UserId,
};
use agentflow_execution::{
    DependencyResolver, FnObserver, Orchestrator, OrchestratorConfig, OrchestratorFileConfig,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use simulated::SimulatedExecutor;

#[derive(Parser)]
#[command(name = "agentflow")]
#[command(about = "Multi-step agent task orchestration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Max tasks executing at once (overrides the config file)
    #[arg(long, global = true)]
    max_concurrent: Option<usize>,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// User that owns created tasks
    #[arg(long, global = true, default_value = "local")]
    user: String,

    /// Simulated agent latency in milliseconds
    #[arg(long, global = true, default_value = "200")]
    latency_ms: u64,

    /// Make every call to this action fail
    #[arg(long, global = true)]
    fail_action: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List task templates and their rounds
    Templates,
    /// List available agents
    Agents,
    /// Run a task from a template
    Run {
        /// Template key
        template: String,
        /// Step parameter as key=value (value parsed as JSON when possible)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },
    /// Run a task described by a JSON file
    RunCustom {
        /// Path to the task file
        file: PathBuf,
    },
}

/// Task file accepted by `run-custom`.
#[derive(Debug, Deserialize)]
struct CustomTaskFile {
    #[serde(default = "default_title")]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_task_type")]
    task_type: String,
    #[serde(default)]
    priority: TaskPriority,
    steps: Vec<StepSpec>,
}

fn default_title() -> String {
    "Custom Task".to_string()
}

fn default_task_type() -> String {
    "custom".to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let mut executor = SimulatedExecutor::new(Duration::from_millis(cli.latency_ms));
    for action in &cli.fail_action {
        executor = executor.with_failing_action(action.clone());
    }

    let orchestrator = Orchestrator::new(
        Arc::new(executor),
        Arc::new(StaticAgentDirectory::with_defaults()),
    )
    .with_config(config);

    let user = UserId::new(cli.user.clone());

    match cli.command {
        Commands::Templates => print_templates(&orchestrator)?,
        Commands::Agents => {
            for agent in orchestrator.list_agents() {
                println!("{:<14} {:<20} {}", agent.id, agent.name, agent.description);
                println!("{:<14} capabilities: {}", "", agent.capabilities.join(", "));
            }
        }
        Commands::Run { template, params } => {
            let parameters: Parameters = params.into_iter().collect();
            let task_id = orchestrator
                .create_task_from_template(user, &template, parameters)
                .await?;
            run_to_completion(&orchestrator, task_id).await?;
        }
        Commands::RunCustom { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let spec: CustomTaskFile = serde_json::from_str(&json)
                .with_context(|| format!("Invalid task file {}", file.display()))?;

            let task_id = orchestrator
                .create_custom_task(
                    user,
                    spec.title,
                    spec.description,
                    spec.task_type,
                    spec.steps,
                    spec.priority,
                )
                .await?;
            run_to_completion(&orchestrator, task_id).await?;
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<OrchestratorConfig> {
    let mut file = match &cli.config {
        Some(path) => OrchestratorFileConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => OrchestratorFileConfig::default(),
    };
    if let Some(max) = cli.max_concurrent {
        file.max_concurrent_tasks = max;
    }
    Ok(file.into_config()?)
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn print_templates(orchestrator: &Orchestrator) -> Result<()> {
    let resolver = DependencyResolver::new();

    for template in orchestrator.get_task_templates() {
        println!("{} - {}", template.key, template.name);
        println!("  {}", template.description);

        let steps = orchestrator
            .templates()
            .instantiate(&template.key, TaskId::new(), &Parameters::new())?;
        let names: HashMap<_, _> = steps.iter().map(|s| (s.id.clone(), s.name.as_str())).collect();

        for (i, round) in resolver.plan_rounds(&steps)?.iter().enumerate() {
            let round: Vec<&str> = round.iter().filter_map(|id| names.get(id).copied()).collect();
            println!("  round {}: {}", i + 1, round.join(", "));
        }
    }
    Ok(())
}

async fn run_to_completion(orchestrator: &Orchestrator, task_id: TaskId) -> Result<()> {
    orchestrator
        .subscribe_to_task(task_id, FnObserver::new(print_update))
        .await;

    orchestrator.start().await;
    info!("Waiting for task {}", task_id);

    let status = orchestrator
        .wait_for_completion(task_id, Duration::from_secs(3600))
        .await;
    orchestrator.flush_notifications().await;
    orchestrator.stop().await;

    let task = orchestrator
        .get_task(task_id)
        .await
        .with_context(|| format!("Task {task_id} disappeared"))?;
    if status.is_none() {
        anyhow::bail!("Task {} did not finish in time", task_id);
    }

    match task.status {
        TaskStatus::Completed => {
            let result = serde_json::to_string_pretty(&task.result)?;
            println!("{result}");
            Ok(())
        }
        _ => anyhow::bail!(
            "Task {} {}: {}",
            task_id,
            task.status,
            task.error.unwrap_or_default()
        ),
    }
}

fn print_update(snapshot: &TaskSnapshot) -> anyhow::Result<()> {
    let done = snapshot.steps.iter().filter(|s| s.status == "completed").count();
    let running: Vec<&str> = snapshot
        .steps
        .iter()
        .filter(|s| s.status == "running")
        .map(|s| s.name.as_str())
        .collect();

    println!(
        "[{:>9}] {} {:>3.0}% ({}/{}){}",
        snapshot.status,
        snapshot.title,
        snapshot.progress * 100.0,
        done,
        snapshot.steps.len(),
        if running.is_empty() {
            String::new()
        } else {
            format!(" running: {}", running.join(", "))
        }
    );
    Ok(())
}
