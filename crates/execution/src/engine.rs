//! The execution engine - drives one task through its rounds.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use agentflow_core::{
    AgentDirectory, AgentExecutor, AgentId, Error, Parameters, StepId, Task, TaskSnapshot,
    TaskStatus,
};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dependency::{DependencyResolver, Resolution};
use crate::notify::NotificationBus;

/// A task shared between the task table and its execution.
pub type SharedTask = Arc<Mutex<Task>>;

/// Configuration for the execution engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a single agent call (None = wait forever)
    pub step_timeout: Option<Duration>,
    /// How often a paused task checks whether it was resumed
    pub pause_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout: None,
            pause_poll_interval: Duration::from_millis(100),
        }
    }
}

impl EngineConfig {
    /// Set the per-step timeout.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Set the pause poll interval.
    pub fn with_pause_poll_interval(mut self, interval: Duration) -> Self {
        self.pause_poll_interval = interval;
        self
    }
}

/// How a task execution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every step completed
    Completed,
    /// The task failed with this error
    Failed(String),
    /// The task was cancelled
    Cancelled,
    /// The task was not pending when execution was requested
    Skipped(TaskStatus),
}

impl RunOutcome {
    fn from_task(task: &Task) -> Self {
        match task.status {
            TaskStatus::Completed => Self::Completed,
            TaskStatus::Failed => Self::Failed(task.error.clone().unwrap_or_default()),
            TaskStatus::Cancelled => Self::Cancelled,
            other => Self::Skipped(other),
        }
    }
}

/// Everything needed to run one step without holding the task lock.
#[derive(Debug, Clone)]
struct StepCall {
    id: StepId,
    name: String,
    agent_id: AgentId,
    action: String,
    parameters: Parameters,
}

enum RoundStart {
    Launch(Vec<StepCall>),
    Paused,
    Waiting,
    Finished(RunOutcome),
}

/// Drives tasks through their steps.
///
/// Each round launches every ready step concurrently, with no bound other
/// than the round itself, and waits for all of them before resolving the
/// next round:
/// ```text
/// Resolve → Mark Running → Execute → Commit → (next round)
/// ```
pub struct ExecutionEngine {
    executor: Arc<dyn AgentExecutor>,
    directory: Arc<dyn AgentDirectory>,
    bus: Arc<NotificationBus>,
    resolver: DependencyResolver,
    config: EngineConfig,
}

impl ExecutionEngine {
    /// Create a new execution engine.
    pub fn new(
        executor: Arc<dyn AgentExecutor>,
        directory: Arc<dyn AgentDirectory>,
        bus: Arc<NotificationBus>,
    ) -> Self {
        Self {
            executor,
            directory,
            bus,
            resolver: DependencyResolver::default(),
            config: EngineConfig::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a pending task to a terminal state.
    ///
    /// Stops early when `cancel` fires; agent calls still in flight are
    /// dropped and their outcomes never recorded.
    pub async fn run(&self, task: SharedTask, cancel: CancellationToken) -> RunOutcome {
        let task_id = {
            let mut guard = task.lock().await;
            if guard.start(chrono::Utc::now()).is_err() {
                debug!("Task {} is {}; not starting", guard.id, guard.status);
                return RunOutcome::from_task(&guard);
            }
            self.publish(&guard);
            guard.id
        };

        info!("Starting task {}", task_id);
        let mut round = 0usize;

        loop {
            let start = {
                let mut guard = task.lock().await;
                match guard.status {
                    TaskStatus::Running => self.begin_round(&mut guard),
                    TaskStatus::Paused => RoundStart::Paused,
                    _ => RoundStart::Finished(RunOutcome::from_task(&guard)),
                }
            };

            let calls = match start {
                RoundStart::Launch(calls) => calls,
                RoundStart::Finished(outcome) => return outcome,
                RoundStart::Paused | RoundStart::Waiting => {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("Task {} cancelled while waiting", task_id);
                            return RunOutcome::Cancelled;
                        }
                        _ = tokio::time::sleep(self.config.pause_poll_interval) => continue,
                    }
                }
            };

            round += 1;
            debug!("Task {} round {}: launching {} steps", task_id, round, calls.len());

            if let Some(outcome) = self.run_round(&task, calls, &cancel).await {
                return outcome;
            }
        }
    }

    /// Resolve the next round and mark its steps running. Called under the task lock.
    fn begin_round(&self, task: &mut Task) -> RoundStart {
        let now = chrono::Utc::now();

        match self.resolver.resolve(&task.steps) {
            Resolution::Done => {
                if let Err(e) = task.complete(now) {
                    warn!("Task {} could not complete: {}", task.id, e);
                }
                info!(
                    "Task {} completed in {}s",
                    task.id,
                    task.actual_duration.unwrap_or_default()
                );
                self.publish(task);
                RoundStart::Finished(RunOutcome::from_task(task))
            }
            Resolution::Stalled(pending) => {
                let err = Error::DeadlockOrMissingStep { pending };
                error!("Task {} failed: {}", task.id, err);
                let _ = task.fail(err.to_string(), now);
                self.publish(task);
                RoundStart::Finished(RunOutcome::from_task(task))
            }
            Resolution::Waiting => RoundStart::Waiting,
            Resolution::Ready(ids) => {
                let mut calls = Vec::with_capacity(ids.len());
                for id in ids {
                    let Some(step) = task.step_mut(&id) else { continue };
                    if let Err(e) = step.start(now) {
                        warn!("Step {} not started: {}", id, e);
                        continue;
                    }
                    calls.push(StepCall {
                        id,
                        name: step.name.clone(),
                        agent_id: step.agent_id.clone(),
                        action: step.action.clone(),
                        parameters: step.parameters.clone(),
                    });
                }
                self.publish(task);
                RoundStart::Launch(calls)
            }
        }
    }

    /// Execute one round. Returns the final outcome if the task ended.
    async fn run_round(
        &self,
        task: &SharedTask,
        calls: Vec<StepCall>,
        cancel: &CancellationToken,
    ) -> Option<RunOutcome> {
        let mut in_flight: FuturesUnordered<_> =
            calls.into_iter().map(|call| self.execute_step(call)).collect();
        let mut failed = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Some(RunOutcome::Cancelled),
                next = in_flight.next() => next,
            };
            let Some((call, outcome)) = next else { break };

            let mut guard = task.lock().await;
            if guard.status == TaskStatus::Cancelled {
                debug!("Task {} cancelled; ignoring step {}", guard.id, call.id);
                return Some(RunOutcome::Cancelled);
            }

            let now = chrono::Utc::now();
            let already_terminal = guard.is_terminal();
            let Some(step) = guard.step_mut(&call.id) else { continue };
            let committed = match outcome {
                Ok(value) => step.complete(value, now),
                Err(cause) => {
                    let committed = step.fail(cause.clone(), now);
                    if !guard.is_terminal() {
                        let err = Error::StepExecutionFailed {
                            step: call.name.clone(),
                            cause,
                        };
                        error!("Task {} failed: {}", guard.id, err);
                        let _ = guard.fail(err.to_string(), now);
                    }
                    failed = true;
                    committed
                }
            };
            if let Err(e) = committed {
                warn!("Step {} outcome not recorded: {}", call.id, e);
            }

            // Late siblings of a failed round are recorded, not announced.
            if already_terminal {
                continue;
            }
            guard.recompute_progress();
            self.publish(&guard);
        }

        if failed {
            let guard = task.lock().await;
            return Some(RunOutcome::from_task(&guard));
        }
        None
    }

    /// Look up the step's agent and run its action.
    async fn execute_step(&self, call: StepCall) -> (StepCall, Result<Value, String>) {
        let Some(agent) = self.directory.find(&call.agent_id) else {
            let err = Error::AgentNotFound(call.agent_id.to_string());
            return (call, Err(err.to_string()));
        };

        debug!("Executing step {} ({}) on agent {}", call.id, call.action, agent.id);
        let agent_call = self.executor.execute(&agent, &call.action, &call.parameters);
        let execution = AssertUnwindSafe(agent_call)
            .catch_unwind()
            .map(|caught| match caught {
                Ok(result) => result.map_err(|e| format!("{e:#}")),
                Err(payload) => {
                    let err = Error::AgentPanicked(panic_message(payload.as_ref()));
                    error!("Step {} on agent {}: {}", call.id, agent.id, err);
                    Err(err.to_string())
                }
            });

        let outcome = match self.config.step_timeout {
            Some(limit) => tokio::time::timeout(limit, execution)
                .await
                .unwrap_or_else(|_| Err(Error::StepTimeout { after: limit }.to_string())),
            None => execution.await,
        };

        (call, outcome)
    }

    fn publish(&self, task: &Task) {
        self.bus.publish(task.id, TaskSnapshot::from(task));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
