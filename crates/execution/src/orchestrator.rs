//! Orchestrator - the public face of task execution.
//!
//! Owns the template registry, the task table, the admission queue and the
//! notification bus. A driver loop started with [`Orchestrator::start`]
//! admits queued tasks and hands each one to the [`ExecutionEngine`] on its
//! own Tokio task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agentflow_core::{
    AgentDescriptor, AgentDirectory, AgentExecutor, Error, Parameters, Result, Step, StepSpec,
    Task, TaskId, TaskPriority, TaskSnapshot, TaskStatus, TaskStatusSnapshot, TaskSummary, UserId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::engine::{ExecutionEngine, SharedTask};
use crate::notify::{NotificationBus, ObserverRef};
use crate::scheduler::{RunningTask, TaskQueue};
use crate::template::{build_steps, TaskTemplate, TemplateRegistry};

type TaskTable = Arc<RwLock<HashMap<TaskId, SharedTask>>>;

/// Queue occupancy as reported by [`Orchestrator::get_queue_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Tasks waiting for admission
    pub pending: usize,
    /// Tasks executing
    pub running: usize,
    /// Admission limit
    pub max_concurrent: usize,
    /// Whether the driver loop is active
    pub engine_running: bool,
}

struct Driver {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Creates, tracks and runs tasks.
pub struct Orchestrator {
    templates: Arc<TemplateRegistry>,
    directory: Arc<dyn AgentDirectory>,
    executor: Arc<dyn AgentExecutor>,
    engine: Arc<ExecutionEngine>,
    tasks: TaskTable,
    queue: Arc<Mutex<TaskQueue>>,
    bus: Arc<NotificationBus>,
    config: OrchestratorConfig,
    driver: Mutex<Option<Driver>>,
}

impl Orchestrator {
    /// Create an orchestrator with the built-in templates and default config.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(executor: Arc<dyn AgentExecutor>, directory: Arc<dyn AgentDirectory>) -> Self {
        let config = OrchestratorConfig::default();
        let bus = Arc::new(NotificationBus::new());
        let engine = ExecutionEngine::new(executor.clone(), directory.clone(), bus.clone())
            .with_config(config.engine.clone());

        Self {
            templates: Arc::new(TemplateRegistry::with_builtin()),
            directory,
            executor,
            engine: Arc::new(engine),
            tasks: Arc::new(RwLock::new(HashMap::new())),
            queue: Arc::new(Mutex::new(TaskQueue::new(config.budget))),
            bus,
            config,
            driver: Mutex::new(None),
        }
    }

    /// Replace the template registry.
    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = Arc::new(templates);
        self
    }

    /// Set the configuration. Call before creating tasks.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        let engine = ExecutionEngine::new(self.executor.clone(), self.directory.clone(), self.bus.clone())
            .with_config(config.engine.clone());
        self.engine = Arc::new(engine);
        self.queue = Arc::new(Mutex::new(TaskQueue::new(config.budget)));
        self.config = config;
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // === Creation ===

    /// Create a task from a registered template.
    ///
    /// Every step receives a copy of `parameters`, which are also stored as
    /// the task's metadata.
    pub async fn create_task_from_template(
        &self,
        user_id: UserId,
        template_name: &str,
        parameters: Parameters,
    ) -> Result<TaskId> {
        let template = self
            .templates
            .get(template_name)
            .ok_or_else(|| Error::UnknownTemplate(template_name.to_string()))?;

        let task_id = TaskId::new();
        let steps = self.templates.instantiate(template_name, task_id, &parameters)?;
        self.validate_steps(&steps)?;

        let task = Task::new(
            task_id,
            user_id,
            template.name.clone(),
            template.description.clone(),
            template.key.clone(),
            steps,
        )
        .with_metadata(parameters);

        self.submit(task).await
    }

    /// Create a task from caller-supplied steps.
    pub async fn create_custom_task(
        &self,
        user_id: UserId,
        title: impl Into<String>,
        description: impl Into<String>,
        task_type: impl Into<String>,
        steps: Vec<StepSpec>,
        priority: TaskPriority,
    ) -> Result<TaskId> {
        let task_id = TaskId::new();
        let steps = build_steps(task_id, steps);
        self.validate_steps(&steps)?;

        let task = Task::new(task_id, user_id, title, description, task_type, steps)
            .with_priority(priority);

        self.submit(task).await
    }

    fn validate_steps(&self, steps: &[Step]) -> Result<()> {
        for step in steps {
            if self.directory.find(&step.agent_id).is_none() {
                return Err(Error::AgentNotFound(step.agent_id.to_string()));
            }
            if !self.executor.supports(&step.action) {
                return Err(Error::UnsupportedAction {
                    agent: step.agent_id.to_string(),
                    action: step.action.clone(),
                });
            }
        }
        Ok(())
    }

    async fn submit(&self, task: Task) -> Result<TaskId> {
        let task_id = task.id;
        info!(
            "Created task {} ({}, {} steps) for {}",
            task_id,
            task.task_type,
            task.steps.len(),
            task.user_id
        );

        let snapshot = TaskSnapshot::from(&task);
        self.tasks
            .write()
            .await
            .insert(task_id, Arc::new(Mutex::new(task)));
        self.bus.publish(task_id, snapshot);
        self.queue.lock().await.enqueue(task_id);

        Ok(task_id)
    }

    // === Queries ===

    async fn shared(&self, task_id: TaskId) -> Option<SharedTask> {
        self.tasks.read().await.get(&task_id).cloned()
    }

    /// A copy of the task.
    pub async fn get_task(&self, task_id: TaskId) -> Option<Task> {
        let task = self.shared(task_id).await?;
        let task = task.lock().await;
        Some(task.clone())
    }

    /// Copies of a user's tasks, newest first.
    pub async fn get_user_tasks(&self, user_id: &UserId) -> Vec<Task> {
        let shared: Vec<SharedTask> = self.tasks.read().await.values().cloned().collect();

        let mut tasks = Vec::new();
        for task in shared {
            let task = task.lock().await;
            if &task.user_id == user_id {
                tasks.push(task.clone());
            }
        }
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// List rows for a user's tasks, newest first.
    pub async fn get_user_task_summaries(&self, user_id: &UserId) -> Vec<TaskSummary> {
        self.get_user_tasks(user_id)
            .await
            .iter()
            .map(TaskSummary::from)
            .collect()
    }

    /// Compact status of a task.
    pub async fn get_task_status(&self, task_id: TaskId) -> Option<TaskStatusSnapshot> {
        let task = self.shared(task_id).await?;
        let task = task.lock().await;
        Some(TaskStatusSnapshot::from(&*task))
    }

    /// Registered templates, sorted by key.
    pub fn get_task_templates(&self) -> Vec<TaskTemplate> {
        self.templates.templates()
    }

    /// The template registry.
    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// Agents known to the directory.
    pub fn list_agents(&self) -> Vec<AgentDescriptor> {
        self.directory.list_agents()
    }

    /// Queue occupancy.
    pub async fn get_queue_status(&self) -> QueueStatus {
        let engine_running = self.driver.lock().await.is_some();
        let queue = self.queue.lock().await;
        QueueStatus {
            pending: queue.pending_count(),
            running: queue.running_count(),
            max_concurrent: queue.budget().max_concurrent_tasks.get(),
            engine_running,
        }
    }

    /// Poll until the task is terminal or `timeout` elapses.
    ///
    /// Returns the final status, or None on timeout or unknown task.
    pub async fn wait_for_completion(
        &self,
        task_id: TaskId,
        timeout: Duration,
    ) -> Option<TaskStatusSnapshot> {
        let task = self.shared(task_id).await?;
        let start = Instant::now();
        let sleep_duration = Duration::from_millis(20);

        while start.elapsed() < timeout {
            {
                let task = task.lock().await;
                if task.is_terminal() {
                    return Some(TaskStatusSnapshot::from(&*task));
                }
            }
            tokio::time::sleep(sleep_duration).await;
        }

        None
    }

    // === Control ===

    /// Cancel a task that has not finished.
    ///
    /// Returns false if the task is unknown or already terminal.
    pub async fn cancel_task(&self, task_id: TaskId) -> bool {
        let Some(task) = self.shared(task_id).await else {
            return false;
        };

        {
            let mut task = task.lock().await;
            if let Err(e) = task.cancel(chrono::Utc::now()) {
                warn!("Cannot cancel task {}: {}", task_id, e);
                return false;
            }
            self.bus.publish(task_id, TaskSnapshot::from(&*task));
        }

        let mut queue = self.queue.lock().await;
        if !queue.remove(&task_id) {
            queue.cancel_running(&task_id);
        }
        info!("Cancelled task {}", task_id);
        true
    }

    /// Pause a running task. The current round finishes; no new round starts.
    pub async fn pause_task(&self, task_id: TaskId) -> bool {
        self.transition(task_id, "pause", Task::pause).await
    }

    /// Resume a paused task.
    pub async fn resume_task(&self, task_id: TaskId) -> bool {
        self.transition(task_id, "resume", Task::resume).await
    }

    async fn transition(
        &self,
        task_id: TaskId,
        verb: &str,
        apply: fn(&mut Task) -> Result<()>,
    ) -> bool {
        let Some(task) = self.shared(task_id).await else {
            return false;
        };

        let mut task = task.lock().await;
        match apply(&mut *task) {
            Ok(()) => {
                info!("Task {} {}d", task_id, verb);
                self.bus.publish(task_id, TaskSnapshot::from(&*task));
                true
            }
            Err(e) => {
                warn!("Cannot {} task {}: {}", verb, task_id, e);
                false
            }
        }
    }

    // === Subscriptions ===

    /// Observe one task.
    pub async fn subscribe_to_task(&self, task_id: TaskId, observer: ObserverRef) {
        self.bus.subscribe_to_task(task_id, observer).await;
    }

    /// Observe every task.
    pub async fn subscribe_to_all(&self, observer: ObserverRef) {
        self.bus.subscribe_to_all(observer).await;
    }

    /// Stop observing one task.
    pub async fn unsubscribe_from_task(&self, task_id: TaskId, observer: &ObserverRef) {
        self.bus.unsubscribe_from_task(task_id, observer).await;
    }

    /// Stop observing every task.
    pub async fn unsubscribe_from_all(&self, observer: &ObserverRef) {
        self.bus.unsubscribe_from_all(observer).await;
    }

    /// Wait until every update published so far reached its observers.
    pub async fn flush_notifications(&self) {
        self.bus.flush().await;
    }

    // === Lifecycle ===

    /// Start the driver loop. Does nothing if already started.
    pub async fn start(&self) {
        let mut driver = self.driver.lock().await;
        if driver.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(drive(
            self.tasks.clone(),
            self.queue.clone(),
            self.engine.clone(),
            self.config.budget.poll_interval,
            cancel.clone(),
        ));
        *driver = Some(Driver { cancel, handle });

        info!(
            "Orchestrator started (max {} concurrent tasks)",
            self.config.budget.max_concurrent_tasks
        );
    }

    /// Stop the driver loop. Tasks already executing run to completion.
    pub async fn stop(&self) {
        let Some(driver) = self.driver.lock().await.take() else {
            return;
        };

        driver.cancel.cancel();
        if tokio::time::timeout(self.config.shutdown_timeout, driver.handle)
            .await
            .is_err()
        {
            warn!(
                "Driver loop did not stop within {:?}",
                self.config.shutdown_timeout
            );
        }
        info!("Orchestrator stopped");
    }
}

/// Reap, admit, sleep; until cancelled.
async fn drive(
    tasks: TaskTable,
    queue: Arc<Mutex<TaskQueue>>,
    engine: Arc<ExecutionEngine>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        admit(&tasks, &queue, &engine).await;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
    debug!("Driver loop exited");
}

async fn admit(tasks: &TaskTable, queue: &Mutex<TaskQueue>, engine: &Arc<ExecutionEngine>) {
    let mut queue = queue.lock().await;

    for task_id in queue.reap_finished() {
        debug!("Task {} execution finished", task_id);
    }

    while let Some(task_id) = queue.next_pending() {
        let Some(task) = tasks.read().await.get(&task_id).cloned() else {
            continue;
        };
        if task.lock().await.status != TaskStatus::Pending {
            debug!("Skipping task {}: no longer pending", task_id);
            continue;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let engine = engine.clone();
            let cancel = cancel.clone();
            async move {
                let outcome = engine.run(task, cancel).await;
                debug!("Task {} finished: {:?}", task_id, outcome);
            }
        });
        queue.task_started(task_id, RunningTask::new(handle, cancel));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::notify::ChannelObserver;
    use crate::scheduler::Budget;
    use agentflow_core::{StaticAgentDirectory, StepStatus};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{mpsc, Semaphore};

    /// Each call blocks until the test releases a permit.
    struct GatedExecutor {
        gate: Arc<Semaphore>,
        started: AtomicUsize,
    }

    impl GatedExecutor {
        fn open() -> Self {
            Self::with_permits(Semaphore::MAX_PERMITS)
        }

        fn with_permits(permits: usize) -> Self {
            Self {
                gate: Arc::new(Semaphore::new(permits)),
                started: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AgentExecutor for GatedExecutor {
        async fn execute(
            &self,
            _agent: &AgentDescriptor,
            action: &str,
            _parameters: &Parameters,
        ) -> std::result::Result<Value, anyhow::Error> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.gate.acquire().await?.forget();
            Ok(json!({ "action": action }))
        }

        fn supports(&self, action: &str) -> bool {
            action != "forbidden"
        }
    }

    /// Panics on every call.
    struct PanickingExecutor;

    #[async_trait]
    impl AgentExecutor for PanickingExecutor {
        async fn execute(
            &self,
            _agent: &AgentDescriptor,
            action: &str,
            _parameters: &Parameters,
        ) -> std::result::Result<Value, anyhow::Error> {
            panic!("{action} crashed");
        }
    }

    fn create_test_orchestrator(executor: Arc<dyn AgentExecutor>, max: usize) -> Orchestrator {
        let config = OrchestratorConfig::default()
            .with_budget(
                Budget::new()
                    .with_max_concurrent(NonZeroUsize::new(max).unwrap())
                    .with_poll_interval(Duration::from_millis(10)),
            )
            .with_engine(EngineConfig::default().with_pause_poll_interval(Duration::from_millis(5)));
        Orchestrator::new(executor, Arc::new(StaticAgentDirectory::with_defaults())).with_config(config)
    }

    fn topic() -> Parameters {
        let mut params = Parameters::new();
        params.insert("topic".to_string(), json!("X"));
        params
    }

    async fn eventually<F, Fut>(check: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn drain(orch: &Orchestrator, rx: &mut mpsc::UnboundedReceiver<TaskSnapshot>) -> Vec<TaskSnapshot> {
        orch.flush_notifications().await;
        let mut out = Vec::new();
        while let Ok(s) = rx.try_recv() {
            out.push(s);
        }
        out
    }

    #[tokio::test]
    async fn test_content_creation_runs_to_completion() {
        let orch = create_test_orchestrator(Arc::new(GatedExecutor::open()), 5);
        let (observer, mut rx) = ChannelObserver::new();
        orch.subscribe_to_all(observer).await;

        let id = orch
            .create_task_from_template(UserId::new("u1"), "content_creation", topic())
            .await
            .unwrap();

        let task = orch.get_task(id).await.unwrap();
        assert_eq!(task.steps.len(), 3);
        assert_eq!(task.title, "Content Creation");
        assert_eq!(task.metadata.get("topic"), Some(&json!("X")));

        orch.start().await;
        let status = orch.wait_for_completion(id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.status, "completed");
        assert_eq!(status.steps_completed, 3);

        let updates = drain(&orch, &mut rx).await;
        assert_eq!(updates.first().unwrap().status, "pending");
        assert_eq!(updates.last().unwrap().status, "completed");

        let after_first = updates
            .iter()
            .find(|s| s.steps[0].status == "completed")
            .unwrap();
        assert!((after_first.progress - 1.0 / 3.0).abs() < 1e-6);

        let mut seen = Vec::new();
        for s in &updates {
            if seen.last() != Some(&s.status) {
                seen.push(s.status.clone());
            }
        }
        assert_eq!(seen, vec!["pending", "running", "completed"]);

        orch.stop().await;
    }

    #[tokio::test]
    async fn test_missing_dependency_fails_task() {
        let orch = create_test_orchestrator(Arc::new(GatedExecutor::open()), 5);
        orch.start().await;

        let id = orch
            .create_custom_task(
                UserId::new("u1"),
                "Broken",
                "",
                "custom",
                vec![
                    StepSpec::new("A", "executor", "a"),
                    StepSpec::new("B", "executor", "b").depends_on("nonexistent"),
                ],
                TaskPriority::Normal,
            )
            .await
            .unwrap();

        let status = orch.wait_for_completion(id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.status, "failed");
        assert!(status
            .error
            .unwrap()
            .starts_with("Circular dependencies or missing steps detected"));
    }

    #[tokio::test]
    async fn test_independent_steps_start_together() {
        let executor = Arc::new(GatedExecutor::with_permits(0));
        let orch = create_test_orchestrator(executor.clone(), 5);
        orch.start().await;

        let id = orch
            .create_custom_task(
                UserId::new("u1"),
                "Fan out",
                "",
                "custom",
                vec![
                    StepSpec::new("A", "web", "fetch"),
                    StepSpec::new("B", "web", "fetch"),
                    StepSpec::new("C", "web", "fetch"),
                ],
                TaskPriority::High,
            )
            .await
            .unwrap();

        let started = &executor.started;
        eventually(|| async move { started.load(Ordering::SeqCst) == 3 }).await;
        let task = orch.get_task(id).await.unwrap();
        assert!(task.steps.iter().all(|s| s.status == StepStatus::Running));
        assert_eq!(task.priority, TaskPriority::High);

        executor.gate.add_permits(3);
        let status = orch.wait_for_completion(id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.status, "completed");
    }

    #[tokio::test]
    async fn test_cancel_pending_task() {
        let orch = create_test_orchestrator(Arc::new(GatedExecutor::open()), 5);
        let a = orch
            .create_task_from_template(UserId::new("u1"), "content_creation", topic())
            .await
            .unwrap();
        let b = orch
            .create_task_from_template(UserId::new("u1"), "data_analysis", Parameters::new())
            .await
            .unwrap();

        let (observer, mut rx) = ChannelObserver::new();
        orch.subscribe_to_task(a, observer).await;

        assert_eq!(orch.get_queue_status().await.pending, 2);
        assert!(orch.cancel_task(a).await);
        assert_eq!(orch.get_queue_status().await.pending, 1);
        assert!(!orch.cancel_task(a).await);

        let updates = drain(&orch, &mut rx).await;
        assert_eq!(updates.iter().filter(|s| s.status == "cancelled").count(), 1);
        assert_eq!(updates.last().unwrap().status, "cancelled");

        orch.start().await;
        orch.wait_for_completion(b, Duration::from_secs(5)).await.unwrap();
        assert_eq!(orch.get_task(a).await.unwrap().status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_running_task() {
        let executor = Arc::new(GatedExecutor::with_permits(0));
        let orch = create_test_orchestrator(executor.clone(), 5);
        orch.start().await;

        let id = orch
            .create_task_from_template(UserId::new("u1"), "content_creation", topic())
            .await
            .unwrap();
        let started = &executor.started;
        eventually(|| async move { started.load(Ordering::SeqCst) == 1 }).await;

        let (observer, mut rx) = ChannelObserver::new();
        orch.subscribe_to_task(id, observer).await;

        assert!(orch.cancel_task(id).await);
        assert_eq!(orch.get_queue_status().await.running, 0);

        executor.gate.add_permits(10);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let task = orch.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.steps[0].status, StepStatus::Running);
        assert_eq!(executor.started.load(Ordering::SeqCst), 1);

        let updates = drain(&orch, &mut rx).await;
        assert_eq!(updates.iter().filter(|s| s.status == "cancelled").count(), 1);
        assert_eq!(updates.last().unwrap().status, "cancelled");
    }

    #[tokio::test]
    async fn test_pause_blocks_next_round() {
        let executor = Arc::new(GatedExecutor::with_permits(0));
        let orch = create_test_orchestrator(executor.clone(), 5);
        orch.start().await;

        let id = orch
            .create_task_from_template(UserId::new("u1"), "content_creation", topic())
            .await
            .unwrap();
        let started = &executor.started;
        eventually(|| async move { started.load(Ordering::SeqCst) == 1 }).await;

        assert!(orch.pause_task(id).await);
        assert!(!orch.pause_task(id).await);
        executor.gate.add_permits(10);

        let orch_ref = &orch;
        eventually(|| async move {
            orch_ref.get_task(id).await.unwrap().steps[0].status == StepStatus::Completed
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let task = orch.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Paused);
        assert_eq!(task.steps[1].status, StepStatus::Pending);
        assert_eq!(executor.started.load(Ordering::SeqCst), 1);

        assert!(orch.resume_task(id).await);
        let status = orch.wait_for_completion(id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.status, "completed");
    }

    #[tokio::test]
    async fn test_admission_respects_budget() {
        let executor = Arc::new(GatedExecutor::with_permits(0));
        let orch = create_test_orchestrator(executor.clone(), 2);

        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(
                orch.create_custom_task(
                    UserId::new("u1"),
                    format!("Job {i}"),
                    "",
                    "custom",
                    vec![StepSpec::new("Work", "executor", "work")],
                    TaskPriority::Normal,
                )
                .await
                .unwrap(),
            );
        }
        orch.start().await;

        let started = &executor.started;
        eventually(|| async move { started.load(Ordering::SeqCst) == 2 }).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let status = orch.get_queue_status().await;
        assert_eq!(status.running, 2);
        assert_eq!(status.pending, 1);
        assert_eq!(status.max_concurrent, 2);
        assert_eq!(orch.get_task(ids[2]).await.unwrap().status, TaskStatus::Pending);
        assert_eq!(executor.started.load(Ordering::SeqCst), 2);

        // One permit lets exactly one of the admitted tasks finish.
        executor.gate.add_permits(1);
        let orch_ref = &orch;
        let admitted = [ids[0], ids[1]];
        eventually(|| async move {
            let mut done = 0;
            for id in admitted {
                if orch_ref.get_task(id).await.unwrap().status == TaskStatus::Completed {
                    done += 1;
                }
            }
            done == 1
        })
        .await;

        // Its slot goes to the third task.
        eventually(|| async move { started.load(Ordering::SeqCst) == 3 }).await;
        assert_eq!(orch.get_task(ids[2]).await.unwrap().status, TaskStatus::Running);
        let status = orch.get_queue_status().await;
        assert_eq!(status.running, 2);
        assert_eq!(status.pending, 0);

        executor.gate.add_permits(100);
        for id in ids {
            let status = orch.wait_for_completion(id, Duration::from_secs(5)).await.unwrap();
            assert_eq!(status.status, "completed");
        }
    }

    #[tokio::test]
    async fn test_panicking_agent_fails_task_and_frees_slot() {
        let orch = create_test_orchestrator(Arc::new(PanickingExecutor), 1);
        let (observer, mut rx) = ChannelObserver::new();
        orch.subscribe_to_all(observer).await;
        orch.start().await;

        let id = orch
            .create_task_from_template(UserId::new("u1"), "content_creation", topic())
            .await
            .unwrap();

        let status = orch.wait_for_completion(id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.status, "failed");

        let task = orch.get_task(id).await.unwrap();
        assert_eq!(task.steps[0].status, StepStatus::Failed);
        assert!(task.error.unwrap().contains("agent panicked"));

        let orch_ref = &orch;
        eventually(|| async move { orch_ref.get_queue_status().await.running == 0 }).await;
        assert_eq!(drain(&orch, &mut rx).await.last().unwrap().status, "failed");
    }

    #[tokio::test]
    async fn test_creation_validation() {
        let orch = create_test_orchestrator(Arc::new(GatedExecutor::open()), 5);
        let user = UserId::new("u1");

        let err = orch
            .create_task_from_template(user.clone(), "no_such_template", Parameters::new())
            .await
            .unwrap_err();
        assert_eq!(err, Error::UnknownTemplate("no_such_template".to_string()));

        let err = orch
            .create_custom_task(
                user.clone(),
                "T",
                "",
                "custom",
                vec![StepSpec::new("A", "wizard", "cast")],
                TaskPriority::Normal,
            )
            .await
            .unwrap_err();
        assert_eq!(err, Error::AgentNotFound("wizard".to_string()));

        let err = orch
            .create_custom_task(
                user.clone(),
                "T",
                "",
                "custom",
                vec![StepSpec::new("A", "code", "forbidden")],
                TaskPriority::Normal,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedAction { .. }));

        assert!(orch.get_user_tasks(&user).await.is_empty());
        assert_eq!(orch.get_queue_status().await.pending, 0);
    }

    #[tokio::test]
    async fn test_user_tasks_newest_first() {
        let orch = create_test_orchestrator(Arc::new(GatedExecutor::open()), 5);
        let (alice, bob) = (UserId::new("alice"), UserId::new("bob"));

        let first = orch
            .create_task_from_template(alice.clone(), "content_creation", Parameters::new())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = orch
            .create_task_from_template(alice.clone(), "web_automation", Parameters::new())
            .await
            .unwrap();
        orch.create_task_from_template(bob, "data_analysis", Parameters::new())
            .await
            .unwrap();

        let ids: Vec<TaskId> = orch.get_user_tasks(&alice).await.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![second, first]);

        let summaries = orch.get_user_task_summaries(&alice).await;
        assert_eq!(summaries[0].steps_count, 4);
        assert_eq!(summaries[1].completed_steps, 0);
    }

    #[tokio::test]
    async fn test_unknown_task_controls() {
        let orch = create_test_orchestrator(Arc::new(GatedExecutor::open()), 5);
        let ghost = TaskId::new();
        assert!(!orch.cancel_task(ghost).await);
        assert!(!orch.pause_task(ghost).await);
        assert!(!orch.resume_task(ghost).await);
        assert!(orch.get_task(ghost).await.is_none());
        assert!(orch.get_task_status(ghost).await.is_none());
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let orch = create_test_orchestrator(Arc::new(GatedExecutor::open()), 5);
        assert!(!orch.get_queue_status().await.engine_running);

        orch.start().await;
        orch.start().await;
        assert!(orch.get_queue_status().await.engine_running);

        orch.stop().await;
        orch.stop().await;
        assert!(!orch.get_queue_status().await.engine_running);

        assert_eq!(orch.get_task_templates().len(), 4);
        assert_eq!(orch.list_agents().len(), 11);
    }
}
