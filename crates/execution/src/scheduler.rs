//! Task admission: a FIFO queue gated by a concurrency budget.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::time::Duration;

use agentflow_core::TaskId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Budget for task execution.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    /// Max tasks executing at once
    pub max_concurrent_tasks: NonZeroUsize,
    /// How often the driver loop reaps and admits
    pub poll_interval: Duration,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: NonZeroUsize::MIN.saturating_add(4),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl Budget {
    /// Create a new budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max concurrent tasks.
    pub fn with_max_concurrent(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    /// Set the driver poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// An admitted task's execution unit.
pub struct RunningTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl RunningTask {
    /// Track a spawned execution and the token that stops it.
    pub fn new(handle: JoinHandle<()>, cancel: CancellationToken) -> Self {
        Self { handle, cancel }
    }
}

/// FIFO queue of pending tasks plus the set of running executions.
///
/// Admission is strictly first-in first-out; task priority is not consulted.
pub struct TaskQueue {
    budget: Budget,
    pending: VecDeque<TaskId>,
    running: HashMap<TaskId, RunningTask>,
}

impl TaskQueue {
    /// Create an empty queue.
    pub fn new(budget: Budget) -> Self {
        Self {
            budget,
            pending: VecDeque::new(),
            running: HashMap::new(),
        }
    }

    /// The configured budget.
    pub fn budget(&self) -> Budget {
        self.budget
    }

    /// Append a task to the back of the queue.
    pub fn enqueue(&mut self, task_id: TaskId) {
        self.pending.push_back(task_id);
    }

    /// Remove a waiting task. Returns false if it was not queued.
    pub fn remove(&mut self, task_id: &TaskId) -> bool {
        match self.pending.iter().position(|id| id == task_id) {
            Some(pos) => {
                self.pending.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Check if we can start a new task.
    pub fn can_start(&self) -> bool {
        self.running.len() < self.budget.max_concurrent_tasks.get()
    }

    /// Pop the next task to admit, if the budget allows.
    pub fn next_pending(&mut self) -> Option<TaskId> {
        if !self.can_start() {
            return None;
        }
        self.pending.pop_front()
    }

    /// Register a task start.
    pub fn task_started(&mut self, task_id: TaskId, running: RunningTask) {
        self.running.insert(task_id, running);
    }

    /// Forget executions that have finished, returning their task IDs.
    pub fn reap_finished(&mut self) -> Vec<TaskId> {
        let finished: Vec<TaskId> = self
            .running
            .iter()
            .filter(|(_, r)| r.handle.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in &finished {
            self.running.remove(id);
        }
        finished
    }

    /// Request cancellation of a running execution and stop tracking it.
    ///
    /// The execution stops at its next cancellation point; in-flight agent
    /// calls are dropped, not interrupted.
    pub fn cancel_running(&mut self, task_id: &TaskId) -> bool {
        match self.running.remove(task_id) {
            Some(running) => {
                running.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether this task has a tracked execution.
    pub fn is_running(&self, task_id: &TaskId) -> bool {
        self.running.contains_key(task_id)
    }

    /// Tasks waiting for admission.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Tracked executions.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(Budget::default())
    }
}
