//! Task update notifications.
//!
//! Snapshots are published into a single FIFO channel while the publisher
//! still holds the task's lock, and a dispatcher task delivers them to
//! observers. Per-task order therefore matches mutation order, and a slow or
//! failing observer never blocks a round.

use std::collections::HashMap;
use std::sync::Arc;

use agentflow_core::{TaskId, TaskSnapshot};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error};

/// Receives a snapshot on every task state change.
#[async_trait]
pub trait TaskObserver: Send + Sync {
    /// Handle one update. Errors are logged and otherwise ignored.
    async fn on_task_update(&self, snapshot: &TaskSnapshot) -> anyhow::Result<()>;
}

/// Shared handle to an observer. Unsubscribing matches on this handle.
pub type ObserverRef = Arc<dyn TaskObserver>;

/// Observer backed by a closure.
pub struct FnObserver<F> {
    f: F,
}

impl<F> FnObserver<F>
where
    F: Fn(&TaskSnapshot) -> anyhow::Result<()> + Send + Sync + 'static,
{
    /// Wrap a closure as a shareable observer.
    pub fn new(f: F) -> ObserverRef {
        Arc::new(Self { f })
    }
}

#[async_trait]
impl<F> TaskObserver for FnObserver<F>
where
    F: Fn(&TaskSnapshot) -> anyhow::Result<()> + Send + Sync,
{
    async fn on_task_update(&self, snapshot: &TaskSnapshot) -> anyhow::Result<()> {
        (self.f)(snapshot)
    }
}

/// Observer that forwards snapshots into an unbounded channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<TaskSnapshot>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel.
    pub fn new() -> (ObserverRef, mpsc::UnboundedReceiver<TaskSnapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl TaskObserver for ChannelObserver {
    async fn on_task_update(&self, snapshot: &TaskSnapshot) -> anyhow::Result<()> {
        self.tx
            .send(snapshot.clone())
            .map_err(|_| anyhow::anyhow!("snapshot receiver dropped"))
    }
}

fn same_observer(a: &ObserverRef, b: &ObserverRef) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

#[derive(Default)]
struct Observers {
    per_task: HashMap<TaskId, Vec<ObserverRef>>,
    global: Vec<ObserverRef>,
}

enum Envelope {
    Update(TaskId, TaskSnapshot),
    Flush(oneshot::Sender<()>),
}

/// Fans task snapshots out to per-task and global observers.
pub struct NotificationBus {
    observers: Arc<RwLock<Observers>>,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl NotificationBus {
    /// Create a bus and spawn its dispatcher.
    ///
    /// Must be called from within a Tokio runtime. The dispatcher exits when
    /// the bus is dropped.
    pub fn new() -> Self {
        let observers = Arc::new(RwLock::new(Observers::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(observers.clone(), rx));
        Self { observers, tx }
    }

    /// Observe one task.
    pub async fn subscribe_to_task(&self, task_id: TaskId, observer: ObserverRef) {
        self.observers
            .write()
            .await
            .per_task
            .entry(task_id)
            .or_default()
            .push(observer);
    }

    /// Observe every task.
    pub async fn subscribe_to_all(&self, observer: ObserverRef) {
        self.observers.write().await.global.push(observer);
    }

    /// Stop observing one task. Unknown observers are ignored.
    pub async fn unsubscribe_from_task(&self, task_id: TaskId, observer: &ObserverRef) {
        let mut observers = self.observers.write().await;
        if let Some(list) = observers.per_task.get_mut(&task_id) {
            if let Some(pos) = list.iter().position(|o| same_observer(o, observer)) {
                list.remove(pos);
            }
            if list.is_empty() {
                observers.per_task.remove(&task_id);
            }
        }
    }

    /// Stop observing every task. Unknown observers are ignored.
    pub async fn unsubscribe_from_all(&self, observer: &ObserverRef) {
        let mut observers = self.observers.write().await;
        if let Some(pos) = observers.global.iter().position(|o| same_observer(o, observer)) {
            observers.global.remove(pos);
        }
    }

    /// Number of observers that would receive an update for `task_id`.
    pub async fn observer_count(&self, task_id: TaskId) -> usize {
        let observers = self.observers.read().await;
        observers.per_task.get(&task_id).map_or(0, Vec::len) + observers.global.len()
    }

    /// Queue `snapshot` for delivery. Never blocks.
    pub fn publish(&self, task_id: TaskId, snapshot: TaskSnapshot) {
        if self.tx.send(Envelope::Update(task_id, snapshot)).is_err() {
            error!("Notification dispatcher stopped; dropping update for {}", task_id);
        }
    }

    /// Wait until everything published so far has been delivered.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Envelope::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

async fn dispatch(observers: Arc<RwLock<Observers>>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Update(task_id, snapshot) => {
                let (per_task, global) = {
                    let observers = observers.read().await;
                    (
                        observers.per_task.get(&task_id).cloned().unwrap_or_default(),
                        observers.global.clone(),
                    )
                };
                deliver(task_id, &snapshot, &per_task, &global).await;
            }
            Envelope::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Notification dispatcher stopped");
}

async fn deliver(task_id: TaskId, snapshot: &TaskSnapshot, per_task: &[ObserverRef], global: &[ObserverRef]) {
    debug!(
        "Notifying {} observers of task {} ({})",
        per_task.len() + global.len(),
        task_id,
        snapshot.status
    );

    for observer in per_task {
        if let Err(e) = observer.on_task_update(snapshot).await {
            error!("Error notifying task subscriber for {}: {}", task_id, e);
        }
    }

    for observer in global {
        if let Err(e) = observer.on_task_update(snapshot).await {
            error!("Error notifying global subscriber for {}: {}", task_id, e);
        }
    }
}
