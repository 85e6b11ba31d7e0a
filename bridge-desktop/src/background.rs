//! Keyed Task Queue Implementation

use async_trait::async_trait;
use bridge_traits::{
    background::{
        EnqueueOutcome, TaskConstraints, TaskKey, TaskQueue, TaskRequest, TaskStatus, TaskStore,
    },
    error::{BridgeError, Result},
    network::{NetworkInfo, NetworkMonitor, NetworkStatus},
};
use futures_util::{future::BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

type TaskHandler = Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type TaskTable = Arc<RwLock<HashMap<TaskKey, TaskEntry>>>;

const DEFAULT_CONSTRAINT_POLL: Duration = Duration::from_secs(5);

/// Tokio-based durable task queue for desktop.
///
/// Each key owns at most one worker. Enqueueing under a live key cancels the
/// running worker, waits for it to stop, then starts the replacement. Pending
/// requests are mirrored into an optional [`TaskStore`] so they can be
/// restored after a restart.
pub struct TokioTaskQueue {
    tasks: TaskTable,
    handlers: Arc<RwLock<HashMap<String, TaskHandler>>>,
    enqueue_lock: Mutex<()>,
    next_generation: AtomicU64,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    store: Option<Arc<dyn TaskStore>>,
    constraint_poll: Duration,
}

struct TaskEntry {
    generation: u64,
    status: TaskStatus,
    handle: Option<JoinHandle<()>>,
    cancel: Option<oneshot::Sender<()>>,
}

struct Worker {
    tasks: TaskTable,
    key: TaskKey,
    generation: u64,
    handler: TaskHandler,
    request: TaskRequest,
    monitor: Option<Arc<dyn NetworkMonitor>>,
    store: Option<Arc<dyn TaskStore>>,
    constraint_poll: Duration,
}

impl TokioTaskQueue {
    /// Create a queue without persistence or network monitoring.
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            enqueue_lock: Mutex::new(()),
            next_generation: AtomicU64::new(1),
            network_monitor: None,
            store: None,
            constraint_poll: DEFAULT_CONSTRAINT_POLL,
        }
    }

    pub fn with_network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// How often unmet constraints are re-checked.
    pub fn with_constraint_poll(mut self, interval: Duration) -> Self {
        self.constraint_poll = interval;
        self
    }

    /// Register the handler invoked for requests of the given kind.
    pub async fn register_handler<F, Fut>(&self, kind: &str, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let mut handlers = self.handlers.write().await;
        handlers.insert(
            kind.to_string(),
            Arc::new(move |payload| handler(payload).boxed()),
        );
    }

    /// Re-enqueue every request left in the store by a previous process.
    ///
    /// Handlers must be registered before calling this.
    pub async fn restore(&self) -> Result<usize> {
        let Some(store) = self.store.clone() else {
            return Ok(0);
        };

        let requests = store.load_all().await?;
        let mut restored = 0;
        for request in requests {
            let key = request.key.clone();
            match self.enqueue(request).await {
                Ok(_) => restored += 1,
                Err(err) => warn!(task_key = %key, error = %err, "Failed to restore task"),
            }
        }

        info!(restored, "Restored pending tasks");
        Ok(restored)
    }

    /// Stop every worker. Stored requests are kept for the next `restore`.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.write().await;
            tasks
                .values_mut()
                .filter_map(|entry| {
                    if let Some(cancel) = entry.cancel.take() {
                        let _ = cancel.send(());
                    }
                    entry.handle.take()
                })
                .collect()
        };

        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
        debug!("Task queue shut down");
    }

    async fn handler_for(&self, kind: &str) -> Option<TaskHandler> {
        let handlers = self.handlers.read().await;
        handlers.get(kind).cloned()
    }

    /// Stop the live worker for `key`, if any, and wait for it to exit.
    async fn stop_worker(&self, key: &TaskKey) -> bool {
        let (cancel, handle) = {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(key) {
                Some(entry) if !entry.status.is_terminal() => {
                    (entry.cancel.take(), entry.handle.take())
                }
                _ => return false,
            }
        };

        if let Some(cancel) = cancel {
            let _ = cancel.send(());
        }
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        true
    }

    async fn constraints_satisfied(
        monitor: Option<&Arc<dyn NetworkMonitor>>,
        constraints: &TaskConstraints,
    ) -> bool {
        if !(constraints.requires_network || constraints.requires_unmetered) {
            return true;
        }

        let Some(monitor) = monitor else {
            return true;
        };

        match monitor.get_network_info().await {
            Ok(NetworkInfo {
                status: NetworkStatus::Connected,
                is_metered,
                ..
            }) => !(constraints.requires_unmetered && is_metered),
            Ok(_) => false,
            Err(err) => {
                warn!(error = %err, "Network monitor error");
                false
            }
        }
    }
}

impl Default for TokioTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Worker {
    async fn set_status(&self, status: TaskStatus) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&self.key) {
            Some(entry) if entry.generation == self.generation => {
                entry.status = status;
                true
            }
            _ => false,
        }
    }

    async fn finish(&self, status: TaskStatus) {
        let current = {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(&self.key) {
                Some(entry) if entry.generation == self.generation => {
                    entry.status = status;
                    entry.handle = None;
                    entry.cancel = None;
                    true
                }
                _ => false,
            }
        };

        if current {
            if let Some(store) = &self.store {
                if let Err(err) = store.remove(&self.key).await {
                    warn!(task_key = %self.key, error = %err, "Failed to remove finished task");
                }
            }
        }
    }

    async fn run(self, mut cancel_rx: oneshot::Receiver<()>) {
        let policy = self.request.retry.clone();
        let mut attempt = 0u32;

        loop {
            while !TokioTaskQueue::constraints_satisfied(
                self.monitor.as_ref(),
                &self.request.constraints,
            )
            .await
            {
                debug!(task_key = %self.key, "Constraints not satisfied; waiting");
                tokio::select! {
                    _ = &mut cancel_rx => return,
                    _ = sleep(self.constraint_poll) => {}
                }
            }

            self.set_status(TaskStatus::Running).await;
            attempt += 1;

            let result = tokio::select! {
                _ = &mut cancel_rx => return,
                result = (self.handler)(self.request.payload.clone()) => result,
            };

            match result {
                Ok(()) => {
                    debug!(task_key = %self.key, attempt, "Task completed");
                    self.finish(TaskStatus::Completed).await;
                    return;
                }
                Err(err) if err.is_transient() && policy.should_retry(attempt) => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        task_key = %self.key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Task failed; retrying"
                    );
                    self.set_status(TaskStatus::Retrying { attempt }).await;
                    tokio::select! {
                        _ = &mut cancel_rx => return,
                        _ = sleep(delay) => {}
                    }
                }
                Err(err) => {
                    warn!(task_key = %self.key, attempt, error = %err, "Task failed");
                    self.finish(TaskStatus::Failed {
                        error: err.to_string(),
                    })
                    .await;
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl TaskQueue for TokioTaskQueue {
    async fn enqueue(&self, request: TaskRequest) -> Result<EnqueueOutcome> {
        let handler = self.handler_for(&request.kind).await.ok_or_else(|| {
            BridgeError::NotAvailable(format!("No handler registered for task kind: {}", request.kind))
        })?;

        let _guard = self.enqueue_lock.lock().await;
        let key = request.key.clone();

        let outcome = if self.stop_worker(&key).await {
            EnqueueOutcome::Replaced
        } else {
            EnqueueOutcome::Enqueued
        };

        if let Some(store) = &self.store {
            store.upsert(&request).await?;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        // The entry is visible before the worker can touch it.
        let mut tasks = self.tasks.write().await;
        let worker = Worker {
            tasks: Arc::clone(&self.tasks),
            key: key.clone(),
            generation,
            handler,
            request,
            monitor: self.network_monitor.clone(),
            store: self.store.clone(),
            constraint_poll: self.constraint_poll,
        };
        let handle = tokio::spawn(worker.run(cancel_rx));
        tasks.insert(
            key.clone(),
            TaskEntry {
                generation,
                status: TaskStatus::Pending,
                handle: Some(handle),
                cancel: Some(cancel_tx),
            },
        );

        debug!(task_key = %key, ?outcome, generation, "Task enqueued");
        Ok(outcome)
    }

    async fn cancel(&self, key: &TaskKey) -> Result<bool> {
        let _guard = self.enqueue_lock.lock().await;
        let stopped = self.stop_worker(key).await;

        if stopped {
            let mut tasks = self.tasks.write().await;
            if let Some(entry) = tasks.get_mut(key) {
                entry.status = TaskStatus::Cancelled;
            }
        }

        if let Some(store) = &self.store {
            store.remove(key).await?;
        }

        debug!(task_key = %key, stopped, "Task cancelled");
        Ok(stopped)
    }

    async fn status(&self, key: &TaskKey) -> Result<Option<TaskStatus>> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(key).map(|entry| entry.status.clone()))
    }

    async fn pending_keys(&self) -> Result<Vec<TaskKey>> {
        let tasks = self.tasks.read().await;
        let mut keys: Vec<TaskKey> = tasks
            .iter()
            .filter(|(_, entry)| !entry.status.is_terminal())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
