//! Durable Task Queue
//!
//! Platform-aware scheduling of keyed background work. At most one job per
//! key is pending or running at any time; enqueueing under an existing key
//! replaces the earlier job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::http::RetryPolicy;

/// Unique key identifying a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey(pub String);

impl TaskKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task execution constraints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConstraints {
    /// Require any network connection
    pub requires_network: bool,
    /// Require an unmetered connection
    pub requires_unmetered: bool,
}

impl Default for TaskConstraints {
    fn default() -> Self {
        Self {
            requires_network: true,
            requires_unmetered: false,
        }
    }
}

/// A job submitted to a [`TaskQueue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub key: TaskKey,
    /// Handler selector, e.g. `"sync.progress"`
    pub kind: String,
    pub payload: serde_json::Value,
    pub constraints: TaskConstraints,
    pub retry: RetryPolicy,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskRequest {
    pub fn new(key: TaskKey, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            key,
            kind: kind.into(),
            payload,
            constraints: TaskConstraints::default(),
            retry: RetryPolicy::default(),
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_constraints(mut self, constraints: TaskConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Result of [`TaskQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// No job existed for the key
    Enqueued,
    /// A pending or running job under the same key was superseded
    Replaced,
}

/// Task execution status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for constraints or a worker
    Pending,
    Running,
    /// Last attempt failed; waiting for the next one
    Retrying { attempt: u32 },
    Completed,
    Failed { error: String },
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed { .. } | TaskStatus::Cancelled
        )
    }
}

/// Durable keyed task queue.
///
/// Abstracts platform-specific schedulers:
/// - **Android**: WorkManager unique work with `REPLACE` policy
/// - **iOS**: BGTaskScheduler
/// - **Desktop**: in-process tokio workers backed by a [`TaskStore`]
///
/// # Example
///
/// ```ignore
/// use bridge_traits::background::{TaskKey, TaskQueue, TaskRequest};
///
/// async fn push(queue: &dyn TaskQueue) -> Result<()> {
///     let request = TaskRequest::new(
///         TaskKey::new("progress:seg-1"),
///         "sync.progress",
///         serde_json::json!({ "offset_ms": 1000 }),
///     );
///     queue.enqueue(request).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Submit a job, replacing any pending or running job with the same key
    async fn enqueue(&self, request: TaskRequest) -> Result<EnqueueOutcome>;

    /// Cancel the job for `key`. Returns `false` when no job was active.
    async fn cancel(&self, key: &TaskKey) -> Result<bool>;

    /// Status of the most recent job for `key`
    async fn status(&self, key: &TaskKey) -> Result<Option<TaskStatus>>;

    /// Keys of jobs that have not reached a terminal state
    async fn pending_keys(&self) -> Result<Vec<TaskKey>>;
}

/// Persistence for pending task requests.
///
/// Lets a queue survive process restarts. `upsert` must replace an existing
/// row with the same key.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn upsert(&self, request: &TaskRequest) -> Result<()>;

    async fn remove(&self, key: &TaskKey) -> Result<()>;

    async fn load_all(&self) -> Result<Vec<TaskRequest>>;
}
