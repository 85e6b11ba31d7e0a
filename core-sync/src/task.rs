//! # Sync Tasks
//!
//! Remote work produced by the sync engine. Every task maps to one keyed
//! [`TaskRequest`]; a newer task under the same key replaces the pending
//! one, so at most one push per segment is ever in flight.
//!
//! | Task | Key |
//! |------|-----|
//! | `ReportProgress` | `progress:{segment_id}` |
//! | `MarkWatched` / `MarkUnwatched` of a segment | `watched:segment:{id}` |
//! | `MarkWatched` / `MarkUnwatched` of a parent | `watched:parent:{id}` |
//!
//! Watched and unwatched share a key so the latest intent wins.

use bridge_traits::background::{TaskKey, TaskRequest};
use bridge_traits::http::RetryPolicy;
use bridge_traits::playback::PlaybackState;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const KIND_REPORT_PROGRESS: &str = "sync.report_progress";
pub const KIND_MARK_WATCHED: &str = "sync.mark_watched";
pub const KIND_MARK_UNWATCHED: &str = "sync.mark_unwatched";

/// Every task kind the sync handler executes.
pub const TASK_KINDS: &[&str] = &[KIND_REPORT_PROGRESS, KIND_MARK_WATCHED, KIND_MARK_UNWATCHED];

/// One progress push as the remote receives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub segment_id: String,
    pub offset_millis: u64,
    /// Segment duration after the configured multiplier
    pub duration_millis: u64,
    pub playback_state: PlaybackState,
    pub parent_container_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_item_id: Option<String>,
    /// Unix millis at which the position was sampled
    pub timestamp: i64,
}

/// What a watched-state change applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum WatchTarget {
    Segment(String),
    Parent(String),
}

impl WatchTarget {
    pub fn id(&self) -> &str {
        match self {
            WatchTarget::Segment(id) | WatchTarget::Parent(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WatchTarget::Segment(_) => "segment",
            WatchTarget::Parent(_) => "parent",
        }
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Work for the remote progress API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum SyncTask {
    ReportProgress(ProgressReport),
    MarkWatched { target: WatchTarget },
    MarkUnwatched { target: WatchTarget },
}

impl SyncTask {
    pub fn key(&self) -> TaskKey {
        match self {
            SyncTask::ReportProgress(report) => {
                TaskKey::new(format!("progress:{}", report.segment_id))
            }
            SyncTask::MarkWatched { target } | SyncTask::MarkUnwatched { target } => {
                TaskKey::new(format!("watched:{}", target))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SyncTask::ReportProgress(_) => KIND_REPORT_PROGRESS,
            SyncTask::MarkWatched { .. } => KIND_MARK_WATCHED,
            SyncTask::MarkUnwatched { .. } => KIND_MARK_UNWATCHED,
        }
    }

    /// Wrap the task in a queue request.
    pub fn into_request(self, retry: RetryPolicy) -> serde_json::Result<TaskRequest> {
        let key = self.key();
        let kind = self.kind();
        let payload = serde_json::to_value(&self)?;
        Ok(TaskRequest::new(key, kind, payload).with_retry(retry))
    }

    pub fn from_payload(payload: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(payload)
    }
}
