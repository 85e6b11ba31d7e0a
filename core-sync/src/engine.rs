//! # Progress Sync Engine
//!
//! Turns playback position updates into a durable local record and
//! throttled remote pushes.
//!
//! ## Workflow
//!
//! 1. Commit the segment offset and the parent position it implies to the
//!    local store while holding the segment's write lock. A failure here
//!    fails the call and nothing is pushed.
//! 2. Count non-manual updates; every `push_interval_ticks`-th one, and every
//!    manual one, enqueues a `ReportProgress` task keyed by segment so a
//!    newer push replaces a pending one.
//! 3. Detect a finished segment (position within `finish_epsilon_ms` of its
//!    end) and a finished parent (less than `finished_window_ms` left while
//!    paused or stopped). Each finish event enqueues one `MarkWatched` task;
//!    the detector re-arms once the position falls back out of range.
//!
//! Remote delivery is owned by the task queue and its retry policy. Queue
//! failures during an update are logged and never undo the local commit.

use crate::config::ProgressSyncConfig;
use crate::error::{Result, SyncError};
use crate::task::{ProgressReport, SyncTask, WatchTarget};
use bridge_traits::background::{EnqueueOutcome, TaskQueue};
use bridge_traits::playback::PlaybackState;
use bridge_traits::time::Clock;
use core_library::repositories::{ParentRepository, SegmentRepository};
use core_library::{ProgressCommit, SegmentLocks};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What a single [`ProgressSyncEngine::update_progress`] call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressOutcome {
    pub commit: ProgressCommit,
    /// Tick counter after this call; unchanged by manual updates
    pub tick: u64,
    /// A progress push was enqueued
    pub pushed: bool,
    pub segment_finished: bool,
    pub parent_finished: bool,
}

pub struct ProgressSyncEngine {
    config: ProgressSyncConfig,
    segments: Arc<dyn SegmentRepository>,
    parents: Arc<dyn ParentRepository>,
    locks: Arc<SegmentLocks>,
    queue: Arc<dyn TaskQueue>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    ticks: AtomicU64,
    finished_segments: Mutex<HashSet<String>>,
    finished_parents: Mutex<HashSet<String>>,
    queue_item_id: RwLock<Option<String>>,
}

impl ProgressSyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ProgressSyncConfig,
        segments: Arc<dyn SegmentRepository>,
        parents: Arc<dyn ParentRepository>,
        locks: Arc<SegmentLocks>,
        queue: Arc<dyn TaskQueue>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().map_err(SyncError::Config)?;

        Ok(Self {
            config,
            segments,
            parents,
            locks,
            queue,
            event_bus,
            clock,
            ticks: AtomicU64::new(0),
            finished_segments: Mutex::new(HashSet::new()),
            finished_parents: Mutex::new(HashSet::new()),
            queue_item_id: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &ProgressSyncConfig {
        &self.config
    }

    /// Play-queue item reported with subsequent pushes
    pub fn set_queue_item_id(&self, queue_item_id: Option<String>) {
        *self.queue_item_id.write() = queue_item_id;
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Record a playback position.
    ///
    /// `position_ms` is the offset inside `segment_id` and is clamped to the
    /// segment's duration.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the segment does not exist
    /// - `LocalCommit` if the local store rejected the write
    #[instrument(skip(self))]
    pub async fn update_progress(
        &self,
        segment_id: &str,
        state: PlaybackState,
        position_ms: u64,
        manual: bool,
    ) -> Result<ProgressOutcome> {
        let commit = match self.commit_locally(segment_id, position_ms).await {
            Ok(commit) => commit,
            Err(e) => {
                warn!(error = %e, "Local progress commit failed");
                self.emit(SyncEvent::LocalCommitFailed {
                    segment_id: segment_id.to_string(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        self.emit(SyncEvent::ProgressCommitted {
            segment_id: commit.segment_id.clone(),
            parent_id: commit.parent_id.clone(),
            offset_ms: commit.offset_ms as u64,
            parent_progress_ms: commit.parent_progress_ms as u64,
        });

        let tick = if manual {
            self.ticks.load(Ordering::SeqCst)
        } else {
            self.ticks.fetch_add(1, Ordering::SeqCst) + 1
        };

        let pushed = if manual || tick % self.config.push_interval_ticks == 0 {
            self.push_progress(&commit, state).await
        } else {
            false
        };

        let segment_finished = self.check_segment_finished(&commit).await;
        let parent_finished = self.check_parent_finished(&commit, state).await;

        Ok(ProgressOutcome {
            commit,
            tick,
            pushed,
            segment_finished,
            parent_finished,
        })
    }

    async fn commit_locally(&self, segment_id: &str, position_ms: u64) -> Result<ProgressCommit> {
        let _guard = self.locks.lock(segment_id).await;

        let segment = self
            .segments
            .find_by_id(segment_id)
            .await
            .map_err(SyncError::LocalCommit)?
            .ok_or_else(|| SyncError::not_found("Segment", segment_id))?;

        let offset_ms = position_ms.min(segment.duration()) as i64;
        self.parents
            .commit_progress(segment_id, offset_ms)
            .await
            .map_err(SyncError::LocalCommit)
    }

    fn inflated(&self, duration_ms: i64) -> u64 {
        (duration_ms.max(0) as f64 * self.config.duration_multiplier).round() as u64
    }

    async fn push_progress(&self, commit: &ProgressCommit, state: PlaybackState) -> bool {
        let report = ProgressReport {
            segment_id: commit.segment_id.clone(),
            offset_millis: commit.offset_ms as u64,
            duration_millis: self.inflated(commit.segment_duration_ms),
            playback_state: state,
            parent_container_key: commit.parent_id.clone(),
            queue_item_id: self.queue_item_id.read().clone(),
            timestamp: self.clock.unix_timestamp_millis(),
        };

        match self.enqueue(SyncTask::ReportProgress(report)).await {
            Ok(outcome) => {
                self.emit(SyncEvent::PushScheduled {
                    segment_id: commit.segment_id.clone(),
                    offset_ms: commit.offset_ms as u64,
                    replaced: outcome == EnqueueOutcome::Replaced,
                });
                true
            }
            Err(e) => {
                warn!(segment_id = %commit.segment_id, error = %e, "Failed to schedule progress push");
                false
            }
        }
    }

    async fn check_segment_finished(&self, commit: &ProgressCommit) -> bool {
        let reached = commit.offset_ms as u64 + self.config.finish_epsilon_ms
            >= commit.segment_duration_ms as u64;

        if !reached {
            self.finished_segments.lock().remove(&commit.segment_id);
            return false;
        }
        if !self.finished_segments.lock().insert(commit.segment_id.clone()) {
            return false;
        }

        info!(segment_id = %commit.segment_id, "Segment finished");
        self.emit(SyncEvent::SegmentFinished {
            segment_id: commit.segment_id.clone(),
        });
        let target = WatchTarget::Segment(commit.segment_id.clone());
        if let Err(e) = self.enqueue(SyncTask::MarkWatched { target }).await {
            warn!(error = %e, "Failed to schedule segment watched");
        }
        true
    }

    async fn check_parent_finished(&self, commit: &ProgressCommit, state: PlaybackState) -> bool {
        let remaining = (commit.total_duration_ms - commit.parent_progress_ms).max(0) as u64;

        if remaining >= self.config.finished_window_ms {
            self.finished_parents.lock().remove(&commit.parent_id);
            return false;
        }
        if !matches!(state, PlaybackState::Stopped | PlaybackState::Paused) {
            return false;
        }
        if !self.finished_parents.lock().insert(commit.parent_id.clone()) {
            return false;
        }

        info!(parent_id = %commit.parent_id, remaining_ms = remaining, "Parent finished");
        if let Err(e) = self.parents.set_finished(&commit.parent_id, true).await {
            warn!(parent_id = %commit.parent_id, error = %e, "Failed to flag parent finished");
        }
        self.emit(SyncEvent::ParentFinished {
            parent_id: commit.parent_id.clone(),
        });
        let target = WatchTarget::Parent(commit.parent_id.clone());
        if let Err(e) = self.enqueue(SyncTask::MarkWatched { target }).await {
            warn!(error = %e, "Failed to schedule parent watched");
        }
        true
    }

    /// Queue an explicit watched flag for a segment or parent.
    #[instrument(skip(self))]
    pub async fn mark_watched(&self, target: WatchTarget) -> Result<EnqueueOutcome> {
        if let WatchTarget::Parent(parent_id) = &target {
            self.parents
                .set_finished(parent_id, true)
                .await
                .map_err(SyncError::LocalCommit)?;
        }
        self.enqueue(SyncTask::MarkWatched { target }).await
    }

    /// Queue an explicit unwatched flag, replacing a pending watched one.
    #[instrument(skip(self))]
    pub async fn mark_unwatched(&self, target: WatchTarget) -> Result<EnqueueOutcome> {
        match &target {
            WatchTarget::Segment(id) => {
                self.finished_segments.lock().remove(id);
            }
            WatchTarget::Parent(id) => {
                self.finished_parents.lock().remove(id);
                self.parents
                    .set_finished(id, false)
                    .await
                    .map_err(SyncError::LocalCommit)?;
            }
        }
        self.enqueue(SyncTask::MarkUnwatched { target }).await
    }

    async fn enqueue(&self, task: SyncTask) -> Result<EnqueueOutcome> {
        let request = task.into_request(self.config.retry.clone())?;
        let key = request.key.clone();
        let outcome = self.queue.enqueue(request).await.map_err(SyncError::Queue)?;
        debug!(task_key = %key, ?outcome, "Sync task enqueued");
        Ok(outcome)
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.event_bus.emit(CoreEvent::Sync(event));
    }
}
