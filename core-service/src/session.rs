//! # Playback Session
//!
//! One parent loaded into the host player. The session owns the position
//! tracker for the parent's segments, translates relative seeks into player
//! coordinates and runs the progress commit loop until it is closed.

use crate::error::{CoreError, Result};
use bridge_traits::playback::{MediaPlayer, PlaybackState};
use core_library::{ParentRepository, SegmentRepository};
use core_playback::{PositionState, SegmentPositionTracker};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use core_sync::{CommitLoopHandle, ProgressCommitLoop, ProgressOutcome, ProgressSyncEngine};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub struct PlaybackSession {
    parent_id: String,
    segment_ids: Vec<String>,
    tracker: Mutex<SegmentPositionTracker>,
    player: Arc<dyn MediaPlayer>,
    sync: Arc<ProgressSyncEngine>,
    event_bus: EventBus,
    commit_loop: Option<CommitLoopHandle>,
}

impl PlaybackSession {
    /// Load `parent_id`, move the player to the stored resume position and
    /// start committing progress.
    ///
    /// # Errors
    ///
    /// `CoreError::NotFound` if the parent does not exist.
    #[instrument(skip(player, segments, parents, sync, event_bus, token))]
    pub(crate) async fn open(
        parent_id: &str,
        player: Arc<dyn MediaPlayer>,
        segments: &dyn SegmentRepository,
        parents: &dyn ParentRepository,
        sync: Arc<ProgressSyncEngine>,
        event_bus: EventBus,
        token: CancellationToken,
    ) -> Result<Self> {
        let parent = parents
            .find_by_id(parent_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Parent", parent_id))?;
        let loaded = segments.find_by_parent(parent_id).await?;

        let segment_ids: Vec<String> = loaded.iter().map(|s| s.id.clone()).collect();
        let durations: Vec<u64> = loaded.iter().map(|s| s.duration()).collect();

        let mut tracker = SegmentPositionTracker::new();
        let resume = tracker.load_at_absolute(durations, parent.progress_ms.max(0) as u64);
        let resume_ms = tracker.absolute_position();

        if !tracker.is_empty() {
            player.seek_to(resume.segment_index, resume.offset_ms).await?;
        }

        let commit_loop = (!segment_ids.is_empty()).then(|| {
            ProgressCommitLoop::new(sync.clone(), player.clone(), segment_ids.clone()).spawn(token)
        });

        info!(
            segments = segment_ids.len(),
            resume_ms, "Playback session opened"
        );
        let _ = event_bus.emit(CoreEvent::Playback(PlaybackEvent::SessionOpened {
            parent_id: parent_id.to_string(),
            segment_count: segment_ids.len(),
            resume_ms,
        }));

        Ok(Self {
            parent_id: parent_id.to_string(),
            segment_ids,
            tracker: Mutex::new(tracker),
            player,
            sync,
            event_bus,
            commit_loop,
        })
    }

    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    pub fn segment_ids(&self) -> &[String] {
        &self.segment_ids
    }

    /// Last position the session moved the player to.
    pub fn position(&self) -> PositionState {
        self.tracker.lock().position()
    }

    pub fn absolute_position(&self) -> u64 {
        self.tracker.lock().absolute_position()
    }

    pub fn total_duration(&self) -> u64 {
        self.tracker.lock().total_duration()
    }

    /// Skip forward or back by `delta_ms` from where the player is now.
    ///
    /// Seeks clamp at either end of the parent and are committed as a
    /// manual progress update.
    #[instrument(skip(self), fields(parent_id = %self.parent_id))]
    pub async fn seek_relative(&self, delta_ms: i64) -> Result<PositionState> {
        let current = self.player.position().await?;
        let target = {
            let mut tracker = self.tracker.lock();
            if tracker.is_empty() {
                return Ok(tracker.position());
            }
            tracker.set_position(current.segment_index, current.offset_ms)?;
            tracker.seek_relative(delta_ms)
        };

        self.move_player(target).await?;
        Ok(target)
    }

    /// Jump to `offset_ms` inside the segment at `segment_index`.
    ///
    /// # Errors
    ///
    /// `PlaybackError::OutOfBounds` for an index outside the parent.
    #[instrument(skip(self), fields(parent_id = %self.parent_id))]
    pub async fn seek_to(&self, segment_index: usize, offset_ms: u64) -> Result<PositionState> {
        let target = self.tracker.lock().set_position(segment_index, offset_ms)?;
        self.move_player(target).await?;
        Ok(target)
    }

    async fn move_player(&self, target: PositionState) -> Result<()> {
        self.player
            .seek_to(target.segment_index, target.offset_ms)
            .await?;

        let absolute_ms = self.tracker.lock().absolute_position();
        let _ = self
            .event_bus
            .emit(CoreEvent::Playback(PlaybackEvent::Seeked {
                parent_id: self.parent_id.clone(),
                segment_index: target.segment_index,
                offset_ms: target.offset_ms,
                absolute_ms,
            }));

        let state = self.player.state().await.unwrap_or(PlaybackState::Paused);
        self.commit(target, state).await?;
        Ok(())
    }

    async fn commit(&self, target: PositionState, state: PlaybackState) -> Result<ProgressOutcome> {
        let segment_id = self
            .segment_ids
            .get(target.segment_index)
            .ok_or_else(|| CoreError::not_found("Segment index", &target.segment_index.to_string()))?;

        Ok(self
            .sync
            .update_progress(segment_id, state, target.offset_ms, true)
            .await?)
    }

    /// Stop the commit loop after its final flush.
    pub async fn close(mut self) {
        if let Some(commit_loop) = self.commit_loop.take() {
            commit_loop.stop().await;
        }

        let tracker = self.tracker.get_mut();
        match self.player.position().await {
            Ok(position) => {
                if let Err(e) = tracker.set_position(position.segment_index, position.offset_ms) {
                    warn!(error = %e, "Player ended outside the session");
                }
            }
            Err(e) => warn!(error = %e, "Failed to read final player position"),
        }
        let absolute_ms = tracker.absolute_position();

        info!(parent_id = %self.parent_id, absolute_ms, "Playback session closed");
        let _ = self
            .event_bus
            .emit(CoreEvent::Playback(PlaybackEvent::SessionClosed {
                parent_id: self.parent_id.clone(),
                absolute_ms,
            }));
    }
}
