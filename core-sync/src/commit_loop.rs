//! Periodic sampling of the host player into the sync engine.

use crate::engine::ProgressSyncEngine;
use bridge_traits::playback::{MediaPlayer, PlaybackState, PlayerPosition};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Samples the player every `interval` and feeds non-manual updates to the
/// engine. Samples identical to the previous one are skipped. Stopping the
/// loop flushes one final manual update.
pub struct ProgressCommitLoop {
    engine: Arc<ProgressSyncEngine>,
    player: Arc<dyn MediaPlayer>,
    segment_ids: Arc<[String]>,
    interval: Duration,
}

/// Running loop; dropping it leaves the task running until its token fires.
pub struct CommitLoopHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl CommitLoopHandle {
    /// Cancel the loop and wait for the final flush.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Progress commit loop ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl ProgressCommitLoop {
    /// `segment_ids` maps the player's segment index to a segment id.
    pub fn new(
        engine: Arc<ProgressSyncEngine>,
        player: Arc<dyn MediaPlayer>,
        segment_ids: Vec<String>,
    ) -> Self {
        let interval = engine.config().commit_interval;
        Self {
            engine,
            player,
            segment_ids: segment_ids.into(),
            interval,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn spawn(self, token: CancellationToken) -> CommitLoopHandle {
        let loop_token = token.clone();
        let handle = tokio::spawn(async move { self.run(loop_token).await });
        CommitLoopHandle { token, handle }
    }

    async fn run(self, token: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        let mut last: Option<(PlayerPosition, PlaybackState)> = None;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(sample) = self.sample().await {
                        if last != Some(sample) {
                            self.commit(sample, false).await;
                            last = Some(sample);
                        }
                    }
                }
            }
        }

        if let Some(sample) = self.sample().await {
            self.commit(sample, true).await;
        }
        debug!("Progress commit loop stopped");
    }

    async fn sample(&self) -> Option<(PlayerPosition, PlaybackState)> {
        let position = match self.player.position().await {
            Ok(position) => position,
            Err(e) => {
                warn!(error = %e, "Failed to read player position");
                return None;
            }
        };
        let state = match self.player.state().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Failed to read player state");
                return None;
            }
        };
        Some((position, state))
    }

    async fn commit(&self, (position, state): (PlayerPosition, PlaybackState), manual: bool) {
        let Some(segment_id) = self.segment_ids.get(position.segment_index) else {
            warn!(
                segment_index = position.segment_index,
                segments = self.segment_ids.len(),
                "Player reported a segment outside the session"
            );
            return;
        };

        if let Err(e) = self
            .engine
            .update_progress(segment_id, state, position.offset_ms, manual)
            .await
        {
            warn!(segment_id = %segment_id, error = %e, "Progress update failed");
        }
    }
}
