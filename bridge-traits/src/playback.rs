//! External media player primitive.
//!
//! Decoding and output are owned by the host. The core only needs to read
//! where the player is and to move it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Transport state reported by the host player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position inside the currently loaded segment list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerPosition {
    pub segment_index: usize,
    pub offset_ms: u64,
}

/// Host media player.
///
/// Implementations wrap ExoPlayer, AVPlayer, or a desktop audio backend that
/// plays an ordered list of segments.
#[async_trait]
pub trait MediaPlayer: Send + Sync {
    /// Current segment index and offset within it
    async fn position(&self) -> Result<PlayerPosition>;

    async fn state(&self) -> Result<PlaybackState>;

    /// Jump to `offset_ms` inside the segment at `segment_index`
    async fn seek_to(&self, segment_index: usize, offset_ms: u64) -> Result<()>;
}
