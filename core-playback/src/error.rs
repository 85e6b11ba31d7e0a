//! # Playback Error Types

use core_library::error::LibraryError;
use thiserror::Error;

/// Errors raised by the position tracker and the segment cache.
#[derive(Error, Debug)]
pub enum PlaybackError {
    /// `set_position` was given an index outside the loaded segment list.
    #[error("Segment index {index} out of bounds for {len} segment(s)")]
    OutOfBounds { index: usize, len: usize },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    /// Reading or writing the cache directory failed.
    #[error("File system error: {0}")]
    FileSystem(String),

    /// Fetching a segment from the server failed.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Download timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid cache configuration: {0}")]
    Config(String),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),
}

impl PlaybackError {
    /// Returns `true` if the operation can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlaybackError::Network(_) | PlaybackError::Timeout(_) | PlaybackError::FileSystem(_)
        )
    }

    pub(crate) fn not_found(entity_type: &str, id: &str) -> Self {
        PlaybackError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
