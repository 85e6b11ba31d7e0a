//! Domain models for the playback library
//!
//! Rows are mapped with `sqlx::FromRow`. Durations and positions are stored as
//! milliseconds in `i64` columns; timestamps are unix milliseconds.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// =============================================================================
// Segment
// =============================================================================

/// A single playable unit belonging to exactly one parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Segment {
    pub id: String,
    pub parent_id: String,
    /// Zero-based position within the parent
    pub sequence_index: i64,
    pub duration_ms: i64,
    /// Server-relative path of the media file
    pub media_path: String,
    /// Whether a complete copy exists in the local cache
    pub cached: bool,
    /// Last committed offset within this segment
    pub progress_ms: i64,
    pub updated_at: i64,
}

impl Segment {
    pub fn new(
        id: impl Into<String>,
        parent_id: impl Into<String>,
        sequence_index: i64,
        duration_ms: i64,
        media_path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.into(),
            sequence_index,
            duration_ms,
            media_path: media_path.into(),
            cached: false,
            progress_ms: 0,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Validate segment data
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Segment id cannot be empty".to_string());
        }

        if self.parent_id.trim().is_empty() {
            return Err("Segment parent id cannot be empty".to_string());
        }

        if self.sequence_index < 0 {
            return Err(format!(
                "Segment sequence index {} cannot be negative",
                self.sequence_index
            ));
        }

        if self.duration_ms <= 0 {
            return Err("Segment duration must be positive".to_string());
        }

        if !(0..=self.duration_ms).contains(&self.progress_ms) {
            return Err(format!(
                "Segment progress {} is outside [0, {}]",
                self.progress_ms, self.duration_ms
            ));
        }

        Ok(())
    }

    /// Duration as an unsigned millisecond count
    pub fn duration(&self) -> u64 {
        self.duration_ms.max(0) as u64
    }
}

// =============================================================================
// Parent
// =============================================================================

/// A container (book, album, series) owning an ordered list of segments.
///
/// `total_duration_ms` and `segment_count` are derived from the segment rows
/// whenever the parent is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Parent {
    pub id: String,
    pub title: String,
    /// Absolute position across all segments
    pub progress_ms: i64,
    /// True iff the parent has segments and every one is cached
    pub cached: bool,
    pub finished: bool,
    pub current_segment_id: Option<String>,
    pub updated_at: i64,
    pub total_duration_ms: i64,
    pub segment_count: i64,
}

impl Parent {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            progress_ms: 0,
            cached: false,
            finished: false,
            current_segment_id: None,
            updated_at: chrono::Utc::now().timestamp_millis(),
            total_duration_ms: 0,
            segment_count: 0,
        }
    }

    /// Validate parent data
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Parent id cannot be empty".to_string());
        }

        if self.title.trim().is_empty() {
            return Err("Parent title cannot be empty".to_string());
        }

        if self.progress_ms < 0 {
            return Err("Parent progress cannot be negative".to_string());
        }

        Ok(())
    }

    /// Milliseconds left until the end of the last segment
    pub fn remaining_ms(&self) -> i64 {
        (self.total_duration_ms - self.progress_ms).max(0)
    }
}

/// Outcome of committing a segment offset locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressCommit {
    pub segment_id: String,
    pub parent_id: String,
    /// Offset stored on the segment row
    pub offset_ms: i64,
    /// Sum of preceding durations plus the offset
    pub parent_progress_ms: i64,
    pub total_duration_ms: i64,
    /// Duration of the committed segment
    pub segment_duration_ms: i64,
}
