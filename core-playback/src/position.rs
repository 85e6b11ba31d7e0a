//! # Segment Position Tracker
//!
//! Pure state machine mapping playback positions onto an ordered list of
//! segment durations. No I/O, no clocks, no locking; callers serialize
//! access.
//!
//! Invariants once a non-empty list is loaded:
//! - `segment_index < len`
//! - `offset_ms <= durations[segment_index]`
//!
//! Relative seeks never fail. They walk across segment boundaries and clamp
//! at either end of the list.

use crate::error::{PlaybackError, Result};
use serde::{Deserialize, Serialize};

/// Segment coordinates of a playback position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionState {
    pub segment_index: usize,
    pub offset_ms: u64,
}

impl PositionState {
    pub fn new(segment_index: usize, offset_ms: u64) -> Self {
        Self {
            segment_index,
            offset_ms,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SegmentPositionTracker {
    durations: Vec<u64>,
    position: PositionState,
}

impl SegmentPositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker positioned at the start of `durations`.
    pub fn with_durations(durations: Vec<u64>) -> Self {
        let mut tracker = Self::new();
        tracker.load(durations);
        tracker
    }

    /// Replace the segment list and reset to `(0, 0)`.
    pub fn load(&mut self, durations: Vec<u64>) {
        self.durations = durations;
        self.position = PositionState::default();
    }

    /// Replace the segment list and re-seed the position.
    ///
    /// On error the new list stays loaded at `(0, 0)`.
    pub fn load_at(
        &mut self,
        durations: Vec<u64>,
        segment_index: usize,
        offset_ms: u64,
    ) -> Result<PositionState> {
        self.load(durations);
        self.set_position(segment_index, offset_ms)
    }

    /// Replace the segment list and re-seed from an absolute position,
    /// clamping to the end of the final segment.
    pub fn load_at_absolute(&mut self, durations: Vec<u64>, absolute_ms: u64) -> PositionState {
        self.load(durations);
        self.seek_relative(i64::try_from(absolute_ms).unwrap_or(i64::MAX))
    }

    /// Jump to `offset_ms` within segment `segment_index`.
    ///
    /// The offset is clamped to `[0, duration]`.
    ///
    /// # Errors
    ///
    /// `PlaybackError::OutOfBounds` if `segment_index >= len`.
    pub fn set_position(&mut self, segment_index: usize, offset_ms: u64) -> Result<PositionState> {
        let duration = *self
            .durations
            .get(segment_index)
            .ok_or(PlaybackError::OutOfBounds {
                index: segment_index,
                len: self.durations.len(),
            })?;

        self.position = PositionState::new(segment_index, offset_ms.min(duration));
        Ok(self.position)
    }

    /// Move by `delta_ms` (negative rewinds), crossing segment boundaries.
    ///
    /// Moving past the end lands on the end of the final segment; moving
    /// before the start lands on `(0, 0)`. A no-op on an empty list.
    pub fn seek_relative(&mut self, delta_ms: i64) -> PositionState {
        if self.durations.is_empty() || delta_ms == 0 {
            return self.position;
        }

        self.position = if delta_ms > 0 {
            self.walk_forward(delta_ms.unsigned_abs())
        } else {
            self.walk_backward(delta_ms.unsigned_abs())
        };
        self.position
    }

    fn walk_forward(&self, delta_ms: u64) -> PositionState {
        let mut remaining = self.position.offset_ms.saturating_add(delta_ms);

        for (index, &duration) in self
            .durations
            .iter()
            .enumerate()
            .skip(self.position.segment_index)
        {
            if remaining < duration {
                return PositionState::new(index, remaining);
            }
            remaining -= duration;
        }

        let last = self.durations.len() - 1;
        PositionState::new(last, self.durations[last])
    }

    fn walk_backward(&self, delta_ms: u64) -> PositionState {
        let mut index = self.position.segment_index;
        let mut offset = self.position.offset_ms;
        let mut deficit = delta_ms;

        loop {
            if deficit <= offset {
                return PositionState::new(index, offset - deficit);
            }
            if index == 0 {
                return PositionState::default();
            }
            deficit -= offset;
            index -= 1;
            offset = self.durations[index];
        }
    }

    /// Sum of the durations before the current segment plus the offset.
    pub fn absolute_position(&self) -> u64 {
        self.durations
            .iter()
            .take(self.position.segment_index)
            .sum::<u64>()
            + self.position.offset_ms
    }

    pub fn position(&self) -> PositionState {
        self.position
    }

    pub fn durations(&self) -> &[u64] {
        &self.durations
    }

    pub fn total_duration(&self) -> u64 {
        self.durations.iter().sum()
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SegmentPositionTracker {
        SegmentPositionTracker::with_durations(vec![180_000, 200_000, 150_000])
    }

    #[test]
    fn test_forward_seek_crosses_boundary() {
        let mut t = tracker();
        t.set_position(0, 170_000).unwrap();

        assert_eq!(t.seek_relative(20_000), PositionState::new(1, 10_000));
        assert_eq!(t.absolute_position(), 190_000);
    }

    #[test]
    fn test_backward_seek_crosses_boundary() {
        let mut t = tracker();
        t.set_position(1, 2_000).unwrap();

        assert_eq!(t.seek_relative(-5_000), PositionState::new(0, 177_000));
    }

    #[test]
    fn test_forward_seek_clamps_to_end() {
        let mut t = tracker();
        t.set_position(2, 100_000).unwrap();

        assert_eq!(t.seek_relative(1_000_000), PositionState::new(2, 150_000));
        assert_eq!(t.absolute_position(), t.total_duration());
    }

    #[test]
    fn test_backward_seek_clamps_to_start() {
        let mut t = tracker();
        t.set_position(1, 5_000).unwrap();

        assert_eq!(t.seek_relative(-10_000_000), PositionState::default());
    }

    #[test]
    fn test_seek_landing_exactly_on_boundary_starts_next_segment() {
        let mut t = tracker();

        assert_eq!(t.seek_relative(180_000), PositionState::new(1, 0));
        assert_eq!(t.seek_relative(-1), PositionState::new(0, 179_999));
    }

    #[test]
    fn test_backward_seek_to_exact_segment_start() {
        let mut t = tracker();
        t.set_position(2, 0).unwrap();

        assert_eq!(t.seek_relative(-200_000), PositionState::new(1, 0));
    }

    #[test]
    fn test_set_position_out_of_bounds() {
        let mut t = tracker();
        t.set_position(1, 1_000).unwrap();

        assert!(matches!(
            t.set_position(3, 0),
            Err(PlaybackError::OutOfBounds { index: 3, len: 3 })
        ));
        assert_eq!(t.position(), PositionState::new(1, 1_000));
    }

    #[test]
    fn test_set_position_clamps_offset() {
        let mut t = tracker();

        assert_eq!(
            t.set_position(2, 999_999).unwrap(),
            PositionState::new(2, 150_000)
        );
    }

    #[test]
    fn test_reload_resets_position() {
        let mut t = tracker();
        t.set_position(2, 10).unwrap();

        t.load(vec![60_000, 60_000]);
        assert_eq!(t.position(), PositionState::default());

        let seeded = t.load_at(vec![60_000, 60_000], 1, 5_000).unwrap();
        assert_eq!(seeded, PositionState::new(1, 5_000));
        assert!(t.load_at(vec![60_000], 4, 0).is_err());
        assert_eq!(t.position(), PositionState::default());
    }

    #[test]
    fn test_load_at_absolute() {
        let mut t = SegmentPositionTracker::new();

        let state = t.load_at_absolute(vec![180_000, 200_000, 150_000], 390_000);
        assert_eq!(state, PositionState::new(2, 10_000));

        let state = t.load_at_absolute(vec![1_000], 5_000);
        assert_eq!(state, PositionState::new(0, 1_000));
    }

    #[test]
    fn test_empty_tracker_is_inert() {
        let mut t = SegmentPositionTracker::new();

        assert_eq!(t.seek_relative(5_000), PositionState::default());
        assert_eq!(t.seek_relative(-5_000), PositionState::default());
        assert_eq!(t.absolute_position(), 0);
        assert!(matches!(
            t.set_position(0, 0),
            Err(PlaybackError::OutOfBounds { index: 0, len: 0 })
        ));
    }

    #[test]
    fn test_absolute_position_follows_sum_of_deltas() {
        let mut t = tracker();
        let total = t.total_duration() as i64;
        let mut expected: i64 = 0;

        for delta in [45_000, 200_000, -30_000, 600_000, -1_000, -700_000, 12_345] {
            t.seek_relative(delta);
            expected = (expected + delta).clamp(0, total);

            let state = t.position();
            assert!(state.segment_index < t.len());
            assert!(state.offset_ms <= t.durations()[state.segment_index]);
            assert_eq!(t.absolute_position() as i64, expected, "after delta {}", delta);
        }
    }
}
