//! # Playback Module
//!
//! Position bookkeeping and the offline segment cache.
//!
//! ## Overview
//!
//! This module handles:
//! - Translating absolute and relative positions into segment coordinates
//!   ([`position::SegmentPositionTracker`])
//! - Downloading the missing segments of a parent into the local cache
//!   ([`cache::CacheManager`])
//! - Healing drift between cache files and the `cached` flags in the
//!   database ([`cache::CacheReconciler`])

pub mod cache;
pub mod error;
pub mod position;

pub use error::{PlaybackError, Result};
pub use position::{PositionState, SegmentPositionTracker};
