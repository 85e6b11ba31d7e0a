//! # Event Bus System
//!
//! Typed, broadcast-based events for the playback core. Components publish
//! what happened; hosts and other components subscribe instead of registering
//! observer callbacks.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐   emit   ┌───────────┐
//! │ Connection     ├─────────>│           │
//! └────────────────┘          │           │
//! ┌────────────────┐   emit   │ EventBus  │   subscribe   ┌────────────┐
//! │ Progress sync  ├─────────>│ (broadcast├──────────────>│ Subscriber │
//! └────────────────┘          │  channel) │               └────────────┘
//! ┌────────────────┐   emit   │           │
//! │ Segment cache  ├─────────>│           │
//! └────────────────┘          └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Cache(CacheEvent::ParentCacheChanged {
//!         parent_id: "book-1".to_string(),
//!         cached: true,
//!     }))
//!     .ok();
//!
//! let received = subscriber.recv().await.unwrap();
//! assert!(matches!(received, CoreEvent::Cache(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell behind and missed `n`
//!   events. Non-fatal.
//! - **`RecvError::Closed`**: every sender was dropped; treat as shutdown.
//!
//! Emitting with no subscribers returns an error that publishers ignore.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Endpoint selection
    Connection(ConnectionEvent),
    /// Playback session lifecycle and position commits
    Playback(PlaybackEvent),
    /// Local progress commits and remote pushes
    Sync(SyncEvent),
    /// Offline segment cache
    Cache(CacheEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Connection(e) => e.description(),
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Connection(ConnectionEvent::RaceFailed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::LocalCommitFailed { .. }) => EventSeverity::Error,
            CoreEvent::Cache(CacheEvent::DownloadFailed {
                recoverable: false, ..
            }) => EventSeverity::Error,
            CoreEvent::Cache(CacheEvent::DownloadFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Connection(ConnectionEvent::EndpointSelected { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::ParentFinished { .. }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::ParentCacheChanged { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Connection Events
// ============================================================================

/// Events emitted while choosing a server endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ConnectionEvent {
    /// Probes were issued to every candidate.
    RaceStarted {
        candidates: usize,
    },
    /// A probe succeeded and its endpoint became active.
    EndpointSelected {
        uri: String,
        is_local: bool,
        elapsed_ms: u64,
    },
    /// No endpoint could be selected.
    RaceFailed {
        /// `no_candidates`, `all_failed` or `timeout`
        reason: String,
        message: String,
    },
}

impl ConnectionEvent {
    fn description(&self) -> &str {
        match self {
            ConnectionEvent::RaceStarted { .. } => "Endpoint race started",
            ConnectionEvent::EndpointSelected { .. } => "Endpoint selected",
            ConnectionEvent::RaceFailed { .. } => "Endpoint race failed",
        }
    }
}

// ============================================================================
// Playback Events
// ============================================================================

/// Events related to a playback session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A parent was loaded into a session.
    SessionOpened {
        parent_id: String,
        segment_count: usize,
        /// Absolute resume position (milliseconds).
        resume_ms: u64,
    },
    /// A relative seek was translated into segment coordinates.
    Seeked {
        parent_id: String,
        segment_index: usize,
        offset_ms: u64,
        absolute_ms: u64,
    },
    /// The session ended after its final flush.
    SessionClosed {
        parent_id: String,
        absolute_ms: u64,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::SessionOpened { .. } => "Playback session opened",
            PlaybackEvent::Seeked { .. } => "Playback position moved",
            PlaybackEvent::SessionClosed { .. } => "Playback session closed",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events related to progress synchronization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Progress was written to the local store.
    ProgressCommitted {
        segment_id: String,
        parent_id: String,
        offset_ms: u64,
        parent_progress_ms: u64,
    },
    /// A remote progress push was queued.
    PushScheduled {
        segment_id: String,
        offset_ms: u64,
        /// A pending push for the same segment was superseded.
        replaced: bool,
    },
    /// A segment crossed its finish threshold.
    SegmentFinished {
        segment_id: String,
    },
    /// A parent crossed its finish window while paused or stopped.
    ParentFinished {
        parent_id: String,
    },
    /// The local commit failed; nothing was pushed.
    LocalCommitFailed {
        segment_id: String,
        message: String,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::ProgressCommitted { .. } => "Progress committed locally",
            SyncEvent::PushScheduled { .. } => "Progress push scheduled",
            SyncEvent::SegmentFinished { .. } => "Segment finished",
            SyncEvent::ParentFinished { .. } => "Parent finished",
            SyncEvent::LocalCommitFailed { .. } => "Local progress commit failed",
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

/// Events related to offline segment caching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// Missing segments of a parent were queued for download.
    DownloadQueued {
        parent_id: String,
        queued: usize,
        skipped: usize,
    },
    /// A segment file was written and marked cached.
    SegmentCached {
        parent_id: String,
        segment_id: String,
        bytes: u64,
    },
    DownloadFailed {
        parent_id: String,
        segment_id: String,
        message: String,
        recoverable: bool,
    },
    /// Active downloads of a parent were cancelled.
    DownloadCancelled {
        parent_id: String,
        aborted: usize,
    },
    /// Cached files of a parent were deleted.
    Removed {
        parent_id: String,
    },
    /// The derived cached flag of a parent flipped.
    ParentCacheChanged {
        parent_id: String,
        cached: bool,
    },
    /// A reconciliation pass finished.
    Reconciled {
        marked_cached: usize,
        marked_uncached: usize,
        parents_updated: usize,
    },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::DownloadQueued { .. } => "Segment downloads queued",
            CacheEvent::SegmentCached { .. } => "Segment cached",
            CacheEvent::DownloadFailed { .. } => "Segment download failed",
            CacheEvent::DownloadCancelled { .. } => "Segment downloads cancelled",
            CacheEvent::Removed { .. } => "Cached segments removed",
            CacheEvent::ParentCacheChanged { .. } => "Parent cache state changed",
            CacheEvent::Reconciled { .. } => "Cache reconciled",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Creates a new subscriber wrapped in an [`EventStream`].
    pub fn stream(&self) -> EventStream {
        EventStream::new(self.subscribe())
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus};
///
/// let event_bus = EventBus::new(100);
/// let cache_only = event_bus
///     .stream()
///     .filter(|event| matches!(event, CoreEvent::Cache(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
