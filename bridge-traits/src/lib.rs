//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the playback core and
//! platform-specific implementations. Each trait represents a capability that
//! the core requires but that must be implemented differently per platform.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations with retry
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O for the segment cache
//!
//! ### Platform Integration
//! - [`NetworkMonitor`](network::NetworkMonitor) - Connectivity and metered network detection
//! - [`TaskQueue`](background::TaskQueue) - Durable keyed jobs with replace semantics
//! - [`TaskStore`](background::TaskStore) - Persistence for pending jobs
//! - [`MediaPlayer`](playback::MediaPlayer) - Host-owned player primitive
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate |
//! |----------|---------------------|
//! | Desktop  | `bridge-desktop`    |
//! | iOS      | host-provided       |
//! | Android  | host-provided       |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should convert platform-specific errors to `BridgeError`
//! and include context such as file paths or URLs.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so adapters can be shared across
//! tokio tasks behind `Arc<dyn Trait>`.

pub mod background;
pub mod error;
pub mod http;
pub mod network;
pub mod playback;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use background::{
    EnqueueOutcome, TaskConstraints, TaskKey, TaskQueue, TaskRequest, TaskStatus, TaskStore,
};
pub use http::{Backoff, HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use network::{NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
pub use playback::{MediaPlayer, PlaybackState, PlayerPosition};
pub use storage::{FileMetadata, FileSystemAccess};
pub use time::{Clock, FixedClock, SystemClock};
