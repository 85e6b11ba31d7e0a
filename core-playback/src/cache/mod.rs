//! # Offline Segment Cache
//!
//! Keeps segment files on local storage so parents can be played without a
//! server connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐      ┌──────────────────────────┐
//! │ CacheManager                 │─────>│ CacheReconciler          │
//! │  - start_download(parent)    │      │  - reconcile()           │
//! │  - cancel(parent)            │      │  - spawn_periodic()      │
//! │  - remove(parent)            │      └────────────┬─────────────┘
//! └──────┬───────────────────────┘                   │
//!        ├──> SegmentFetcher (media bytes)           │
//!        ├──> FileSystemAccess (cache files) <───────┤
//!        └──> Segment/Parent repositories (flags) <──┘
//! ```
//!
//! Files are laid out by [`CacheLayout`]; the database flag of a segment is
//! only trusted as far as reconciliation confirms it.

pub mod config;
pub mod fetcher;
pub mod manager;
pub mod naming;
pub mod reconciler;

pub use config::CacheConfig;
pub use fetcher::{HttpSegmentFetcher, SegmentFetcher};
pub use manager::{CacheManager, DownloadPlan};
pub use naming::{CacheLayout, CacheNaming};
pub use reconciler::{CacheReconciler, ReconcileReport};
