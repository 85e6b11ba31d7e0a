//! # Progress Sync Module
//!
//! Keeps playback progress durable locally and eventually consistent with
//! the media server.
//!
//! ## Overview
//!
//! This module manages:
//! - Committing segment offsets and parent positions to the local store
//! - Throttled, keyed progress pushes through the background task queue
//! - Finish detection for segments and parents
//! - Executing queued tasks against the remote progress API
//!
//! ## Components
//!
//! - **Engine** (`engine`): local commit, push throttling and finish detection
//! - **Commit Loop** (`commit_loop`): periodic player sampling with a final flush
//! - **Tasks** (`task`): queue payloads and their REPLACE keys
//! - **Handler** (`handler`): runs queued tasks against a [`RemoteProgressApi`]
//! - **Remote** (`remote`): HTTP implementation of the progress API

pub mod commit_loop;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod remote;
pub mod task;

pub use commit_loop::{CommitLoopHandle, ProgressCommitLoop};
pub use config::ProgressSyncConfig;
pub use engine::{ProgressOutcome, ProgressSyncEngine};
pub use error::{Result, SyncError};
pub use handler::SyncTaskHandler;
pub use remote::{HttpProgressApi, RemoteProgressApi};
pub use task::{ProgressReport, SyncTask, WatchTarget, TASK_KINDS};
