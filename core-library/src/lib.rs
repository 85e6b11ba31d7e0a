//! # Library Persistence Module
//!
//! Owns the local SQLite database holding parents, segments and durable
//! background jobs.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite connection pooling and embedded migrations
//! - `Segment` / `Parent` models with validation
//! - Repository traits with `sqlx` implementations
//! - Per-segment write serialization (`SegmentLocks`)
//! - A durable `TaskStore` for the background task queue

pub mod db;
pub mod error;
pub mod locks;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
pub use locks::{SegmentGuard, SegmentLocks};
pub use models::{Parent, ProgressCommit, Segment};
pub use repositories::{
    Page, PageRequest, ParentRepository, SegmentRepository, SqliteParentRepository,
    SqliteSegmentRepository, SqliteTaskStore,
};
