//! # Repository Pattern Implementation
//!
//! Each entity has a trait describing its data access operations and a
//! SQLite implementation backed by `sqlx`.
//!
//! ## Available Repositories
//!
//! - `SegmentRepository` - segment rows, cached flags and offsets
//! - `ParentRepository` - parents with derived totals, progress commits and
//!   derived cached flags
//! - `SqliteTaskStore` - durable rows for the background task queue

pub mod pagination;
pub mod parent;
pub mod segment;
pub mod task_store;

pub use pagination::{Page, PageRequest};
pub use parent::{ParentRepository, SqliteParentRepository};
pub use segment::{SegmentRepository, SqliteSegmentRepository};
pub use task_store::SqliteTaskStore;
