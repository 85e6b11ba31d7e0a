//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the playback core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! Every other core crate depends on this one for its logging conventions,
//! configuration types, and event broadcasting.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
