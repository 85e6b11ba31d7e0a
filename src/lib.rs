//! Workspace facade crate.
//!
//! Host applications can depend on `opc-workspace` and enable the documented
//! features instead of wiring `core-service` and the desktop bridges by hand.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
