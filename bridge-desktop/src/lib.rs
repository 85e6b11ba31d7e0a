//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `FileSystemAccess` using `tokio::fs`
//! - `TaskQueue` using Tokio workers, optionally persisted through a `TaskStore`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TokioFileSystem, TokioTaskQueue};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let fs = TokioFileSystem::new();
//!     let queue = TokioTaskQueue::new();
//!     Ok(())
//! }
//! ```

mod background;
mod filesystem;
mod http;

pub use background::TokioTaskQueue;
pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
