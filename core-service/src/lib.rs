//! Core service façade and bootstrap.
//!
//! This crate wires host-provided bridge implementations (HTTP, filesystem,
//! task scheduling, media player) into the playback core. Desktop apps
//! typically enable the `desktop-shims` feature (which depends on
//! `bridge-desktop`) and get a tokio-backed task queue persisted in the
//! library database; mobile hosts inject their platform scheduler through
//! [`CoreConfig`].
//!
//! ```ignore
//! use core_service::{CoreConfig, CoreContext, ServiceOptions};
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/playback.db")
//!     .cache_dir("/data/cache")
//!     .build()?;
//! let core = CoreContext::bootstrap(config, ServiceOptions::default()).await?;
//! core.connect(vec![EndpointCandidate::local("http://192.168.1.10:32400")]).await?;
//!
//! let session = core.open_session("book-1", player).await?;
//! session.seek_relative(-30_000).await?;
//! session.close().await;
//! core.shutdown().await;
//! ```

pub mod context;
pub mod error;
pub mod session;

pub use context::{CoreContext, ServiceOptions};
pub use error::{CoreError, Result};
pub use session::PlaybackSession;

pub use core_connection::{Endpoint, EndpointCandidate};
pub use core_runtime::config::CoreConfig;
pub use core_runtime::events::{CoreEvent, EventBus};
pub use core_sync::WatchTarget;
