//! # Core Configuration Module
//!
//! Builder-based configuration for the playback core.
//!
//! ## Overview
//!
//! `CoreConfig` holds the host bridges and top-level settings required to
//! assemble a core context. The builder validates eagerly and fails with
//! actionable messages when a capability is missing.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - endpoint probing, progress pushes, segment downloads
//! - `FileSystemAccess` - segment cache
//!
//! When the `desktop-shims` feature is enabled, desktop defaults for both are
//! injected automatically if not provided.
//!
//! ## Optional Dependencies
//!
//! - `NetworkMonitor` - defers network-bound jobs while offline
//! - `TaskQueue` - host scheduler for remote pushes (desktop: tokio queue)
//! - `Clock` - time source (default: system clock)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/playback.db")
//!     .cache_dir("/path/to/cache")
//!     .client_identifier("device-1234")
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, FileSystemAccess, HttpClient, NetworkMonitor, SystemClock, TaskQueue};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_CLIENT_IDENTIFIER: &str = "offline-playback-core";

/// Core configuration.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// Directory under which cached segments are stored
    pub cache_dir: PathBuf,

    /// Identifier sent to the media server with every request
    pub client_identifier: String,

    pub http_client: Arc<dyn HttpClient>,

    pub file_system: Arc<dyn FileSystemAccess>,

    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,

    /// Host task queue; when absent the service builds its own
    pub task_queue: Option<Arc<dyn TaskQueue>>,

    pub clock: Arc<dyn Clock>,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,

    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("cache_dir", &self.cache_dir)
            .field("client_identifier", &self.client_identifier)
            .field("http_client", &"HttpClient { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field(
                "network_monitor",
                &self
                    .network_monitor
                    .as_ref()
                    .map(|_| "NetworkMonitor { ... }"),
            )
            .field(
                "task_queue",
                &self.task_queue.as_ref().map(|_| "TaskQueue { ... }"),
            )
            .field("event_buffer_size", &self.event_buffer_size)
            .field("features", &self.features)
            .finish()
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Run cache reconciliation periodically in the background
    pub enable_background_reconcile: bool,

    /// Hold network-bound jobs until connected (requires NetworkMonitor)
    pub enable_network_awareness: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_background_reconcile: true,
            enable_network_awareness: false,
        }
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Paths are not empty
    /// - The client identifier is not blank
    /// - Feature flags are consistent with available bridges
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        if self.client_identifier.trim().is_empty() {
            return Err(Error::Config(
                "Client identifier cannot be empty".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.features.enable_network_awareness && self.network_monitor.is_none() {
            return Err(Error::Config(
                "Network awareness enabled but no NetworkMonitor provided. \
                 Disable the feature or inject a NetworkMonitor implementation."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::new()
        .map_err(|e| Error::Internal(format!("Failed to create default HttpClient: {}", e)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required for probing and syncing. \
                 Desktop: ensure the 'desktop-shims' feature is enabled. \
                 Mobile: inject the platform-native HTTP adapter."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system(
    database_path: &std::path::Path,
    cache_dir: &std::path::Path,
) -> Result<Arc<dyn FileSystemAccess>> {
    let data_dir = database_path
        .parent()
        .map(|parent| parent.to_path_buf())
        .unwrap_or_else(|| cache_dir.to_path_buf());
    Ok(Arc::new(bridge_desktop::TokioFileSystem::with_directories(
        cache_dir.to_path_buf(),
        data_dir,
    )))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system(
    _database_path: &std::path::Path,
    _cache_dir: &std::path::Path,
) -> Result<Arc<dyn FileSystemAccess>> {
    Err(Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess implementation is required for the segment cache. \
                 Desktop: ensure the 'desktop-shims' feature is enabled. \
                 Mobile: inject a sandboxed file system adapter."
            .to_string(),
    })
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    client_identifier: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    task_queue: Option<Arc<dyn TaskQueue>>,
    clock: Option<Arc<dyn Clock>>,
    event_buffer_size: Option<usize>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the database file path (required).
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the cache directory (required).
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    pub fn client_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.client_identifier = Some(identifier.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn network_monitor(mut self, monitor: Arc<dyn NetworkMonitor>) -> Self {
        self.network_monitor = Some(monitor);
        self
    }

    pub fn task_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.task_queue = Some(queue);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn enable_background_reconcile(mut self, enabled: bool) -> Self {
        self.features.enable_background_reconcile = enabled;
        self
    }

    pub fn enable_network_awareness(mut self, enabled: bool) -> Self {
        self.features.enable_network_awareness = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - `Error::Config` when a required path is missing or a setting is invalid
    /// - `Error::CapabilityMissing` when a required bridge has no implementation
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system(&database_path, &cache_dir)?,
        };

        let config = CoreConfig {
            database_path,
            cache_dir,
            client_identifier: self
                .client_identifier
                .unwrap_or_else(|| DEFAULT_CLIENT_IDENTIFIER.to_string()),
            http_client,
            file_system,
            network_monitor: self.network_monitor,
            task_queue: self.task_queue,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
            features: self.features,
        };

        config.validate()?;
        Ok(config)
    }
}
