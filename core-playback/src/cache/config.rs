//! Cache configuration

use std::time::Duration;

/// Configuration for segment downloads and reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Directory under the host cache dir holding all cached segments
    /// (default: "offline_segments")
    pub cache_directory: String,

    /// Extension of complete segment files (default: "cache")
    pub file_extension: String,

    /// Number of concurrent downloads allowed (default: 3)
    pub max_concurrent_downloads: usize,

    /// Timeout for a single download attempt (default: 300s)
    pub download_timeout: Duration,

    /// Attempts per segment before giving up (default: 3)
    pub max_retry_attempts: u32,

    /// Delay step between attempts, multiplied by the attempt number
    /// (default: 500ms)
    pub retry_delay: Duration,

    /// Period of background reconciliation (default: 15 minutes)
    pub reconcile_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_directory: "offline_segments".to_string(),
            file_extension: "cache".to_string(),
            max_concurrent_downloads: 3,
            download_timeout: Duration::from_secs(300),
            max_retry_attempts: 3,
            retry_delay: Duration::from_millis(500),
            reconcile_interval: Duration::from_secs(15 * 60),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_directory(mut self, dir: impl Into<String>) -> Self {
        self.cache_directory = dir.into();
        self
    }

    pub fn with_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }

    pub fn with_max_concurrent_downloads(mut self, count: usize) -> Self {
        self.max_concurrent_downloads = count;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.max_retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_directory.trim().is_empty() {
            return Err("cache_directory cannot be empty".to_string());
        }

        if self.cache_directory.contains(['/', '\\']) || self.cache_directory == ".." {
            return Err("cache_directory must be a single path component".to_string());
        }

        if self.file_extension.is_empty()
            || !self
                .file_extension
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        {
            return Err(format!(
                "file_extension must be non-empty ASCII alphanumerics, got {:?}",
                self.file_extension
            ));
        }

        if self.max_concurrent_downloads == 0 {
            return Err("max_concurrent_downloads must be at least 1".to_string());
        }

        if self.max_retry_attempts == 0 {
            return Err("max_retry_attempts must be at least 1".to_string());
        }

        if self.download_timeout.is_zero() {
            return Err("download_timeout must be greater than zero".to_string());
        }

        if self.reconcile_interval.is_zero() {
            return Err("reconcile_interval must be greater than zero".to_string());
        }

        Ok(())
    }
}
