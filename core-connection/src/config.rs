//! Endpoint race configuration

use crate::error::{ConnectionError, Result};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Overall deadline for one race
    pub race_timeout: Duration,
    /// Deadline for a single identity probe
    pub probe_timeout: Duration,
    /// Path appended to a candidate URI when probing
    pub identity_path: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            race_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            identity_path: "/identity".to_string(),
        }
    }
}

impl ConnectionConfig {
    pub fn with_race_timeout(mut self, timeout: Duration) -> Self {
        self.race_timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_identity_path(mut self, path: impl Into<String>) -> Self {
        self.identity_path = path.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.race_timeout.is_zero() {
            return Err(ConnectionError::Config(
                "race_timeout must be greater than zero".to_string(),
            ));
        }

        if self.probe_timeout.is_zero() {
            return Err(ConnectionError::Config(
                "probe_timeout must be greater than zero".to_string(),
            ));
        }

        if !self.identity_path.starts_with('/') {
            return Err(ConnectionError::Config(format!(
                "identity_path must start with '/', got {:?}",
                self.identity_path
            )));
        }

        Ok(())
    }
}
