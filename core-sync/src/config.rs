//! Progress sync configuration

use bridge_traits::http::RetryPolicy;
use std::time::Duration;

/// Tuning for [`ProgressSyncEngine`](crate::ProgressSyncEngine) and
/// [`ProgressCommitLoop`](crate::ProgressCommitLoop).
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSyncConfig {
    /// Non-manual updates between remote pushes (default: 5)
    pub push_interval_ticks: u64,

    /// Factor applied to segment durations in remote pushes (default: 2.0).
    /// The remote marks items watched on its own once reported progress
    /// passes a fraction of the reported duration.
    pub duration_multiplier: f64,

    /// Remaining parent time below which a paused or stopped parent counts
    /// as finished (default: 30s)
    pub finished_window_ms: u64,

    /// Slack before the end of a segment that already counts as the end
    /// (default: 1ms)
    pub finish_epsilon_ms: u64,

    /// Retry policy handed to the task queue (default: linear, 5 attempts,
    /// 2s step)
    pub retry: RetryPolicy,

    /// Period of the local commit loop (default: 1s)
    pub commit_interval: Duration,
}

impl Default for ProgressSyncConfig {
    fn default() -> Self {
        Self {
            push_interval_ticks: 5,
            duration_multiplier: 2.0,
            finished_window_ms: 30_000,
            finish_epsilon_ms: 1,
            retry: RetryPolicy::linear(5, Duration::from_secs(2)),
            commit_interval: Duration::from_secs(1),
        }
    }
}

impl ProgressSyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_push_interval_ticks(mut self, ticks: u64) -> Self {
        self.push_interval_ticks = ticks;
        self
    }

    pub fn with_duration_multiplier(mut self, multiplier: f64) -> Self {
        self.duration_multiplier = multiplier;
        self
    }

    pub fn with_finished_window(mut self, window_ms: u64) -> Self {
        self.finished_window_ms = window_ms;
        self
    }

    pub fn with_finish_epsilon(mut self, epsilon_ms: u64) -> Self {
        self.finish_epsilon_ms = epsilon_ms;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_commit_interval(mut self, interval: Duration) -> Self {
        self.commit_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.push_interval_ticks == 0 {
            return Err("push_interval_ticks must be at least 1".to_string());
        }

        if !self.duration_multiplier.is_finite() || self.duration_multiplier <= 0.0 {
            return Err(format!(
                "duration_multiplier must be positive, got {}",
                self.duration_multiplier
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }

        if self.commit_interval.is_zero() {
            return Err("commit_interval must be greater than zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::http::Backoff;

    #[test]
    fn test_defaults() {
        let config = ProgressSyncConfig::default();

        assert_eq!(config.push_interval_ticks, 5);
        assert_eq!(config.duration_multiplier, 2.0);
        assert_eq!(config.finished_window_ms, 30_000);
        assert_eq!(config.retry.backoff, Backoff::Linear);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ProgressSyncConfig::new()
            .with_push_interval_ticks(0)
            .validate()
            .is_err());
        assert!(ProgressSyncConfig::new()
            .with_duration_multiplier(0.0)
            .validate()
            .is_err());
        assert!(ProgressSyncConfig::new()
            .with_duration_multiplier(f64::NAN)
            .validate()
            .is_err());
        assert!(ProgressSyncConfig::new()
            .with_commit_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
