use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Why a single probe or a server request failed.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Endpoint returned HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("Invalid identity response: {0}")]
    InvalidResponse(String),

    #[error("Probe timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("No active endpoint; run a connection race first")]
    NoActiveEndpoint,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl ConnectionError {
    pub fn is_transient(&self) -> bool {
        match self {
            ConnectionError::Unreachable(_) | ConnectionError::Timeout(_) => true,
            ConnectionError::HttpStatus { status } => *status >= 500 || *status == 429,
            ConnectionError::Bridge(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// One failed candidate inside an aggregate race failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    pub uri: String,
    pub message: String,
}

/// Terminal outcome of a race that selected no endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RaceError {
    #[error("No endpoint candidates supplied")]
    NoCandidates,

    #[error("All {} candidates failed: {}", .failures.len(), summarize(.failures))]
    AllFailed { failures: Vec<ProbeFailure> },

    #[error("Race timed out with {outstanding} probe(s) outstanding")]
    Timeout {
        outstanding: usize,
        /// Probes that had already failed when the deadline passed
        failures: Vec<ProbeFailure>,
    },
}

impl RaceError {
    /// Stable reason code used in events
    pub fn reason(&self) -> &'static str {
        match self {
            RaceError::NoCandidates => "no_candidates",
            RaceError::AllFailed { .. } => "all_failed",
            RaceError::Timeout { .. } => "timeout",
        }
    }
}

fn summarize(failures: &[ProbeFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.uri, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, ConnectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_failed_aggregates_messages() {
        let error = RaceError::AllFailed {
            failures: vec![
                ProbeFailure {
                    uri: "http://10.0.0.2:32400".to_string(),
                    message: "refused".to_string(),
                },
                ProbeFailure {
                    uri: "https://relay.example.net".to_string(),
                    message: "HTTP 503".to_string(),
                },
            ],
        };

        let rendered = error.to_string();
        assert!(rendered.starts_with("All 2 candidates failed"));
        assert!(rendered.contains("http://10.0.0.2:32400 (refused)"));
        assert!(rendered.contains("https://relay.example.net (HTTP 503)"));
        assert_eq!(error.reason(), "all_failed");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ConnectionError::HttpStatus { status: 503 }.is_transient());
        assert!(!ConnectionError::HttpStatus { status: 401 }.is_transient());
        assert!(!ConnectionError::NoActiveEndpoint.is_transient());
    }
}
