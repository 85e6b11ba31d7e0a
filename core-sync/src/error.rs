use bridge_traits::error::BridgeError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Writing progress to the local store failed; nothing was pushed.
    #[error("Local progress commit failed: {0}")]
    LocalCommit(#[source] LibraryError),

    #[error("Task queue error: {0}")]
    Queue(#[source] BridgeError),

    #[error("Remote request failed: {0}")]
    Remote(String),

    #[error("{url} returned status {status}")]
    RemoteStatus { url: String, status: u16 },

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid sync configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether running the same request again may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Remote(_) => true,
            SyncError::RemoteStatus { status, .. } => *status >= 500 || *status == 429,
            SyncError::Queue(e) => e.is_transient(),
            _ => false,
        }
    }

    pub(crate) fn not_found(entity_type: &str, id: &str) -> Self {
        SyncError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
