//! Endpoint candidates and the shared active endpoint

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;

/// A server address that may be reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointCandidate {
    pub uri: String,
    /// Same network as the client; probed first
    pub is_local: bool,
}

impl EndpointCandidate {
    pub fn local(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            is_local: true,
        }
    }

    pub fn remote(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            is_local: false,
        }
    }
}

/// A candidate that answered its identity probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub uri: String,
    pub is_local: bool,
    /// Identifier reported by the server, when present
    pub server_id: Option<String>,
    pub latency: Duration,
}

impl Endpoint {
    /// Join a server-relative path onto the endpoint URI
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.uri.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// The endpoint all server traffic goes to.
///
/// Written only by the connection arbiter, once per successful race. Readers
/// either sample [`current`](Self::current) or follow changes through
/// [`subscribe`](Self::subscribe).
#[derive(Debug)]
pub struct ActiveEndpoint {
    sender: watch::Sender<Option<Endpoint>>,
}

impl Default for ActiveEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveEndpoint {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    /// Start with `endpoint` already selected, for hosts that know their
    /// server address and skip racing.
    pub fn pinned(endpoint: Endpoint) -> Self {
        let (sender, _) = watch::channel(Some(endpoint));
        Self { sender }
    }

    pub fn current(&self) -> Option<Endpoint> {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Endpoint>> {
        self.sender.subscribe()
    }

    pub(crate) fn publish(&self, endpoint: Endpoint) {
        self.sender.send_replace(Some(endpoint));
    }
}
