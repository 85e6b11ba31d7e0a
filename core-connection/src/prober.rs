//! Endpoint probing
//!
//! A probe answers one question: does this candidate speak for the server
//! right now? The HTTP prober requests the identity document and accepts any
//! 2xx response whose body is a JSON object.

use crate::config::ConnectionConfig;
use crate::endpoint::{Endpoint, EndpointCandidate};
use crate::error::{ConnectionError, Result};
use async_trait::async_trait;
use bridge_traits::error::BridgeError;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use core_runtime::logging::redact_url;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Checks whether a candidate is reachable.
#[async_trait]
pub trait EndpointProber: Send + Sync {
    async fn probe(&self, candidate: &EndpointCandidate) -> Result<Endpoint>;
}

/// Probes `GET {uri}{identity_path}` through the host HTTP client.
pub struct HttpEndpointProber {
    http_client: Arc<dyn HttpClient>,
    identity_path: String,
    probe_timeout: Duration,
    client_identifier: String,
}

impl HttpEndpointProber {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        config: &ConnectionConfig,
        client_identifier: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            identity_path: config.identity_path.clone(),
            probe_timeout: config.probe_timeout,
            client_identifier: client_identifier.into(),
        }
    }

    fn identity_url(&self, candidate: &EndpointCandidate) -> String {
        format!(
            "{}{}",
            candidate.uri.trim_end_matches('/'),
            self.identity_path
        )
    }
}

/// Pull a server identifier out of an identity document.
///
/// Accepts both a flat object and one wrapped in a single container object.
fn server_id(body: &serde_json::Value) -> Option<String> {
    const KEYS: &[&str] = &["machineIdentifier", "serverId", "id"];

    let lookup = |value: &serde_json::Value| {
        KEYS.iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
    };

    lookup(body).or_else(|| {
        body.as_object()
            .filter(|map| map.len() == 1)
            .and_then(|map| map.values().next())
            .and_then(lookup)
    })
}

#[async_trait]
impl EndpointProber for HttpEndpointProber {
    async fn probe(&self, candidate: &EndpointCandidate) -> Result<Endpoint> {
        let url = self.identity_url(candidate);
        let request = HttpRequest::new(HttpMethod::Get, url.clone())
            .header("Accept", "application/json")
            .header("X-Client-Identifier", self.client_identifier.clone())
            .timeout(self.probe_timeout);

        let started = Instant::now();
        let response = tokio::time::timeout(self.probe_timeout, self.http_client.execute(request))
            .await
            .map_err(|_| ConnectionError::Timeout(self.probe_timeout))?
            .map_err(|e| match e {
                BridgeError::Timeout(after) => ConnectionError::Timeout(after),
                other => ConnectionError::Unreachable(other.to_string()),
            })?;
        let latency = started.elapsed();

        if !response.is_success() {
            return Err(ConnectionError::HttpStatus {
                status: response.status,
            });
        }

        let body: serde_json::Value = response
            .json()
            .map_err(|e| ConnectionError::InvalidResponse(e.to_string()))?;
        if !body.is_object() {
            return Err(ConnectionError::InvalidResponse(
                "identity document is not a JSON object".to_string(),
            ));
        }

        debug!(
            url = %redact_url(&url),
            latency_ms = latency.as_millis() as u64,
            "Identity probe succeeded"
        );

        Ok(Endpoint {
            uri: candidate.uri.clone(),
            is_local: candidate.is_local,
            server_id: server_id(&body),
            latency,
        })
    }
}
