//! Explicit server context
//!
//! Carries everything needed to address the media server: the active
//! endpoint chosen by the arbiter, the access token and the client
//! identifier. Components receive it by `Arc` instead of reaching for a
//! process-wide singleton.

use crate::endpoint::{ActiveEndpoint, Endpoint};
use crate::error::{ConnectionError, Result};
use bridge_traits::http::{HttpMethod, HttpRequest};
use parking_lot::RwLock;
use std::sync::Arc;

pub struct ServerContext {
    active: Arc<ActiveEndpoint>,
    access_token: RwLock<Option<String>>,
    client_identifier: String,
}

impl ServerContext {
    pub fn new(active: Arc<ActiveEndpoint>, client_identifier: impl Into<String>) -> Self {
        Self {
            active,
            access_token: RwLock::new(None),
            client_identifier: client_identifier.into(),
        }
    }

    pub fn with_access_token(self, token: impl Into<String>) -> Self {
        *self.access_token.write() = Some(token.into());
        self
    }

    /// Replace or clear the token used for subsequent requests
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    pub fn client_identifier(&self) -> &str {
        &self.client_identifier
    }

    pub fn active_endpoint(&self) -> &Arc<ActiveEndpoint> {
        &self.active
    }

    /// The current endpoint, or `NoActiveEndpoint` before the first race
    pub fn endpoint(&self) -> Result<Endpoint> {
        self.active.current().ok_or(ConnectionError::NoActiveEndpoint)
    }

    /// Build an authorized request for a server-relative path.
    pub fn request(&self, method: HttpMethod, path: &str) -> Result<HttpRequest> {
        let endpoint = self.endpoint()?;
        let mut request = HttpRequest::new(method, endpoint.url(path))
            .header("Accept", "application/json")
            .header("X-Client-Identifier", self.client_identifier.clone());

        if let Some(token) = self.access_token.read().as_ref() {
            request = request.bearer_token(token.clone());
        }

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_request_requires_active_endpoint() {
        let context = ServerContext::new(Arc::new(ActiveEndpoint::new()), "device-1");

        assert!(matches!(
            context.request(HttpMethod::Get, "/progress"),
            Err(ConnectionError::NoActiveEndpoint)
        ));
    }

    #[test]
    fn test_request_is_authorized() {
        let active = Arc::new(ActiveEndpoint::new());
        active.publish(Endpoint {
            uri: "http://10.0.0.2:32400".to_string(),
            is_local: true,
            server_id: None,
            latency: Duration::from_millis(2),
        });
        let context = ServerContext::new(active, "device-1").with_access_token("secret");

        let request = context.request(HttpMethod::Post, "/progress").unwrap();
        assert_eq!(request.url, "http://10.0.0.2:32400/progress");
        assert_eq!(
            request.headers.get("Authorization"),
            Some(&"Bearer secret".to_string())
        );
        assert_eq!(
            request.headers.get("X-Client-Identifier"),
            Some(&"device-1".to_string())
        );

        context.set_access_token(None);
        let request = context.request(HttpMethod::Get, "identity").unwrap();
        assert!(!request.headers.contains_key("Authorization"));
    }
}
