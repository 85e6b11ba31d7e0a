//! Remote progress API

use crate::error::{Result, SyncError};
use crate::task::{ProgressReport, WatchTarget};
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use core_connection::ServerContext;
use core_runtime::logging::redact_url;
use std::sync::Arc;
use tracing::debug;

/// The remote authority for playback progress.
#[async_trait]
pub trait RemoteProgressApi: Send + Sync {
    async fn report_progress(&self, report: &ProgressReport) -> Result<()>;

    async fn mark_watched(&self, target: &WatchTarget) -> Result<()>;

    async fn mark_unwatched(&self, target: &WatchTarget) -> Result<()>;
}

/// Talks to the media server through the active endpoint.
///
/// - `POST /progress` with a [`ProgressReport`] body
/// - `POST /watched` and `POST /unwatched` with `key` and `type` query
///   parameters
pub struct HttpProgressApi {
    http_client: Arc<dyn HttpClient>,
    context: Arc<ServerContext>,
}

impl HttpProgressApi {
    pub fn new(http_client: Arc<dyn HttpClient>, context: Arc<ServerContext>) -> Self {
        Self {
            http_client,
            context,
        }
    }

    fn request(&self, method: HttpMethod, path: &str) -> Result<HttpRequest> {
        self.context
            .request(method, path)
            .map_err(|e| SyncError::Remote(e.to_string()))
    }

    async fn send(&self, request: HttpRequest) -> Result<()> {
        let url = redact_url(&request.url);
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|e| SyncError::Remote(e.to_string()))?;

        if !response.is_success() {
            return Err(SyncError::RemoteStatus {
                url,
                status: response.status,
            });
        }

        debug!(url = %url, status = response.status, "Remote progress call succeeded");
        Ok(())
    }

    async fn set_watched(&self, path: &str, target: &WatchTarget) -> Result<()> {
        let request = self
            .request(HttpMethod::Post, path)?
            .query("key", target.id())
            .query("type", target.kind());
        self.send(request).await
    }
}

#[async_trait]
impl RemoteProgressApi for HttpProgressApi {
    async fn report_progress(&self, report: &ProgressReport) -> Result<()> {
        let request = self
            .request(HttpMethod::Post, "/progress")?
            .json(report)
            .map_err(|e| SyncError::Remote(e.to_string()))?;
        self.send(request).await
    }

    async fn mark_watched(&self, target: &WatchTarget) -> Result<()> {
        self.set_watched("/watched", target).await
    }

    async fn mark_unwatched(&self, target: &WatchTarget) -> Result<()> {
        self.set_watched("/unwatched", target).await
    }
}
