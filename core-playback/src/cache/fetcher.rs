//! Segment media sources

use crate::error::{PlaybackError, Result};
use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod};
use core_connection::ServerContext;
use core_library::Segment;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Opens a byte stream for a segment's media.
#[async_trait]
pub trait SegmentFetcher: Send + Sync {
    async fn open(&self, segment: &Segment) -> Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// Streams `segment.media_path` from the active server endpoint.
pub struct HttpSegmentFetcher {
    http_client: Arc<dyn HttpClient>,
    context: Arc<ServerContext>,
}

impl HttpSegmentFetcher {
    pub fn new(http_client: Arc<dyn HttpClient>, context: Arc<ServerContext>) -> Self {
        Self {
            http_client,
            context,
        }
    }
}

#[async_trait]
impl SegmentFetcher for HttpSegmentFetcher {
    async fn open(&self, segment: &Segment) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        let request = self
            .context
            .request(HttpMethod::Get, &segment.media_path)
            .map_err(|e| PlaybackError::Network(e.to_string()))?
            .header("Accept", "application/octet-stream");

        self.http_client
            .download_stream(request)
            .await
            .map_err(|e| PlaybackError::Network(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::http::{HttpRequest, HttpResponse};
    use core_connection::{ActiveEndpoint, Endpoint};
    use mockall::mock;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
            async fn download_stream(
                &self,
                request: HttpRequest,
            ) -> BridgeResult<Box<dyn tokio::io::AsyncRead + Send + Unpin>>;
        }
    }

    fn context(connected: bool) -> Arc<ServerContext> {
        let active = if connected {
            ActiveEndpoint::pinned(Endpoint {
                uri: "http://10.0.0.2:32400".to_string(),
                is_local: true,
                server_id: None,
                latency: Duration::from_millis(1),
            })
        } else {
            ActiveEndpoint::new()
        };
        Arc::new(ServerContext::new(Arc::new(active), "device-1").with_access_token("t0k"))
    }

    fn segment() -> Segment {
        Segment::new("s1", "p1", 0, 1_000, "/library/parts/s1/file.mp3")
    }

    #[tokio::test]
    async fn test_open_streams_from_active_endpoint() {
        let mut mock = MockHttpClient::new();
        mock.expect_download_stream()
            .withf(|req| {
                req.url == "http://10.0.0.2:32400/library/parts/s1/file.mp3"
                    && req.headers.get("Authorization") == Some(&"Bearer t0k".to_string())
            })
            .times(1)
            .returning(|_| Ok(Box::new(std::io::Cursor::new(b"audio".to_vec()))));

        let fetcher = HttpSegmentFetcher::new(Arc::new(mock), context(true));
        let mut stream = fetcher.open(&segment()).await.unwrap();
        let mut body = Vec::new();
        stream.read_to_end(&mut body).await.unwrap();

        assert_eq!(body, b"audio");
    }

    #[tokio::test]
    async fn test_open_without_endpoint_is_network_error() {
        let mut mock = MockHttpClient::new();
        mock.expect_download_stream().times(0);

        let fetcher = HttpSegmentFetcher::new(Arc::new(mock), context(false));
        let result = fetcher.open(&segment()).await;

        assert!(matches!(result, Err(PlaybackError::Network(_))));
    }

    #[tokio::test]
    async fn test_transport_failure_is_transient() {
        let mut mock = MockHttpClient::new();
        mock.expect_download_stream()
            .returning(|_| Err(BridgeError::OperationFailed("reset by peer".to_string())));

        let fetcher = HttpSegmentFetcher::new(Arc::new(mock), context(true));
        let err = fetcher.open(&segment()).await.err().unwrap();

        assert!(err.is_transient());
    }
}
