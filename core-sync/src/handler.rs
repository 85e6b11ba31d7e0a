//! Executes queued sync tasks against the remote API.

use crate::remote::RemoteProgressApi;
use crate::task::SyncTask;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Queue-facing adapter: decodes a task payload and runs it.
///
/// Failures that may clear up (network errors, 5xx, 429) come back as
/// [`BridgeError::OperationFailed`] so the queue's retry policy applies.
/// Client errors and payloads that do not decode are
/// [`BridgeError::Rejected`] and fail on the first attempt.
#[derive(Clone)]
pub struct SyncTaskHandler {
    api: Arc<dyn RemoteProgressApi>,
}

impl SyncTaskHandler {
    pub fn new(api: Arc<dyn RemoteProgressApi>) -> Self {
        Self { api }
    }

    #[instrument(skip(self, payload))]
    pub async fn handle(&self, payload: serde_json::Value) -> BridgeResult<()> {
        let task = SyncTask::from_payload(payload)
            .map_err(|e| BridgeError::Rejected(format!("Undecodable sync task: {}", e)))?;

        self.execute(&task).await.map_err(|e| {
            if e.is_transient() {
                BridgeError::OperationFailed(e.to_string())
            } else {
                warn!(error = %e, "Sync task rejected, not retrying");
                BridgeError::Rejected(e.to_string())
            }
        })
    }

    pub async fn execute(&self, task: &SyncTask) -> crate::Result<()> {
        match task {
            SyncTask::ReportProgress(report) => {
                debug!(segment_id = %report.segment_id, offset_ms = report.offset_millis, "Pushing progress");
                self.api.report_progress(report).await
            }
            SyncTask::MarkWatched { target } => {
                debug!(target = %target, "Marking watched");
                self.api.mark_watched(target).await
            }
            SyncTask::MarkUnwatched { target } => {
                debug!(target = %target, "Marking unwatched");
                self.api.mark_unwatched(target).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::task::{ProgressReport, WatchTarget};
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        Api {}

        #[async_trait]
        impl RemoteProgressApi for Api {
            async fn report_progress(&self, report: &ProgressReport) -> crate::Result<()>;
            async fn mark_watched(&self, target: &WatchTarget) -> crate::Result<()>;
            async fn mark_unwatched(&self, target: &WatchTarget) -> crate::Result<()>;
        }
    }

    #[tokio::test]
    async fn test_dispatches_by_variant() {
        let mut api = MockApi::new();
        api.expect_mark_watched()
            .withf(|target| *target == WatchTarget::Segment("s1".to_string()))
            .times(1)
            .returning(|_| Ok(()));
        api.expect_report_progress().times(0);

        let payload = serde_json::to_value(SyncTask::MarkWatched {
            target: WatchTarget::Segment("s1".to_string()),
        })
        .unwrap();

        SyncTaskHandler::new(Arc::new(api)).handle(payload).await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_failure_surfaces_as_retryable() {
        let mut api = MockApi::new();
        api.expect_mark_unwatched()
            .returning(|_| Err(SyncError::Remote("offline".to_string())));

        let payload = serde_json::to_value(SyncTask::MarkUnwatched {
            target: WatchTarget::Parent("p1".to_string()),
        })
        .unwrap();
        let err = SyncTaskHandler::new(Arc::new(api))
            .handle(payload)
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_garbage_payload_is_rejected() {
        let handler = SyncTaskHandler::new(Arc::new(MockApi::new()));

        let err = handler
            .handle(serde_json::json!({ "task": "rewind" }))
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Rejected(msg) if msg.contains("Undecodable")));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retryable() {
        let mut api = MockApi::new();
        api.expect_report_progress().times(1).returning(|_| {
            Err(SyncError::RemoteStatus {
                url: "https://media.example.net/progress".to_string(),
                status: 401,
            })
        });

        let payload = serde_json::to_value(SyncTask::ReportProgress(ProgressReport {
            segment_id: "s1".to_string(),
            offset_millis: 1_000,
            duration_millis: 2_000,
            playback_state: bridge_traits::playback::PlaybackState::Playing,
            parent_container_key: "p1".to_string(),
            queue_item_id: None,
            timestamp: 0,
        }))
        .unwrap();
        let err = SyncTaskHandler::new(Arc::new(api))
            .handle(payload)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Rejected(_)));
        assert!(!err.is_transient());
    }
}
