#![cfg(feature = "desktop-shims")]

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::playback::{MediaPlayer, PlaybackState, PlayerPosition};
use bytes::Bytes;
use core_connection::ConnectionConfig;
use core_library::{Parent, ParentRepository, Segment, SegmentRepository};
use core_playback::PositionState;
use core_runtime::events::PlaybackEvent;
use core_service::{
    CoreConfig, CoreContext, CoreError, CoreEvent, EndpointCandidate, ServiceOptions,
};
use core_sync::ProgressSyncConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use uuid::Uuid;

macro_rules! eventually {
    ($cond:expr) => {{
        let mut ok = false;
        for _ in 0..300 {
            if $cond {
                ok = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(ok, "condition not met: {}", stringify!($cond));
    }};
}

/// Media server reachable only through the `lan` host.
#[derive(Default)]
struct FakeServer {
    urls: Mutex<Vec<String>>,
}

impl FakeServer {
    fn saw(&self, url: &str) -> bool {
        self.urls.lock().iter().any(|u| u == url)
    }
}

#[async_trait]
impl HttpClient for FakeServer {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.urls.lock().push(request.url.clone());
        if request.url.starts_with("http://wan") {
            return Err(BridgeError::OperationFailed("connection refused".to_string()));
        }

        let body = if request.url.ends_with("/identity") {
            Bytes::from_static(br#"{"machineIdentifier":"srv-1"}"#)
        } else {
            Bytes::new()
        };
        Ok(HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body,
        })
    }

    async fn download_stream(
        &self,
        request: HttpRequest,
    ) -> BridgeResult<Box<dyn tokio::io::AsyncRead + Send + Unpin>> {
        self.urls.lock().push(request.url.clone());
        Ok(Box::new(std::io::Cursor::new(b"segment-bytes".to_vec())))
    }
}

struct ScriptedPlayer {
    current: Mutex<(PlayerPosition, PlaybackState)>,
}

impl ScriptedPlayer {
    fn new() -> Self {
        Self {
            current: Mutex::new((
                PlayerPosition {
                    segment_index: 0,
                    offset_ms: 0,
                },
                PlaybackState::Paused,
            )),
        }
    }
}

#[async_trait]
impl MediaPlayer for ScriptedPlayer {
    async fn position(&self) -> BridgeResult<PlayerPosition> {
        Ok(self.current.lock().0)
    }

    async fn state(&self) -> BridgeResult<PlaybackState> {
        Ok(self.current.lock().1)
    }

    async fn seek_to(&self, segment_index: usize, offset_ms: u64) -> BridgeResult<()> {
        self.current.lock().0 = PlayerPosition {
            segment_index,
            offset_ms,
        };
        Ok(())
    }
}

struct TempDir(PathBuf);

impl TempDir {
    fn new() -> Self {
        let path = std::env::temp_dir().join(format!("opc-service-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path).unwrap();
        Self(path)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn config(dir: &Path, server: Arc<FakeServer>) -> CoreConfig {
    CoreConfig::builder()
        .database_path(dir.join("playback.db"))
        .cache_dir(dir.join("cache"))
        .client_identifier("test-device")
        .http_client(server)
        .file_system(Arc::new(TokioFileSystem::with_directories(
            dir.join("cache"),
            dir.to_path_buf(),
        )))
        .enable_background_reconcile(false)
        .build()
        .unwrap()
}

fn options() -> ServiceOptions {
    ServiceOptions::default()
        .with_connection(ConnectionConfig::default().with_race_timeout(Duration::from_secs(2)))
        .with_sync(
            ProgressSyncConfig::default()
                .with_commit_interval(Duration::from_millis(20))
                .with_retry(RetryPolicy::linear(50, Duration::from_millis(20))),
        )
}

async fn seed(core: &CoreContext) {
    core.parents().insert(&Parent::new("p1", "Book")).await.unwrap();
    for (index, duration) in [180_000i64, 200_000, 150_000].into_iter().enumerate() {
        core.segments()
            .insert(&Segment::new(
                format!("s{}", index),
                "p1",
                index as i64,
                duration,
                format!("/media/s{}", index),
            ))
            .await
            .unwrap();
    }
}

fn candidates() -> Vec<EndpointCandidate> {
    vec![
        EndpointCandidate::remote("http://wan.example.net"),
        EndpointCandidate::local("http://lan"),
    ]
}

#[tokio::test]
async fn test_session_resumes_seeks_and_pushes() {
    let dir = TempDir::new();
    let server = Arc::new(FakeServer::default());
    let core = CoreContext::bootstrap(config(&dir.0, server.clone()), options())
        .await
        .unwrap();
    seed(&core).await;

    let endpoint = core.connect(candidates()).await.unwrap();
    assert_eq!(endpoint.uri, "http://lan");
    assert_eq!(endpoint.server_id.as_deref(), Some("srv-1"));

    core.parents().commit_progress("s1", 2_000).await.unwrap();
    let mut events = core.events().subscribe();

    let player = Arc::new(ScriptedPlayer::new());
    let session = core.open_session("p1", player.clone()).await.unwrap();
    assert_eq!(session.position(), PositionState::new(1, 2_000));
    assert_eq!(player.position().await.unwrap().segment_index, 1);

    let back = session.seek_relative(-5_000).await.unwrap();
    assert_eq!(back, PositionState::new(0, 177_000));

    session.seek_to(0, 170_000).await.unwrap();
    let forward = session.seek_relative(20_000).await.unwrap();
    assert_eq!(forward, PositionState::new(1, 10_000));
    assert_eq!(session.absolute_position(), 190_000);
    eventually!(server.saw("http://lan/progress"));

    session.close().await;

    // The final flush is the last commit of the session.
    let parent = core.parents().find_by_id("p1").await.unwrap().unwrap();
    assert_eq!(parent.progress_ms, 190_000);
    assert_eq!(parent.current_segment_id.as_deref(), Some("s1"));

    let mut closed_at = None;
    loop {
        match events.try_recv() {
            Ok(CoreEvent::Playback(PlaybackEvent::SessionClosed { absolute_ms, .. })) => {
                closed_at = Some(absolute_ms);
            }
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
    assert_eq!(closed_at, Some(190_000));

    core.shutdown().await;
}

#[tokio::test]
async fn test_unknown_parent_is_not_found() {
    let dir = TempDir::new();
    let core = CoreContext::bootstrap(config(&dir.0, Arc::new(FakeServer::default())), options())
        .await
        .unwrap();

    let result = core
        .open_session("missing", Arc::new(ScriptedPlayer::new()))
        .await;

    assert!(matches!(result, Err(CoreError::NotFound { .. })));
    core.shutdown().await;
}

#[tokio::test]
async fn test_download_then_remove_round_trip() {
    let dir = TempDir::new();
    let server = Arc::new(FakeServer::default());
    let core = CoreContext::bootstrap(config(&dir.0, server.clone()), options())
        .await
        .unwrap();
    seed(&core).await;
    core.connect(candidates()).await.unwrap();

    let plan = core.download("p1").await.unwrap();
    assert_eq!(plan.queued.len(), 3);

    eventually!(core.parents().find_by_id("p1").await.unwrap().unwrap().cached);
    assert!(server.saw("http://lan/media/s2"));
    assert_eq!(core.reconcile().await.unwrap().mutations(), 0);

    core.remove_download("p1").await.unwrap();
    assert!(!core.parents().find_by_id("p1").await.unwrap().unwrap().cached);
    assert_eq!(core.reconcile().await.unwrap().mutations(), 0);

    core.shutdown().await;
}

#[tokio::test]
async fn test_pending_push_survives_restart() {
    let dir = TempDir::new();

    let first = CoreContext::bootstrap(config(&dir.0, Arc::new(FakeServer::default())), options())
        .await
        .unwrap();
    seed(&first).await;
    // No endpoint yet, so the push keeps failing and stays queued.
    first
        .sync_engine()
        .update_progress("s0", PlaybackState::Paused, 5_000, true)
        .await
        .unwrap();
    first.shutdown().await;
    drop(first);

    let server = Arc::new(FakeServer::default());
    let second = CoreContext::bootstrap(config(&dir.0, server.clone()), options())
        .await
        .unwrap();
    second.connect(candidates()).await.unwrap();

    eventually!(server.saw("http://lan/progress"));
    second.shutdown().await;
}
