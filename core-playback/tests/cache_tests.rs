//! End-to-end tests for downloads and reconciliation against a real
//! directory and an in-memory database.

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use core_library::db::create_test_pool;
use core_library::{
    Parent, ParentRepository, Segment, SegmentLocks, SegmentRepository, SqliteParentRepository,
    SqliteSegmentRepository,
};
use core_playback::cache::{
    CacheConfig, CacheLayout, CacheManager, CacheReconciler, SegmentFetcher,
};
use core_playback::Result;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};

macro_rules! eventually {
    ($cond:expr) => {{
        let mut reached = false;
        for _ in 0..300 {
            if $cond {
                reached = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(reached, "condition not reached: {}", stringify!($cond));
    }};
}

/// Never yields a byte.
struct Stalled;

impl AsyncRead for Stalled {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Pending
    }
}

struct TestFetcher {
    stall: bool,
    opened: Arc<AtomicUsize>,
}

#[async_trait]
impl SegmentFetcher for TestFetcher {
    async fn open(&self, segment: &Segment) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.stall {
            return Ok(Box::new(Stalled));
        }
        Ok(Box::new(std::io::Cursor::new(
            format!("bytes of {}", segment.id).into_bytes(),
        )))
    }
}

struct Harness {
    manager: Arc<CacheManager>,
    reconciler: Arc<CacheReconciler>,
    segments: Arc<SqliteSegmentRepository>,
    parents: Arc<SqliteParentRepository>,
    layout: CacheLayout,
    opened: Arc<AtomicUsize>,
    bus: EventBus,
    dir: PathBuf,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

async fn harness(stall: bool) -> Harness {
    let dir = std::env::temp_dir().join(format!("opc-cache-it-{}", uuid::Uuid::new_v4()));
    let pool = create_test_pool().await.unwrap();
    let segments = Arc::new(SqliteSegmentRepository::new(pool.clone()));
    let parents = Arc::new(SqliteParentRepository::new(pool));

    for (parent, count) in [("album", 4), ("other", 2)] {
        parents.insert(&Parent::new(parent, parent)).await.unwrap();
        for index in 0..count {
            segments
                .insert(&Segment::new(
                    format!("{}-{}", parent, index),
                    parent,
                    index,
                    90_000,
                    format!("/library/parts/{}/{}", parent, index),
                ))
                .await
                .unwrap();
        }
    }

    let config = CacheConfig::default()
        .with_max_concurrent_downloads(2)
        .with_retry(2, Duration::from_millis(5));
    let layout = CacheLayout::new(&dir, &config).unwrap();
    let fs = Arc::new(TokioFileSystem::with_directories(dir.clone(), dir.clone()));
    let locks = Arc::new(SegmentLocks::new());
    let bus = EventBus::new(256);
    let opened = Arc::new(AtomicUsize::new(0));

    let reconciler = Arc::new(CacheReconciler::new(
        layout.clone(),
        segments.clone(),
        parents.clone(),
        fs.clone(),
        locks.clone(),
        bus.clone(),
    ));
    let manager = CacheManager::new(
        config,
        layout.clone(),
        segments.clone(),
        parents.clone(),
        fs,
        Arc::new(TestFetcher {
            stall,
            opened: opened.clone(),
        }),
        locks,
        bus.clone(),
    )
    .unwrap()
    .with_reconciler(reconciler.clone());

    Harness {
        manager: Arc::new(manager),
        reconciler,
        segments,
        parents,
        layout,
        opened,
        bus,
        dir,
    }
}

impl Harness {
    async fn parent_cached(&self, id: &str) -> bool {
        self.parents.find_by_id(id).await.unwrap().unwrap().cached
    }

    async fn segment_cached(&self, id: &str) -> bool {
        self.segments.find_by_id(id).await.unwrap().unwrap().cached
    }

    async fn wait_reconciled(&self, events: &mut tokio::sync::broadcast::Receiver<CoreEvent>) {
        let wait = async {
            loop {
                if let Ok(CoreEvent::Cache(CacheEvent::Reconciled { .. })) = events.recv().await {
                    break;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("no reconciliation pass");
    }

    fn files_in(&self, parent: &str) -> Vec<String> {
        match std::fs::read_dir(self.layout.parent_dir(parent).unwrap()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[tokio::test]
async fn test_drained_group_triggers_reconciliation() {
    let h = harness(false).await;
    // Drift elsewhere in the library: flagged cached, no file.
    h.segments.set_cached("other-0", true).await.unwrap();

    let plan = h.manager.start_download("album").await.unwrap();
    assert_eq!(plan.queued.len(), 4);

    eventually!(!h.segment_cached("other-0").await);
    assert!(h.parent_cached("album").await);
    assert!(!h.parent_cached("other").await);
    assert_eq!(h.files_in("album").len(), 4);
}

#[tokio::test]
async fn test_external_deletion_heals_and_redownloads_only_missing() {
    let h = harness(false).await;
    let mut events = h.bus.subscribe();
    h.manager.start_download("album").await.unwrap();
    h.wait_reconciled(&mut events).await;
    assert!(h.parent_cached("album").await);

    std::fs::remove_file(h.layout.segment_path("album", "album-2").unwrap()).unwrap();

    let first = h.reconciler.reconcile().await.unwrap();
    assert_eq!(first.marked_uncached, 1);
    assert_eq!(first.parents_updated, 1);
    assert!(!h.parent_cached("album").await);

    let second = h.reconciler.reconcile().await.unwrap();
    assert_eq!(second.mutations(), 0);

    let opened_before = h.opened.load(Ordering::SeqCst);
    let plan = h.manager.start_download("album").await.unwrap();
    assert_eq!(plan.queued, vec!["album-2".to_string()]);
    assert_eq!(plan.skipped.len(), 3);

    eventually!(h.parent_cached("album").await);
    assert_eq!(h.opened.load(Ordering::SeqCst), opened_before + 1);
}

#[tokio::test]
async fn test_stale_file_is_replaced() {
    let h = harness(false).await;
    let path = h.layout.segment_path("other", "other-1").unwrap();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"truncated").unwrap();

    let plan = h.manager.start_download("other").await.unwrap();
    assert_eq!(plan.queued.len(), 2);

    eventually!(h.parent_cached("other").await);
    assert_eq!(std::fs::read(&path).unwrap(), b"bytes of other-1");
}

#[tokio::test]
async fn test_cancel_aborts_and_cleans_partials() {
    let h = harness(true).await;

    let plan = h.manager.start_download("album").await.unwrap();
    assert_eq!(plan.queued.len(), 4);

    // Two permits: two downloads stream, two wait.
    eventually!(h.opened.load(Ordering::SeqCst) == 2);
    eventually!(h.files_in("album").len() == 2);

    let second = h.manager.start_download("album").await.unwrap();
    assert_eq!(second.already_downloading.len(), 4);
    assert!(second.queued.is_empty());

    assert_eq!(h.manager.cancel("album"), 4);
    assert_eq!(h.manager.cancel("album"), 0);

    eventually!(h.files_in("album").is_empty());
    assert!(h.segments.find_cached().await.unwrap().is_empty());
    assert_eq!(h.opened.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_remove_then_reconcile_is_stable() {
    let h = harness(false).await;
    h.manager.start_download("album").await.unwrap();
    eventually!(h.parent_cached("album").await);

    h.manager.remove("album").await.unwrap();
    assert!(h.files_in("album").is_empty());
    assert!(!h.parent_cached("album").await);

    let report = h.reconciler.reconcile().await.unwrap();
    assert_eq!(report.marked_cached, 0);
    assert_eq!(report.marked_uncached, 0);
}

#[tokio::test]
async fn test_reconcile_during_downloads_never_uncaches() {
    let h = harness(false).await;

    let passes = {
        let reconciler = h.reconciler.clone();
        tokio::spawn(async move {
            let mut uncached = 0;
            for _ in 0..50 {
                uncached += reconciler.reconcile().await.unwrap().marked_uncached;
                tokio::task::yield_now().await;
            }
            uncached
        })
    };
    let plan = h.manager.start_download("album").await.unwrap();
    assert_eq!(plan.queued.len(), 4);

    assert_eq!(passes.await.unwrap(), 0);
    eventually!(h.parent_cached("album").await);
    eventually!(h.manager.active_downloads("album") == 0);
    for index in 0..4 {
        assert!(h.segment_cached(&format!("album-{}", index)).await);
    }
    assert_eq!(h.files_in("album").len(), 4);
    assert_eq!(h.reconciler.reconcile().await.unwrap().mutations(), 0);
}
