//! # Segment Cache Manager
//!
//! Downloads the missing segments of a parent into the offline cache.
//!
//! Each parent has at most one download group. A group owns a
//! cancellation token and the set of segment ids currently in flight, so a
//! segment is never downloaded twice at once. Downloads share a semaphore
//! bounding global concurrency, retry transient failures with a linear
//! delay, and write to a tagged `.part` file that is renamed into place
//! only after the stream completes.
//!
//! When the last download of a group finishes, a reconciliation pass runs
//! if a reconciler is attached.

use crate::cache::config::CacheConfig;
use crate::cache::fetcher::SegmentFetcher;
use crate::cache::naming::CacheLayout;
use crate::cache::reconciler::CacheReconciler;
use crate::error::{PlaybackError, Result};
use bridge_traits::storage::FileSystemAccess;
use core_library::repositories::{ParentRepository, SegmentRepository};
use core_library::{Segment, SegmentLocks};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use core_runtime::logging::strip_path;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Outcome of [`CacheManager::start_download`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadPlan {
    pub parent_id: String,
    /// Segments a download was started for
    pub queued: Vec<String>,
    /// Segments already cached with their file present
    pub skipped: Vec<String>,
    /// Segments an earlier call is still downloading
    pub already_downloading: Vec<String>,
}

impl DownloadPlan {
    fn new(parent_id: &str) -> Self {
        Self {
            parent_id: parent_id.to_string(),
            ..Default::default()
        }
    }
}

struct DownloadGroup {
    generation: u64,
    token: CancellationToken,
    in_flight: HashSet<String>,
}

fn fs_error(e: impl std::fmt::Display) -> PlaybackError {
    PlaybackError::FileSystem(e.to_string())
}

pub struct CacheManager {
    config: CacheConfig,
    layout: CacheLayout,
    segments: Arc<dyn SegmentRepository>,
    parents: Arc<dyn ParentRepository>,
    fs: Arc<dyn FileSystemAccess>,
    fetcher: Arc<dyn SegmentFetcher>,
    locks: Arc<SegmentLocks>,
    event_bus: EventBus,
    download_semaphore: Arc<Semaphore>,
    groups: Mutex<HashMap<String, DownloadGroup>>,
    next_tag: AtomicU64,
    reconciler: Option<Arc<CacheReconciler>>,
}

impl CacheManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CacheConfig,
        layout: CacheLayout,
        segments: Arc<dyn SegmentRepository>,
        parents: Arc<dyn ParentRepository>,
        fs: Arc<dyn FileSystemAccess>,
        fetcher: Arc<dyn SegmentFetcher>,
        locks: Arc<SegmentLocks>,
        event_bus: EventBus,
    ) -> Result<Self> {
        config.validate().map_err(PlaybackError::Config)?;
        let download_semaphore = Arc::new(Semaphore::new(config.max_concurrent_downloads));

        Ok(Self {
            config,
            layout,
            segments,
            parents,
            fs,
            fetcher,
            locks,
            event_bus,
            download_semaphore,
            groups: Mutex::new(HashMap::new()),
            next_tag: AtomicU64::new(1),
            reconciler: None,
        })
    }

    /// Run a reconciliation pass whenever a download group drains.
    pub fn with_reconciler(mut self, reconciler: Arc<CacheReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Number of downloads in flight for a parent
    pub fn active_downloads(&self, parent_id: &str) -> usize {
        self.groups
            .lock()
            .get(parent_id)
            .map_or(0, |group| group.in_flight.len())
    }

    fn next_tag(&self) -> u64 {
        self.next_tag.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue downloads for every segment of `parent_id` that is not cached.
    ///
    /// Returns once the downloads are spawned; completion is reported
    /// through `CacheEvent`s.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the parent does not exist
    /// - `FileSystem` if the parent directory cannot be created
    #[instrument(skip(self))]
    pub async fn start_download(self: &Arc<Self>, parent_id: &str) -> Result<DownloadPlan> {
        if self.parents.find_by_id(parent_id).await?.is_none() {
            return Err(PlaybackError::not_found("Parent", parent_id));
        }

        let dir = self.layout.parent_dir(parent_id)?;
        self.fs.create_dir_all(&dir).await.map_err(fs_error)?;

        let segments = self.segments.find_by_parent(parent_id).await?;
        let mut plan = DownloadPlan::new(parent_id);

        let (token, generation, claimed) = self.claim(parent_id, segments, &mut plan);

        let mut queued = Vec::new();
        let mut released = Vec::new();
        let mut failure = None;

        for segment in claimed {
            if failure.is_some() {
                released.push(segment.id);
                continue;
            }
            match self.needs_download(&segment).await {
                Ok(true) => queued.push(segment),
                Ok(false) => {
                    plan.skipped.push(segment.id.clone());
                    released.push(segment.id);
                }
                Err(e) => {
                    failure = Some(e);
                    released.push(segment.id);
                }
            }
        }

        if let Some(e) = failure {
            released.extend(queued.into_iter().map(|s| s.id));
            self.release(parent_id, generation, &released);
            return Err(e);
        }
        self.release(parent_id, generation, &released);

        for segment in queued {
            plan.queued.push(segment.id.clone());
            let manager = Arc::clone(self);
            let token = token.clone();
            tokio::spawn(async move {
                manager.run_download(segment, generation, token).await;
            });
        }

        info!(
            queued = plan.queued.len(),
            skipped = plan.skipped.len(),
            in_flight = plan.already_downloading.len(),
            "Download plan ready"
        );
        self.emit(CacheEvent::DownloadQueued {
            parent_id: parent_id.to_string(),
            queued: plan.queued.len(),
            skipped: plan.skipped.len(),
        });

        Ok(plan)
    }

    /// Reserve every segment not already in flight for this call.
    fn claim(
        &self,
        parent_id: &str,
        segments: Vec<Segment>,
        plan: &mut DownloadPlan,
    ) -> (CancellationToken, u64, Vec<Segment>) {
        let mut groups = self.groups.lock();
        let group = groups
            .entry(parent_id.to_string())
            .or_insert_with(|| DownloadGroup {
                generation: self.next_tag(),
                token: CancellationToken::new(),
                in_flight: HashSet::new(),
            });

        let mut claimed = Vec::new();
        for segment in segments {
            if group.in_flight.insert(segment.id.clone()) {
                claimed.push(segment);
            } else {
                plan.already_downloading.push(segment.id);
            }
        }

        (group.token.clone(), group.generation, claimed)
    }

    /// Drop segments from a group; returns `true` if the group drained.
    fn release(&self, parent_id: &str, generation: u64, segment_ids: &[String]) -> bool {
        let mut groups = self.groups.lock();
        let Some(group) = groups.get_mut(parent_id) else {
            return false;
        };
        if group.generation != generation {
            return false;
        }

        for id in segment_ids {
            group.in_flight.remove(id);
        }

        if group.in_flight.is_empty() {
            groups.remove(parent_id);
            true
        } else {
            false
        }
    }

    /// Bring the flag and file of a segment into agreement and decide
    /// whether it has to be fetched.
    async fn needs_download(&self, segment: &Segment) -> Result<bool> {
        let path = self.layout.segment_path(&segment.parent_id, &segment.id)?;
        let exists = self.fs.exists(&path).await.map_err(fs_error)?;

        match (segment.cached, exists) {
            (true, true) => Ok(false),
            (false, true) => {
                let _guard = self.locks.lock(&segment.id).await;
                let current = self.segments.find_by_id(&segment.id).await?;
                if current.is_some_and(|s| s.cached) {
                    return Ok(false);
                }
                debug!(segment_id = %segment.id, "Deleting stale cache file");
                self.fs.delete_file(&path).await.map_err(fs_error)?;
                Ok(true)
            }
            (true, false) => {
                let _guard = self.locks.lock(&segment.id).await;
                self.segments.set_cached(&segment.id, false).await?;
                Ok(true)
            }
            (false, false) => Ok(true),
        }
    }

    async fn run_download(self: Arc<Self>, segment: Segment, generation: u64, token: CancellationToken) {
        let result = self.download(&segment, &token).await;

        match result {
            Ok(bytes) => {
                self.emit(CacheEvent::SegmentCached {
                    parent_id: segment.parent_id.clone(),
                    segment_id: segment.id.clone(),
                    bytes,
                });
                match self.parents.recompute_cached(&segment.parent_id).await {
                    Ok(Some(cached)) => self.emit(CacheEvent::ParentCacheChanged {
                        parent_id: segment.parent_id.clone(),
                        cached,
                    }),
                    Ok(None) => {}
                    Err(e) => warn!(parent_id = %segment.parent_id, error = %e, "Failed to recompute parent cache flag"),
                }
            }
            Err(PlaybackError::Cancelled) => {
                debug!(segment_id = %segment.id, "Download cancelled");
            }
            Err(e) => {
                warn!(segment_id = %segment.id, error = %e, "Segment download failed");
                self.emit(CacheEvent::DownloadFailed {
                    parent_id: segment.parent_id.clone(),
                    segment_id: segment.id.clone(),
                    message: e.to_string(),
                    recoverable: e.is_transient(),
                });
            }
        }

        let drained = self.release(&segment.parent_id, generation, std::slice::from_ref(&segment.id));
        if drained {
            if let Some(reconciler) = &self.reconciler {
                if let Err(e) = reconciler.reconcile().await {
                    warn!(error = %e, "Post-download reconciliation failed");
                }
            }
        }
    }

    /// Fetch one segment with bounded retry; returns the bytes written.
    #[instrument(skip(self, segment, token), fields(segment_id = %segment.id))]
    async fn download(&self, segment: &Segment, token: &CancellationToken) -> Result<u64> {
        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(PlaybackError::Cancelled),
            permit = self.download_semaphore.acquire() => permit
                .map_err(|_| PlaybackError::InvalidState("download slots closed".to_string()))?,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let partial = self
                .layout
                .partial_path(&segment.parent_id, &segment.id, self.next_tag())?;

            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(PlaybackError::Cancelled),
                written = tokio::time::timeout(
                    self.config.download_timeout,
                    self.write_partial(segment, &partial),
                ) => written.unwrap_or(Err(PlaybackError::Timeout(self.config.download_timeout))),
            };

            let result = match result {
                Ok(bytes) => self.commit(segment, &partial, token).await.map(|()| bytes),
                Err(e) => Err(e),
            };

            match result {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    self.discard(&partial).await;

                    if !e.is_transient() || attempt >= self.config.max_retry_attempts {
                        return Err(e);
                    }

                    let delay = self.config.retry_delay * attempt;
                    debug!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "Retrying segment download");
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(PlaybackError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn write_partial(&self, segment: &Segment, partial: &Path) -> Result<u64> {
        let mut reader = self.fetcher.open(segment).await?;
        let mut writer = self.fs.open_write_stream(partial).await.map_err(fs_error)?;

        let bytes = tokio::io::copy(&mut reader, &mut writer)
            .await
            .map_err(|e| PlaybackError::Network(e.to_string()))?;
        writer.shutdown().await.map_err(fs_error)?;

        if bytes == 0 {
            return Err(PlaybackError::Network("empty segment body".to_string()));
        }
        Ok(bytes)
    }

    /// Move a complete partial file into place and flag the segment cached.
    async fn commit(&self, segment: &Segment, partial: &Path, token: &CancellationToken) -> Result<()> {
        let _guard = self.locks.lock(&segment.id).await;
        if token.is_cancelled() {
            return Err(PlaybackError::Cancelled);
        }

        let path = self.layout.segment_path(&segment.parent_id, &segment.id)?;
        self.fs.rename(partial, &path).await.map_err(fs_error)?;
        self.segments.set_cached(&segment.id, true).await?;
        Ok(())
    }

    async fn discard(&self, partial: &Path) {
        if let Err(e) = self.fs.delete_file(partial).await {
            warn!(
                file = strip_path(&partial.to_string_lossy()),
                error = %e,
                "Failed to delete partial download"
            );
        }
    }

    /// Cancel in-flight downloads of a parent, returning how many were
    /// aborted. Their partial files are deleted as the tasks unwind.
    #[instrument(skip(self))]
    pub fn cancel(&self, parent_id: &str) -> usize {
        let Some(group) = self.groups.lock().remove(parent_id) else {
            return 0;
        };

        group.token.cancel();
        let aborted = group.in_flight.len();
        info!(aborted, "Downloads cancelled");
        self.emit(CacheEvent::DownloadCancelled {
            parent_id: parent_id.to_string(),
            aborted,
        });
        aborted
    }

    /// Cancel downloads and delete every cached file of a parent.
    ///
    /// A failed bulk delete falls back to deleting files one by one. Files
    /// that survive both are picked up again by the next reconciliation.
    #[instrument(skip(self))]
    pub async fn remove(&self, parent_id: &str) -> Result<()> {
        if self.parents.find_by_id(parent_id).await?.is_none() {
            return Err(PlaybackError::not_found("Parent", parent_id));
        }

        self.cancel(parent_id);

        let dir = self.layout.parent_dir(parent_id)?;
        if let Err(e) = self.fs.delete_dir_all(&dir).await {
            warn!(error = %e, "Bulk delete failed, deleting files individually");
            self.delete_each(&dir).await;
        }

        for segment in self.segments.find_by_parent(parent_id).await? {
            let _guard = self.locks.lock(&segment.id).await;
            self.segments.set_cached(&segment.id, false).await?;
        }

        if let Some(cached) = self.parents.recompute_cached(parent_id).await? {
            self.emit(CacheEvent::ParentCacheChanged {
                parent_id: parent_id.to_string(),
                cached,
            });
        }

        self.emit(CacheEvent::Removed {
            parent_id: parent_id.to_string(),
        });
        Ok(())
    }

    async fn delete_each(&self, dir: &Path) {
        let files = match self.fs.list_directory(dir).await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "Failed to list cache group");
                return;
            }
        };

        for file in files {
            if let Err(e) = self.fs.delete_file(&file).await {
                warn!(file = strip_path(&file.to_string_lossy()), error = %e, "Failed to delete cache file");
            }
        }
    }

    fn emit(&self, event: CacheEvent) {
        let _ = self.event_bus.emit(CoreEvent::Cache(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_desktop::TokioFileSystem;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use bridge_traits::storage::FileMetadata;
    use core_library::db::create_test_pool;
    use core_library::{Parent, SqliteParentRepository, SqliteSegmentRepository};
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::io::AsyncRead;

    /// Serves fixed bytes, failing the first `failures` opens.
    struct FlakyFetcher {
        failures: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SegmentFetcher for FlakyFetcher {
        async fn open(&self, segment: &Segment) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(PlaybackError::Network("connection reset".to_string()));
            }
            Ok(Box::new(std::io::Cursor::new(segment.id.clone().into_bytes())))
        }
    }

    struct Fixture {
        manager: Arc<CacheManager>,
        segments: Arc<SqliteSegmentRepository>,
        parents: Arc<SqliteParentRepository>,
        calls: Arc<AtomicUsize>,
        bus: EventBus,
        dir: PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    /// Local file system whose recursive delete always fails.
    struct NoBulkDelete(TokioFileSystem);

    #[async_trait]
    impl FileSystemAccess for NoBulkDelete {
        async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
            self.0.get_cache_directory().await
        }
        async fn get_data_directory(&self) -> BridgeResult<PathBuf> {
            self.0.get_data_directory().await
        }
        async fn exists(&self, path: &Path) -> BridgeResult<bool> {
            self.0.exists(path).await
        }
        async fn metadata(&self, path: &Path) -> BridgeResult<FileMetadata> {
            self.0.metadata(path).await
        }
        async fn create_dir_all(&self, path: &Path) -> BridgeResult<()> {
            self.0.create_dir_all(path).await
        }
        async fn write_file(&self, path: &Path, data: bytes::Bytes) -> BridgeResult<()> {
            self.0.write_file(path, data).await
        }
        async fn rename(&self, from: &Path, to: &Path) -> BridgeResult<()> {
            self.0.rename(from, to).await
        }
        async fn delete_file(&self, path: &Path) -> BridgeResult<()> {
            self.0.delete_file(path).await
        }
        async fn delete_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Err(BridgeError::OperationFailed("directory busy".to_string()))
        }
        async fn list_directory(&self, path: &Path) -> BridgeResult<Vec<PathBuf>> {
            self.0.list_directory(path).await
        }
        async fn open_write_stream(
            &self,
            path: &Path,
        ) -> BridgeResult<Box<dyn tokio::io::AsyncWrite + Send + Unpin>> {
            self.0.open_write_stream(path).await
        }
    }

    async fn fixture(failures: usize, config: CacheConfig) -> Fixture {
        fixture_with(failures, config, false).await
    }

    async fn fixture_with(failures: usize, config: CacheConfig, bulk_delete_fails: bool) -> Fixture {
        let dir = std::env::temp_dir().join(format!("opc-manager-{}", uuid::Uuid::new_v4()));
        let pool = create_test_pool().await.unwrap();
        let segments = Arc::new(SqliteSegmentRepository::new(pool.clone()));
        let parents = Arc::new(SqliteParentRepository::new(pool));
        parents.insert(&Parent::new("p1", "Album")).await.unwrap();
        for index in 0..3 {
            segments
                .insert(&Segment::new(
                    format!("s{}", index),
                    "p1",
                    index,
                    60_000,
                    format!("/media/{}", index),
                ))
                .await
                .unwrap();
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let bus = EventBus::new(64);
        let layout = CacheLayout::new(&dir, &config).unwrap();
        let local = TokioFileSystem::with_directories(dir.clone(), dir.clone());
        let fs: Arc<dyn FileSystemAccess> = if bulk_delete_fails {
            Arc::new(NoBulkDelete(local))
        } else {
            Arc::new(local)
        };
        let manager = CacheManager::new(
            config,
            layout,
            segments.clone(),
            parents.clone(),
            fs,
            Arc::new(FlakyFetcher {
                failures,
                calls: calls.clone(),
            }),
            Arc::new(SegmentLocks::new()),
            bus.clone(),
        )
        .unwrap();

        Fixture {
            manager: Arc::new(manager),
            segments,
            parents,
            calls,
            bus,
            dir,
        }
    }

    async fn wait_for_parent_cached(f: &Fixture) {
        for _ in 0..200 {
            if f.parents.find_by_id("p1").await.unwrap().unwrap().cached {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("parent never became cached");
    }

    #[tokio::test]
    async fn test_download_marks_segments_and_parent_cached() {
        let f = fixture(0, CacheConfig::default()).await;

        let plan = f.manager.start_download("p1").await.unwrap();
        assert_eq!(plan.queued.len(), 3);
        wait_for_parent_cached(&f).await;

        let path = f.manager.layout().segment_path("p1", "s1").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"s1");
        assert_eq!(f.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let config = CacheConfig::default().with_retry(3, Duration::from_millis(1));
        let f = fixture(2, config).await;

        f.manager.start_download("p1").await.unwrap();
        wait_for_parent_cached(&f).await;

        assert_eq!(f.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_cached_segments_are_skipped_on_second_plan() {
        let f = fixture(0, CacheConfig::default()).await;
        f.manager.start_download("p1").await.unwrap();
        wait_for_parent_cached(&f).await;
        while f.manager.active_downloads("p1") > 0 {
            tokio::task::yield_now().await;
        }

        let plan = f.manager.start_download("p1").await.unwrap();
        assert!(plan.queued.is_empty());
        assert_eq!(plan.skipped.len(), 3);
    }

    #[tokio::test]
    async fn test_flag_without_file_is_redownloaded() {
        let f = fixture(0, CacheConfig::default()).await;
        f.segments.set_cached("s0", true).await.unwrap();

        let plan = f.manager.start_download("p1").await.unwrap();

        assert!(plan.queued.contains(&"s0".to_string()));
        wait_for_parent_cached(&f).await;
    }

    #[tokio::test]
    async fn test_unknown_parent() {
        let f = fixture(0, CacheConfig::default()).await;

        assert!(matches!(
            f.manager.start_download("missing").await,
            Err(PlaybackError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_deletes_files_and_flags() {
        let f = fixture(0, CacheConfig::default()).await;
        let mut events = f.bus.subscribe();
        f.manager.start_download("p1").await.unwrap();
        wait_for_parent_cached(&f).await;

        f.manager.remove("p1").await.unwrap();

        assert!(!f.manager.layout().parent_dir("p1").unwrap().exists());
        assert!(f.segments.find_cached().await.unwrap().is_empty());
        assert!(!f.parents.find_by_id("p1").await.unwrap().unwrap().cached);

        let mut removed = false;
        while let Ok(event) = events.try_recv() {
            removed |= matches!(event, CoreEvent::Cache(CacheEvent::Removed { .. }));
        }
        assert!(removed);
    }

    #[tokio::test]
    async fn test_remove_falls_back_to_per_file_delete() {
        let f = fixture_with(0, CacheConfig::default(), true).await;
        f.manager.start_download("p1").await.unwrap();
        wait_for_parent_cached(&f).await;
        let dir = f.manager.layout().parent_dir("p1").unwrap();

        f.manager.remove("p1").await.unwrap();

        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
        assert!(f.segments.find_cached().await.unwrap().is_empty());
        assert!(!f.parents.find_by_id("p1").await.unwrap().unwrap().cached);
    }

    #[tokio::test]
    async fn test_stale_file_kept_when_flag_set_meanwhile() {
        let f = fixture(0, CacheConfig::default()).await;
        let snapshot = f.segments.find_by_id("s0").await.unwrap().unwrap();
        let path = f.manager.layout().segment_path("p1", "s0").unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"s0").unwrap();

        // Committed by a concurrent writer after the plan read the row.
        f.segments.set_cached("s0", true).await.unwrap();
        assert!(!f.manager.needs_download(&snapshot).await.unwrap());
        assert!(path.exists());

        f.segments.set_cached("s0", false).await.unwrap();
        assert!(f.manager.needs_download(&snapshot).await.unwrap());
        assert!(!path.exists());
    }
}
