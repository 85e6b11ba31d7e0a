//! # Cache Reconciler
//!
//! Heals drift between segment files on disk and the `cached` flags in the
//! database, in both directions:
//!
//! - a complete file for a segment flagged uncached marks it cached
//! - a segment flagged cached without its file is marked uncached
//!
//! Afterwards every parent's derived `cached` flag is recomputed. A pass only
//! writes rows whose value actually changes, so a second pass over an
//! unchanged cache performs no mutations.
//!
//! The pass takes a database snapshot first and lists the filesystem second.
//! Every correction re-reads the segment under its write lock, so downloads
//! finishing mid-pass are never undone. File system errors never abort the
//! pass: unreadable parent directories are left out of the diff.

use crate::cache::naming::CacheLayout;
use crate::error::Result;
use bridge_traits::error::BridgeError;
use bridge_traits::storage::FileSystemAccess;
use core_library::repositories::{ParentRepository, SegmentRepository};
use core_library::SegmentLocks;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use core_runtime::logging::strip_path;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Segments whose file was found while flagged uncached
    pub marked_cached: usize,
    /// Segments flagged cached whose file was missing
    pub marked_uncached: usize,
    /// Parents whose derived cached flag flipped
    pub parents_updated: usize,
    /// Segment files seen on disk
    pub files_scanned: usize,
    /// Parent directories that could not be listed
    pub unreadable_groups: usize,
}

impl ReconcileReport {
    /// Total number of rows written
    pub fn mutations(&self) -> usize {
        self.marked_cached + self.marked_uncached + self.parents_updated
    }
}

/// Result of listing the cache directory.
#[derive(Debug, Default)]
struct DiskSnapshot {
    /// `(parent directory, segment id)` of every segment file listed
    files: HashSet<(String, String)>,
    /// parent directories whose contents are unknown
    unreadable: HashSet<String>,
    /// the cache root itself could not be listed
    root_unreadable: bool,
}

pub struct CacheReconciler {
    layout: CacheLayout,
    segments: Arc<dyn SegmentRepository>,
    parents: Arc<dyn ParentRepository>,
    fs: Arc<dyn FileSystemAccess>,
    locks: Arc<SegmentLocks>,
    event_bus: EventBus,
    pass_lock: Mutex<()>,
}

fn is_not_found(error: &BridgeError) -> bool {
    matches!(error, BridgeError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
}

impl CacheReconciler {
    pub fn new(
        layout: CacheLayout,
        segments: Arc<dyn SegmentRepository>,
        parents: Arc<dyn ParentRepository>,
        fs: Arc<dyn FileSystemAccess>,
        locks: Arc<SegmentLocks>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            layout,
            segments,
            parents,
            fs,
            locks,
            event_bus,
            pass_lock: Mutex::new(()),
        }
    }

    /// Run one reconciliation pass.
    ///
    /// # Errors
    ///
    /// Only database failures abort a pass; file system failures are logged
    /// and the affected files are skipped.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let _pass = self.pass_lock.lock().await;

        let db_cached: HashSet<(String, String)> =
            self.segments.find_cached().await?.into_iter().collect();
        let cached_ids: HashSet<&str> = db_cached.iter().map(|(_, id)| id.as_str()).collect();
        let disk = self.scan_disk().await;

        let mut report = ReconcileReport {
            files_scanned: disk.files.len(),
            unreadable_groups: disk.unreadable.len(),
            ..Default::default()
        };

        if disk.root_unreadable {
            warn!(root = %self.layout.root().display(), "Cache root unreadable, skipping file diff");
        } else {
            for (group, segment_id) in &disk.files {
                if !cached_ids.contains(segment_id.as_str())
                    && self.mark_found(segment_id, group).await?
                {
                    report.marked_cached += 1;
                }
            }

            // A copy in another parent's directory does not count as present.
            for (parent_id, segment_id) in db_cached.difference(&disk.files) {
                if self.mark_missing(segment_id, &disk.unreadable).await? {
                    debug!(segment_id = %segment_id, parent_id = %parent_id, "Cached segment file missing");
                    report.marked_uncached += 1;
                }
            }
        }

        for (parent_id, cached) in self.parents.recompute_all_cached().await? {
            report.parents_updated += 1;
            self.emit(CacheEvent::ParentCacheChanged { parent_id, cached });
        }

        if report.mutations() > 0 {
            info!(
                marked_cached = report.marked_cached,
                marked_uncached = report.marked_uncached,
                parents_updated = report.parents_updated,
                "Cache reconciled"
            );
        } else {
            debug!(files = report.files_scanned, "Cache already consistent");
        }

        self.emit(CacheEvent::Reconciled {
            marked_cached: report.marked_cached,
            marked_uncached: report.marked_uncached,
            parents_updated: report.parents_updated,
        });

        Ok(report)
    }

    /// A file exists for a segment the snapshot saw as uncached.
    async fn mark_found(&self, segment_id: &str, group: &str) -> Result<bool> {
        let _guard = self.locks.lock(segment_id).await;

        let Some(segment) = self.segments.find_by_id(segment_id).await? else {
            debug!(segment_id, "Ignoring cache file for unknown segment");
            return Ok(false);
        };

        if segment.parent_id != group {
            debug!(
                segment_id,
                found_in = group,
                parent_id = %segment.parent_id,
                "Ignoring misplaced cache file"
            );
            return Ok(false);
        }

        if segment.cached {
            return Ok(false);
        }

        Ok(self.segments.set_cached(segment_id, true).await?)
    }

    /// The snapshot saw a segment as cached but no file was listed for it.
    async fn mark_missing(&self, segment_id: &str, unreadable: &HashSet<String>) -> Result<bool> {
        let _guard = self.locks.lock(segment_id).await;

        let Some(segment) = self.segments.find_by_id(segment_id).await? else {
            return Ok(false);
        };

        if !segment.cached || unreadable.contains(&segment.parent_id) {
            return Ok(false);
        }

        let path = match self.layout.segment_path(&segment.parent_id, segment_id) {
            Ok(path) => path,
            Err(e) => {
                warn!(segment_id, error = %e, "Cached segment has no valid cache path");
                return Ok(self.segments.set_cached(segment_id, false).await?);
            }
        };

        match self.fs.exists(&path).await {
            Ok(true) => Ok(false),
            Ok(false) => Ok(self.segments.set_cached(segment_id, false).await?),
            Err(e) => {
                warn!(segment_id, error = %e, "Could not verify cache file, leaving flag");
                Ok(false)
            }
        }
    }

    async fn scan_disk(&self) -> DiskSnapshot {
        let mut snapshot = DiskSnapshot::default();
        let root = self.layout.root();

        let entries = match self.fs.list_directory(root).await {
            Ok(entries) => entries,
            Err(e) if is_not_found(&e) => return snapshot,
            Err(e) => {
                warn!(error = %e, "Failed to list cache root");
                snapshot.root_unreadable = true;
                return snapshot;
            }
        };

        for entry in entries {
            let Some(group) = entry.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };

            match self.fs.metadata(&entry).await {
                Ok(meta) if meta.is_directory => {}
                Ok(_) => {
                    debug!(file = strip_path(&group), "Ignoring file outside parent directories");
                    continue;
                }
                Err(e) => {
                    warn!(group = %group, error = %e, "Failed to stat cache entry");
                    snapshot.unreadable.insert(group);
                    continue;
                }
            }

            match self.fs.list_directory(&entry).await {
                Ok(files) => self.collect_group(&group, files, &mut snapshot),
                Err(e) => {
                    warn!(group = %group, error = %e, "Failed to list cache group");
                    snapshot.unreadable.insert(group);
                }
            }
        }

        snapshot
    }

    fn collect_group(&self, group: &str, files: Vec<PathBuf>, snapshot: &mut DiskSnapshot) {
        for path in files {
            if let Some(segment_id) = self.layout.naming().parse_path(&path) {
                snapshot.files.insert((group.to_string(), segment_id));
            }
        }
    }

    /// Reconcile every `interval` until `token` is cancelled.
    pub fn spawn_periodic(
        self: Arc<Self>,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Periodic reconciliation stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.reconcile().await {
                            warn!(error = %e, "Periodic reconciliation failed");
                        }
                    }
                }
            }
        })
    }

    fn emit(&self, event: CacheEvent) {
        let _ = self.event_bus.emit(CoreEvent::Cache(event));
    }
}
