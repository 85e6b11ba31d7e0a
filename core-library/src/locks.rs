//! Per-segment write serialization
//!
//! Every component that writes a segment row (progress commits, download
//! completion, reconciliation) holds that segment's guard for the duration
//! of the write. Different segments never contend. An entry lives only
//! while someone holds or waits on it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Keyed async mutex over segment ids.
#[derive(Debug, Default)]
pub struct SegmentLocks {
    locks: LockMap,
}

/// Held while writing a segment row. Released on drop.
#[derive(Debug)]
pub struct SegmentGuard {
    segment_id: String,
    locks: LockMap,
    guard: OwnedMutexGuard<()>,
}

impl SegmentGuard {
    pub fn segment_id(&self) -> &str {
        &self.segment_id
    }
}

impl Drop for SegmentGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        // The map and this guard hold the only references: no waiters.
        if Arc::strong_count(OwnedMutexGuard::mutex(&self.guard)) == 2 {
            locks.remove(&self.segment_id);
        }
    }
}

impl SegmentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `segment_id`.
    pub async fn lock(&self, segment_id: &str) -> SegmentGuard {
        let mutex = {
            let mut locks = self.locks.lock();
            locks
                .entry(segment_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        SegmentGuard {
            segment_id: segment_id.to_string(),
            locks: Arc::clone(&self.locks),
            guard: mutex.lock_owned().await,
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
