//! Integration tests across the parent and segment repositories

use core_library::db::create_test_pool;
use core_library::{
    Parent, ParentRepository, Segment, SegmentLocks, SegmentRepository, SqliteParentRepository,
    SqliteSegmentRepository,
};
use std::sync::Arc;

async fn seed(parents: &SqliteParentRepository, segments: &SqliteSegmentRepository, id: &str) {
    parents.insert(&Parent::new(id, "Seeded")).await.unwrap();
    for (index, duration) in [180_000, 200_000, 150_000].into_iter().enumerate() {
        segments
            .insert(&Segment::new(
                format!("{}-s{}", id, index),
                id,
                index as i64,
                duration,
                format!("/library/{}/{}", id, index),
            ))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_parent_cached_is_and_of_segments() {
    let pool = create_test_pool().await.unwrap();
    let parents = SqliteParentRepository::new(pool.clone());
    let segments = SqliteSegmentRepository::new(pool);
    seed(&parents, &segments, "p1").await;
    seed(&parents, &segments, "p2").await;

    for segment in segments.find_by_parent("p1").await.unwrap() {
        segments.set_cached(&segment.id, true).await.unwrap();
    }
    segments.set_cached("p2-s0", true).await.unwrap();
    parents.recompute_all_cached().await.unwrap();

    for id in ["p1", "p2"] {
        let parent = parents.find_by_id(id).await.unwrap().unwrap();
        let all_cached = segments
            .find_by_parent(id)
            .await
            .unwrap()
            .iter()
            .all(|s| s.cached);
        assert_eq!(parent.cached, all_cached, "parent {}", id);
    }
}

#[tokio::test]
async fn test_serialized_commits_keep_last_write() {
    let pool = create_test_pool().await.unwrap();
    let parents = Arc::new(SqliteParentRepository::new(pool.clone()));
    let segments = SqliteSegmentRepository::new(pool);
    seed(&parents, &segments, "p1").await;
    let locks = Arc::new(SegmentLocks::new());

    let mut handles = Vec::new();
    for offset in (0..10).map(|i| i * 1_000) {
        let parents = parents.clone();
        let locks = locks.clone();
        handles.push(tokio::spawn(async move {
            let _guard = locks.lock("p1-s2").await;
            parents.commit_progress("p1-s2", offset).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let parent = parents.find_by_id("p1").await.unwrap().unwrap();
    let segment = segments.find_by_id("p1-s2").await.unwrap().unwrap();
    assert_eq!(parent.progress_ms, 380_000 + segment.progress_ms);
}
