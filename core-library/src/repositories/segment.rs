//! Segment repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::Segment;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{query_as, SqlitePool};

/// Segment repository interface for data access operations
#[async_trait]
pub trait SegmentRepository: Send + Sync {
    /// Insert a new segment
    ///
    /// # Errors
    /// Returns error if:
    /// - Segment with same ID already exists
    /// - Segment validation fails
    /// - The parent does not exist
    async fn insert(&self, segment: &Segment) -> Result<()>;

    /// Find a segment by its ID
    async fn find_by_id(&self, id: &str) -> Result<Option<Segment>>;

    /// All segments of a parent ordered by `sequence_index`
    async fn find_by_parent(&self, parent_id: &str) -> Result<Vec<Segment>>;

    /// `(parent_id, segment_id)` of every segment currently flagged as cached
    async fn find_cached(&self) -> Result<Vec<(String, String)>>;

    /// Set the cached flag of one segment
    ///
    /// # Returns
    /// - `Ok(true)` if the stored value changed
    /// - `Ok(false)` if it already had that value or the segment is unknown
    async fn set_cached(&self, id: &str, cached: bool) -> Result<bool>;
}

/// SQLite implementation of SegmentRepository
pub struct SqliteSegmentRepository {
    pool: SqlitePool,
}

impl SqliteSegmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SegmentRepository for SqliteSegmentRepository {
    async fn insert(&self, segment: &Segment) -> Result<()> {
        segment
            .validate()
            .map_err(|msg| LibraryError::InvalidInput {
                field: "segment".to_string(),
                message: msg,
            })?;

        sqlx::query(
            r#"
            INSERT INTO segments (
                id, parent_id, sequence_index, duration_ms, media_path,
                cached, progress_ms, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&segment.id)
        .bind(&segment.parent_id)
        .bind(segment.sequence_index)
        .bind(segment.duration_ms)
        .bind(&segment.media_path)
        .bind(segment.cached)
        .bind(segment.progress_ms)
        .bind(segment.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Segment>> {
        let segment = query_as::<_, Segment>("SELECT * FROM segments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(segment)
    }

    async fn find_by_parent(&self, parent_id: &str) -> Result<Vec<Segment>> {
        let segments = query_as::<_, Segment>(
            "SELECT * FROM segments WHERE parent_id = ? ORDER BY sequence_index",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(segments)
    }

    async fn find_cached(&self) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT parent_id, id FROM segments WHERE cached = 1 ORDER BY parent_id, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn set_cached(&self, id: &str, cached: bool) -> Result<bool> {
        let result =
            sqlx::query("UPDATE segments SET cached = ?, updated_at = ? WHERE id = ? AND cached != ?")
                .bind(cached)
                .bind(Utc::now().timestamp_millis())
                .bind(id)
                .bind(cached)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::Parent;
    use crate::repositories::{ParentRepository, SqliteParentRepository};

    async fn setup() -> (SqlitePool, SqliteSegmentRepository) {
        let pool = create_test_pool().await.unwrap();
        SqliteParentRepository::new(pool.clone())
            .insert(&Parent::new("p1", "Test Book"))
            .await
            .unwrap();
        (pool.clone(), SqliteSegmentRepository::new(pool))
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let (_pool, repo) = setup().await;
        let segment = Segment::new("s1", "p1", 0, 180_000, "/media/s1.mp3");

        repo.insert(&segment).await.unwrap();

        let found = repo.find_by_id("s1").await.unwrap().unwrap();
        assert_eq!(found.duration_ms, 180_000);
        assert!(!found.cached);
        assert!(repo.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid_segment() {
        let (_pool, repo) = setup().await;
        let segment = Segment::new("s1", "p1", 0, 0, "/media/s1.mp3");

        let result = repo.insert(&segment).await;
        assert!(matches!(result, Err(LibraryError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_insert_requires_parent() {
        let (_pool, repo) = setup().await;
        let segment = Segment::new("s1", "unknown", 0, 1_000, "/media/s1.mp3");

        assert!(matches!(
            repo.insert(&segment).await,
            Err(LibraryError::Database(_))
        ));
    }

    #[tokio::test]
    async fn test_find_by_parent_is_ordered() {
        let (_pool, repo) = setup().await;
        repo.insert(&Segment::new("s2", "p1", 1, 2_000, "/b"))
            .await
            .unwrap();
        repo.insert(&Segment::new("s1", "p1", 0, 1_000, "/a"))
            .await
            .unwrap();

        let ids: Vec<_> = repo
            .find_by_parent("p1")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_set_cached_reports_changes_only() {
        let (_pool, repo) = setup().await;
        repo.insert(&Segment::new("s1", "p1", 0, 1_000, "/a"))
            .await
            .unwrap();

        assert!(repo.set_cached("s1", true).await.unwrap());
        assert!(!repo.set_cached("s1", true).await.unwrap());
        assert!(!repo.set_cached("missing", true).await.unwrap());
        assert_eq!(
            repo.find_cached().await.unwrap(),
            vec![("p1".to_string(), "s1".to_string())]
        );

        assert!(repo.set_cached("s1", false).await.unwrap());
        assert!(repo.find_cached().await.unwrap().is_empty());
    }
}
