//! Parent repository trait and implementation
//!
//! A parent's `cached` flag is derived: it is true iff the parent has at
//! least one segment and every segment is cached. The recompute operations
//! only write rows whose stored value differs from the derived one, so a
//! consistent database sees no writes.

use crate::error::{LibraryError, Result};
use crate::models::{Parent, ProgressCommit};
use crate::repositories::{Page, PageRequest};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{query_as, SqlitePool};
use tracing::debug;

const PARENT_SELECT: &str = r#"
    SELECT p.id, p.title, p.progress_ms, p.cached, p.finished,
           p.current_segment_id, p.updated_at,
           COALESCE(SUM(s.duration_ms), 0) AS total_duration_ms,
           COUNT(s.id) AS segment_count
    FROM parents p
    LEFT JOIN segments s ON s.parent_id = p.id
"#;

const DERIVED_CACHED: &str = r#"
    SELECT p.id, p.cached,
           CASE WHEN COUNT(s.id) > 0 AND COUNT(s.id) = SUM(s.cached) THEN 1 ELSE 0 END AS derived
    FROM parents p
    LEFT JOIN segments s ON s.parent_id = p.id
"#;

/// Parent repository interface for data access operations
#[async_trait]
pub trait ParentRepository: Send + Sync {
    /// Insert a new parent
    async fn insert(&self, parent: &Parent) -> Result<()>;

    /// Find a parent by ID, with derived totals
    async fn find_by_id(&self, id: &str) -> Result<Option<Parent>>;

    /// List parents ordered by most recent update
    async fn list(&self, page_request: PageRequest) -> Result<Page<Parent>>;

    /// Commit a segment offset and the parent position it implies
    ///
    /// Writes the segment's `progress_ms`, and the parent's `progress_ms`
    /// (sum of preceding durations plus `offset_ms`) and current segment in
    /// one transaction.
    ///
    /// # Errors
    /// - `NotFound` if the segment does not exist
    /// - `InvalidInput` if `offset_ms` is outside `[0, duration]`
    async fn commit_progress(&self, segment_id: &str, offset_ms: i64) -> Result<ProgressCommit>;

    /// Recompute the derived cached flag of one parent
    ///
    /// # Returns
    /// - `Ok(Some(value))` if the stored flag changed to `value`
    /// - `Ok(None)` if it was already consistent
    async fn recompute_cached(&self, parent_id: &str) -> Result<Option<bool>>;

    /// Recompute every parent's derived cached flag
    ///
    /// # Returns
    /// `(parent_id, new_value)` for each row that changed
    async fn recompute_all_cached(&self) -> Result<Vec<(String, bool)>>;

    /// Set the finished flag, returning whether it changed
    async fn set_finished(&self, parent_id: &str, finished: bool) -> Result<bool>;
}

/// SQLite implementation of ParentRepository
pub struct SqliteParentRepository {
    pool: SqlitePool,
}

impl SqliteParentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParentRepository for SqliteParentRepository {
    async fn insert(&self, parent: &Parent) -> Result<()> {
        parent.validate().map_err(|msg| LibraryError::InvalidInput {
            field: "parent".to_string(),
            message: msg,
        })?;

        sqlx::query(
            r#"
            INSERT INTO parents (
                id, title, progress_ms, cached, finished, current_segment_id, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&parent.id)
        .bind(&parent.title)
        .bind(parent.progress_ms)
        .bind(parent.cached)
        .bind(parent.finished)
        .bind(&parent.current_segment_id)
        .bind(parent.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Parent>> {
        let sql = format!("{} WHERE p.id = ? GROUP BY p.id", PARENT_SELECT);
        let parent = query_as::<_, Parent>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(parent)
    }

    async fn list(&self, page_request: PageRequest) -> Result<Page<Parent>> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM parents")
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "{} GROUP BY p.id ORDER BY p.updated_at DESC, p.id LIMIT ? OFFSET ?",
            PARENT_SELECT
        );
        let parents = query_as::<_, Parent>(&sql)
            .bind(page_request.limit() as i64)
            .bind(page_request.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(parents, total.0 as u64, page_request))
    }

    async fn commit_progress(&self, segment_id: &str, offset_ms: i64) -> Result<ProgressCommit> {
        let mut tx = self.pool.begin().await?;

        let (parent_id, sequence_index, duration_ms): (String, i64, i64) = sqlx::query_as(
            "SELECT parent_id, sequence_index, duration_ms FROM segments WHERE id = ?",
        )
        .bind(segment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| LibraryError::not_found("Segment", segment_id))?;

        if !(0..=duration_ms).contains(&offset_ms) {
            return Err(LibraryError::InvalidInput {
                field: "offset_ms".to_string(),
                message: format!("{} is outside [0, {}]", offset_ms, duration_ms),
            });
        }

        let (preceding_ms, total_duration_ms): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(CASE WHEN sequence_index < ? THEN duration_ms ELSE 0 END), 0),
                   COALESCE(SUM(duration_ms), 0)
            FROM segments WHERE parent_id = ?
            "#,
        )
        .bind(sequence_index)
        .bind(&parent_id)
        .fetch_one(&mut *tx)
        .await?;

        let now = Utc::now().timestamp_millis();
        let parent_progress_ms = preceding_ms + offset_ms;

        sqlx::query("UPDATE segments SET progress_ms = ?, updated_at = ? WHERE id = ?")
            .bind(offset_ms)
            .bind(now)
            .bind(segment_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE parents SET progress_ms = ?, current_segment_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(parent_progress_ms)
        .bind(segment_id)
        .bind(now)
        .bind(&parent_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ProgressCommit {
            segment_id: segment_id.to_string(),
            parent_id,
            offset_ms,
            parent_progress_ms,
            total_duration_ms,
            segment_duration_ms: duration_ms,
        })
    }

    async fn recompute_cached(&self, parent_id: &str) -> Result<Option<bool>> {
        let sql = format!("{} WHERE p.id = ? GROUP BY p.id", DERIVED_CACHED);
        let (_, stored, derived): (String, bool, bool) = sqlx::query_as(&sql)
            .bind(parent_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LibraryError::not_found("Parent", parent_id))?;

        if stored == derived {
            return Ok(None);
        }

        let result =
            sqlx::query("UPDATE parents SET cached = ?, updated_at = ? WHERE id = ? AND cached != ?")
                .bind(derived)
                .bind(Utc::now().timestamp_millis())
                .bind(parent_id)
                .bind(derived)
                .execute(&self.pool)
                .await?;

        Ok((result.rows_affected() > 0).then_some(derived))
    }

    async fn recompute_all_cached(&self) -> Result<Vec<(String, bool)>> {
        let sql = format!("{} GROUP BY p.id HAVING p.cached != derived", DERIVED_CACHED);
        let stale: Vec<(String, bool, bool)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now().timestamp_millis();
        let mut changed = Vec::with_capacity(stale.len());
        let mut tx = self.pool.begin().await?;

        for (parent_id, _, derived) in stale {
            let result = sqlx::query(
                "UPDATE parents SET cached = ?, updated_at = ? WHERE id = ? AND cached != ?",
            )
            .bind(derived)
            .bind(now)
            .bind(&parent_id)
            .bind(derived)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                changed.push((parent_id, derived));
            }
        }

        tx.commit().await?;
        debug!(changed = changed.len(), "Recomputed parent cached flags");

        Ok(changed)
    }

    async fn set_finished(&self, parent_id: &str, finished: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE parents SET finished = ?, updated_at = ? WHERE id = ? AND finished != ?",
        )
        .bind(finished)
        .bind(Utc::now().timestamp_millis())
        .bind(parent_id)
        .bind(finished)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
