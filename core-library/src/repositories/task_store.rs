//! SQLite-backed durable store for the background task queue
//!
//! One row per task key. Upserting an existing key replaces the stored
//! request, matching the queue's REPLACE semantics.

use async_trait::async_trait;
use bridge_traits::background::{TaskKey, TaskRequest, TaskStore};
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use sqlx::SqlitePool;
use tracing::warn;

pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn store_error(e: impl std::fmt::Display) -> BridgeError {
    BridgeError::OperationFailed(format!("Task store: {}", e))
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn upsert(&self, request: &TaskRequest) -> BridgeResult<()> {
        let encoded = serde_json::to_string(request).map_err(store_error)?;

        sqlx::query(
            r#"
            INSERT INTO pending_tasks (key, kind, request, enqueued_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                kind = excluded.kind,
                request = excluded.request,
                enqueued_at = excluded.enqueued_at
            "#,
        )
        .bind(request.key.as_str())
        .bind(&request.kind)
        .bind(encoded)
        .bind(request.enqueued_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(())
    }

    async fn remove(&self, key: &TaskKey) -> BridgeResult<()> {
        sqlx::query("DELETE FROM pending_tasks WHERE key = ?")
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

        Ok(())
    }

    async fn load_all(&self) -> BridgeResult<Vec<TaskRequest>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, request FROM pending_tasks ORDER BY enqueued_at, key")
                .fetch_all(&self.pool)
                .await
                .map_err(store_error)?;

        let mut requests = Vec::with_capacity(rows.len());
        for (key, encoded) in rows {
            match serde_json::from_str::<TaskRequest>(&encoded) {
                Ok(request) => requests.push(request),
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable stored task"),
            }
        }

        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use serde_json::json;

    fn request(key: &str, offset: u64) -> TaskRequest {
        TaskRequest::new(
            TaskKey::new(key),
            "sync.report_progress",
            json!({ "segment_id": key, "offset_ms": offset }),
        )
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_key() {
        let store = SqliteTaskStore::new(create_test_pool().await.unwrap());

        store.upsert(&request("progress:s1", 1_000)).await.unwrap();
        store.upsert(&request("progress:s1", 2_000)).await.unwrap();
        store.upsert(&request("progress:s2", 5)).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 2);
        let s1 = loaded
            .iter()
            .find(|r| r.key.as_str() == "progress:s1")
            .unwrap();
        assert_eq!(s1.payload["offset_ms"], 2_000);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = SqliteTaskStore::new(create_test_pool().await.unwrap());
        store.upsert(&request("progress:s1", 1)).await.unwrap();

        store.remove(&TaskKey::new("progress:s1")).await.unwrap();
        store.remove(&TaskKey::new("never-stored")).await.unwrap();

        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_all_skips_corrupt_rows() {
        let pool = create_test_pool().await.unwrap();
        let store = SqliteTaskStore::new(pool.clone());
        store.upsert(&request("progress:s1", 1)).await.unwrap();
        sqlx::query(
            "INSERT INTO pending_tasks (key, kind, request, enqueued_at) VALUES ('bad', 'x', '{', 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].key, TaskKey::new("progress:s1"));
    }
}
