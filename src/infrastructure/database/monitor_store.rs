//! Sqlite implementation of the monitor snapshot store.
//!
//! One row per (user, cube); the snapshot itself is a JSON document, updated
//! wholesale at sync boundaries.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::domain::error::StoreError;
use crate::domain::ports::{MonitorSnapshot, MonitorStore};

/// Monitor snapshot store over a sqlite pool.
pub struct SqliteMonitorStore {
    pool: SqlitePool,
}

impl SqliteMonitorStore {
    /// Create the store, ensuring the backing table exists.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS monitor_snapshots (
                user_id     TEXT NOT NULL,
                mem_cube_id TEXT NOT NULL,
                snapshot    TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (user_id, mem_cube_id)
            )
            ",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl MonitorStore for SqliteMonitorStore {
    async fn load(
        &self,
        user_id: &str,
        mem_cube_id: &str,
    ) -> Result<Option<MonitorSnapshot>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT snapshot FROM monitor_snapshots
            WHERE user_id = ? AND mem_cube_id = ?
            ",
        )
        .bind(user_id)
        .bind(mem_cube_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let payload: String = row.try_get("snapshot")?;
                let snapshot: MonitorSnapshot = serde_json::from_str(&payload)?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        user_id: &str,
        mem_cube_id: &str,
        snapshot: &MonitorSnapshot,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(snapshot)?;
        sqlx::query(
            r"
            INSERT INTO monitor_snapshots (user_id, mem_cube_id, snapshot, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, mem_cube_id)
            DO UPDATE SET snapshot = excluded.snapshot, updated_at = excluded.updated_at
            ",
        )
        .bind(user_id)
        .bind(mem_cube_id)
        .bind(payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::QueryRecord;
    use crate::infrastructure::database::DatabaseConnection;

    async fn store() -> SqliteMonitorStore {
        let conn = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        SqliteMonitorStore::new(conn.pool().clone()).await.unwrap()
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let store = store().await;
        assert!(store.load("u1", "c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let store = store().await;
        let snapshot = MonitorSnapshot {
            queries: vec![QueryRecord::new("persisted query", vec!["kw".to_string()])],
            working: Vec::new(),
        };
        store.save("u1", "c1", &snapshot).await.unwrap();
        let loaded = store.load("u1", "c1").await.unwrap().unwrap();
        assert_eq!(loaded.queries.len(), 1);
        assert_eq!(loaded.queries[0].query_text, "persisted query");
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = store().await;
        let first = MonitorSnapshot {
            queries: vec![QueryRecord::new("one", vec![])],
            working: Vec::new(),
        };
        store.save("u1", "c1", &first).await.unwrap();
        let second = MonitorSnapshot {
            queries: vec![
                QueryRecord::new("one", vec![]),
                QueryRecord::new("two", vec![]),
            ],
            working: Vec::new(),
        };
        store.save("u1", "c1", &second).await.unwrap();
        let loaded = store.load("u1", "c1").await.unwrap().unwrap();
        assert_eq!(loaded.queries.len(), 2);
    }
}
