//! Runtime status cache: one JSON snapshot per account, rewritten after
//! every poll so operators and sidecar tools can read current state without
//! touching the engine.

use std::collections::HashMap;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    sqlx::{Row, SqlitePool},
    tokio::sync::Mutex,
};

/// Published status of one watched account.
///
/// Field names are the external contract; tools parse this JSON directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub id: i64,
    pub uid: String,
    pub name: String,

    pub live: bool,
    pub live_title: String,
    pub live_online: i64,
    /// Uptime rendered as `H:MM:SS`; empty when offline.
    pub live_duration: String,
    pub live_url: String,

    pub last_dynamic_id: String,
    pub last_dynamic_text: String,
    pub last_dynamic_url: String,
    /// ISO-8601 UTC with a `Z` suffix; empty when unknown.
    pub last_dynamic_time: String,
    pub last_dynamic_title: String,
    /// "video" or "dynamic".
    pub last_dynamic_type: String,
    pub last_dynamic_video_url: String,
    pub last_dynamic_cover: String,
    pub last_dynamic_is_video: bool,

    /// ISO-8601 UTC `Z` timestamp of the poll that produced this snapshot.
    pub checked_at: String,
    pub poll_interval: u64,
    pub next_poll_at: String,
}

/// Persistence for status snapshots.
#[async_trait]
pub trait StatusCache: Send + Sync {
    async fn put(&self, snapshot: &StatusSnapshot) -> anyhow::Result<()>;
    async fn get(&self, account_id: i64) -> anyhow::Result<Option<StatusSnapshot>>;
    async fn all(&self) -> anyhow::Result<Vec<StatusSnapshot>>;
    async fn delete(&self, account_id: i64) -> anyhow::Result<()>;
}

/// Sqlite-backed cache. One row per account holding the serialized snapshot.
pub struct SqliteStatusCache {
    pool: SqlitePool,
}

impl SqliteStatusCache {
    pub async fn init(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS runtime_status (
                account_id INTEGER PRIMARY KEY,
                payload    TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl StatusCache for SqliteStatusCache {
    async fn put(&self, snapshot: &StatusSnapshot) -> anyhow::Result<()> {
        let payload = serde_json::to_string(snapshot)?;
        sqlx::query(
            "INSERT INTO runtime_status (account_id, payload, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(account_id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at",
        )
        .bind(snapshot.id)
        .bind(payload)
        .bind(&snapshot.checked_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, account_id: i64) -> anyhow::Result<Option<StatusSnapshot>> {
        let row = sqlx::query("SELECT payload FROM runtime_status WHERE account_id = ?1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let payload: String = row.try_get("payload")?;
                Ok(Some(serde_json::from_str(&payload)?))
            },
            None => Ok(None),
        }
    }

    async fn all(&self) -> anyhow::Result<Vec<StatusSnapshot>> {
        let rows = sqlx::query("SELECT payload FROM runtime_status ORDER BY account_id")
            .fetch_all(&self.pool)
            .await?;
        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.try_get("payload")?;
            snapshots.push(serde_json::from_str(&payload)?);
        }
        Ok(snapshots)
    }

    async fn delete(&self, account_id: i64) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM runtime_status WHERE account_id = ?1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory cache for tests and cache-less runs.
#[derive(Default)]
pub struct MemoryStatusCache {
    snapshots: Mutex<HashMap<i64, StatusSnapshot>>,
}

impl MemoryStatusCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusCache for MemoryStatusCache {
    async fn put(&self, snapshot: &StatusSnapshot) -> anyhow::Result<()> {
        self.snapshots
            .lock()
            .await
            .insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    async fn get(&self, account_id: i64) -> anyhow::Result<Option<StatusSnapshot>> {
        Ok(self.snapshots.lock().await.get(&account_id).cloned())
    }

    async fn all(&self) -> anyhow::Result<Vec<StatusSnapshot>> {
        let mut snapshots: Vec<_> = self.snapshots.lock().await.values().cloned().collect();
        snapshots.sort_by_key(|s| s.id);
        Ok(snapshots)
    }

    async fn delete(&self, account_id: i64) -> anyhow::Result<()> {
        self.snapshots.lock().await.remove(&account_id);
        Ok(())
    }
}
