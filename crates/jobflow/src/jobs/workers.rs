use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::Result;
use crate::jobs::model::ts;

/// A worker counts as active if it heartbeated within this window.
pub const ACTIVITY_WINDOW: Duration = Duration::from_secs(30);

pub const STATUS_RUNNING: &str = "running";
pub const STATUS_DRAINING: &str = "draining";

/// Ephemeral bookkeeping row for a live worker. Observability only: lease
/// reclaim never looks at this table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub status: String,
}

#[derive(Clone)]
pub struct WorkersRepo {
    pool: SqlitePool,
}

impl WorkersRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert: a restarted worker reusing its id starts a fresh record.
    pub async fn register(&self, worker_id: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workers (worker_id, started_at, last_heartbeat, status)
            VALUES (?1, ?2, ?2, ?3)
            ON CONFLICT(worker_id) DO UPDATE
            SET started_at = excluded.started_at,
                last_heartbeat = excluded.last_heartbeat,
                status = excluded.status
            "#,
        )
        .bind(worker_id)
        .bind(ts(now))
        .bind(STATUS_RUNNING)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns false if the record is gone (e.g. removed by an operator).
    pub async fn heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE workers
            SET last_heartbeat = MAX(last_heartbeat, ?2)
            WHERE worker_id = ?1
            "#,
        )
        .bind(worker_id)
        .bind(ts(now))
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn set_status(&self, worker_id: &str, status: &str) -> Result<()> {
        sqlx::query("UPDATE workers SET status = ?2 WHERE worker_id = ?1")
            .bind(worker_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove(&self, worker_id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM workers WHERE worker_id = ?1")
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Workers whose last heartbeat falls inside `ACTIVITY_WINDOW`, newest first.
    pub async fn active(&self, now: DateTime<Utc>) -> Result<Vec<WorkerRecord>> {
        let since = now - chrono::Duration::seconds(ACTIVITY_WINDOW.as_secs() as i64);
        let rows = sqlx::query_as::<_, WorkerRecord>(
            r#"
            SELECT worker_id, started_at, last_heartbeat, status
            FROM workers
            WHERE last_heartbeat >= ?1
            ORDER BY started_at DESC
            "#,
        )
        .bind(ts(since))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
