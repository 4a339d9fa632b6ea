use std::ops::Deref;
use std::time::Duration;

use chrono::Utc;
use jobflow::db;
use jobflow::jobs::{Job, JobState, JobsRepo, NewJob};
use jobflow::WorkerOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// A fresh SQLite file per test, removed with its directory on drop.
pub struct TestDb {
    pub pool: SqlitePool,
    pub url: String,
    /// Kept alive for the duration of the test.
    _dir: TempDir,
}

impl TestDb {
    /// A second, independent pool on the same file.
    #[allow(dead_code)]
    pub async fn reopen(&self) -> SqlitePool {
        db::open(&self.url).await.expect("failed to reopen test database")
    }
}

impl Deref for TestDb {
    type Target = SqlitePool;

    fn deref(&self) -> &SqlitePool {
        &self.pool
    }
}

pub async fn setup_db() -> TestDb {
    let dir = TempDir::new().expect("failed to create temp dir");
    let url = format!("sqlite://{}", dir.path().join("jobflow.db").to_string_lossy());
    let pool = db::open(&url).await.expect("failed to open test database");
    TestDb { pool, url, _dir: dir }
}

#[allow(dead_code)]
pub async fn insert_job(pool: &SqlitePool, id: &str, command: &str, max_retries: i32) -> Job {
    JobsRepo::new(pool.clone())
        .enqueue(NewJob::new(id, command).max_retries(max_retries), Utc::now())
        .await
        .expect("failed to insert job")
}

#[allow(dead_code)]
pub async fn fetch_job(pool: &SqlitePool, id: &str) -> Job {
    JobsRepo::new(pool.clone())
        .get_job(id)
        .await
        .expect("get_job failed")
        .expect("job missing")
}

#[allow(dead_code)]
pub fn fast_options() -> WorkerOptions {
    WorkerOptions {
        poll_interval: Duration::from_millis(20),
        ..WorkerOptions::default()
    }
}

#[allow(dead_code)]
pub async fn wait_for_state(pool: &SqlitePool, id: &str, state: JobState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if fetch_job(pool, id).await.state == state {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} never reached {state}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
