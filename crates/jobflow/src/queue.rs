use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::{QueueError, Result};
use crate::jobs::{
    Job, JobState, JobsRepo, NewJob, Settings, SettingsRepo, WorkerRecord, WorkersRepo,
};

/// Read-only snapshot for `jobflowctl status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub jobs: BTreeMap<JobState, i64>,
    pub workers: Vec<WorkerRecord>,
    pub config: Settings,
}

/// Rows removed by [`Queue::cleanup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub jobs: u64,
    pub workers: u64,
    pub settings: u64,
}

/// Producer and status API. Expected conditions (duplicate id, unknown id,
/// wrong state) come back as `false`; only store problems are errors.
#[derive(Clone)]
pub struct Queue {
    pool: SqlitePool,
    jobs: JobsRepo,
    settings: SettingsRepo,
    workers: WorkersRepo,
}

impl Queue {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            jobs: JobsRepo::new(pool.clone()),
            settings: SettingsRepo::new(pool.clone()),
            workers: WorkersRepo::new(pool.clone()),
            pool,
        }
    }

    pub fn jobs(&self) -> &JobsRepo {
        &self.jobs
    }

    pub fn settings(&self) -> &SettingsRepo {
        &self.settings
    }

    pub async fn enqueue(&self, job: NewJob) -> Result<bool> {
        match self.jobs.enqueue(job, Utc::now()).await {
            Ok(_) => Ok(true),
            Err(QueueError::Duplicate(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.jobs.get_job(id).await
    }

    pub async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        self.jobs.list_jobs(state).await
    }

    pub async fn list_dlq_jobs(&self) -> Result<Vec<Job>> {
        self.jobs.list_jobs(Some(JobState::Dead)).await
    }

    pub async fn retry_dead_job(&self, id: &str) -> Result<bool> {
        match self.jobs.retry_dead(id, Utc::now()).await {
            Ok(_) => Ok(true),
            Err(QueueError::NotFound(_)) | Err(QueueError::InvalidState { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn delete_job(&self, id: &str) -> Result<bool> {
        self.jobs.delete(id).await
    }

    pub async fn status(&self, now: DateTime<Utc>) -> Result<StatusReport> {
        Ok(StatusReport {
            jobs: self.jobs.counts_by_state().await?,
            workers: self.workers.active(now).await?,
            config: self.settings.snapshot().await?,
        })
    }

    /// Wipe every job, worker record and stored setting in one transaction.
    /// Settings fall back to their defaults afterwards.
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let mut tx = self.pool.begin().await?;

        let jobs = sqlx::query("DELETE FROM jobs")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let workers = sqlx::query("DELETE FROM workers")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let settings = sqlx::query("DELETE FROM config")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        tracing::info!(jobs, workers, settings, "job store cleaned up");

        Ok(CleanupReport {
            jobs,
            workers,
            settings,
        })
    }
}
