// crates/jobflow/src/jobs/repo.rs

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::{QueueError, Result};
use crate::jobs::model::{ts, Job, JobState, NewJob};
use crate::jobs::settings::SettingsRepo;

/// A lease older than this is considered abandoned, whoever holds it.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How many times `claim` reselects after losing the conditional update.
const CLAIM_RACE_RETRIES: usize = 3;

// Every statement here is read with `fetch_all`. SQLite only commits an
// autocommit write once the statement has been stepped to completion, and
// `fetch_one`/`fetch_optional` stop at the first row.

// Bind order everywhere below: ?1 = now, ?2 = lease cutoff.
// A stale lease makes a job claimable again whatever its state column says,
// as long as it was not finished (finished jobs never keep a lease).
const ELIGIBLE: &str = r#"
    (
        (state IN ('pending', 'failed') AND locked_by IS NULL)
        OR (
            state IN ('pending', 'failed', 'processing')
            AND locked_at IS NOT NULL
            AND locked_at < ?2
        )
    )
    AND (next_retry_at IS NULL OR next_retry_at <= ?1)
"#;

#[derive(Clone)]
pub struct JobsRepo {
    pool: SqlitePool,
    lease_timeout: chrono::Duration,
}

impl JobsRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_lease_timeout(pool, DEFAULT_LEASE_TIMEOUT)
    }

    pub fn with_lease_timeout(pool: SqlitePool, lease_timeout: Duration) -> Self {
        let secs = i64::try_from(lease_timeout.as_secs()).unwrap_or(i64::MAX / 1000);
        Self {
            pool,
            lease_timeout: chrono::Duration::seconds(secs.min(i64::MAX / 1000)),
        }
    }

    pub fn lease_timeout(&self) -> chrono::Duration {
        self.lease_timeout
    }

    // ----------------------------
    // Enqueue
    // ----------------------------

    /// Insert a new pending job. All-or-nothing: an existing id yields
    /// `QueueError::Duplicate` and leaves the stored job untouched.
    pub async fn enqueue(&self, job: NewJob, now: DateTime<Utc>) -> Result<Job> {
        if job.id.trim().is_empty() {
            return Err(QueueError::InvalidArgument("job id must not be empty".into()));
        }
        if job.command.trim().is_empty() {
            return Err(QueueError::InvalidArgument(
                "job command must not be empty".into(),
            ));
        }

        let max_retries = match job.max_retries {
            Some(n) if n < 0 => {
                return Err(QueueError::InvalidArgument(format!(
                    "max_retries must not be negative, got {n}"
                )))
            }
            Some(n) if n > 0 => n,
            _ => SettingsRepo::new(self.pool.clone()).max_retries().await?,
        };

        let now = ts(now);
        let inserted = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries, created_at, updated_at)
            VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?4)
            RETURNING *
            "#,
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(max_retries)
        .bind(&now)
        .fetch_all(&self.pool)
        .await;

        match inserted {
            Ok(rows) => rows
                .into_iter()
                .next()
                .ok_or_else(|| QueueError::Corrupt(format!("insert of job '{}' returned no row", job.id))),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(QueueError::Duplicate(job.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let rows = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Newest first. `None` lists every job.
    pub async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let rows = match state {
            Some(state) => {
                sqlx::query_as::<_, Job>(
                    r#"
                    SELECT * FROM jobs
                    WHERE state = ?1
                    ORDER BY created_at DESC, rowid DESC
                    "#,
                )
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Job>(
                    r#"
                    SELECT * FROM jobs
                    ORDER BY created_at DESC, rowid DESC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    /// Every state is present in the result, zero when no job is in it.
    pub async fn counts_by_state(&self) -> Result<BTreeMap<JobState, i64>> {
        let rows = sqlx::query_as::<_, (JobState, i64)>(
            "SELECT state, COUNT(*) FROM jobs GROUP BY state",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts: BTreeMap<JobState, i64> =
            JobState::ALL.iter().map(|s| (*s, 0)).collect();
        for (state, count) in rows {
            counts.insert(state, count);
        }
        Ok(counts)
    }

    // ----------------------------
    // Claim (lease)
    // ----------------------------

    /// Lease exactly one eligible job for `worker_id`, oldest first.
    ///
    /// Selection and lease assignment are two statements, so the second one
    /// re-checks eligibility: if another worker got there first it touches
    /// zero rows and we pick again. Returns `None` when nothing is eligible
    /// or every race was lost.
    pub async fn claim(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Job>> {
        let now_ts = ts(now);
        let cutoff = ts(now - self.lease_timeout);

        let select_sql = format!(
            "SELECT id FROM jobs WHERE {ELIGIBLE} ORDER BY created_at ASC, rowid ASC LIMIT 1"
        );
        let lease_sql = format!(
            r#"
            UPDATE jobs
            SET state = 'processing',
                locked_by = ?3,
                locked_at = ?1,
                next_retry_at = NULL,
                updated_at = MAX(updated_at, ?1)
            WHERE id = ?4
              AND {ELIGIBLE}
            RETURNING *
            "#
        );

        for _ in 0..CLAIM_RACE_RETRIES {
            let candidate = sqlx::query_scalar::<_, String>(&select_sql)
                .bind(&now_ts)
                .bind(&cutoff)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .next();

            let Some(job_id) = candidate else {
                return Ok(None);
            };

            let leased = sqlx::query_as::<_, Job>(&lease_sql)
                .bind(&now_ts)
                .bind(&cutoff)
                .bind(worker_id)
                .bind(&job_id)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .next();

            match leased {
                Some(job) => return Ok(Some(job)),
                None => {
                    tracing::debug!(worker_id, job_id = %job_id, "lost claim race, reselecting");
                }
            }
        }

        Ok(None)
    }

    // ----------------------------
    // Commit
    // ----------------------------

    /// Persist the outcome of an attempt for a job this caller holds the
    /// lease on. Always releases the lease, so `Processing` is refused.
    pub async fn update(&self, job: &Job, now: DateTime<Utc>) -> Result<()> {
        if job.state == JobState::Processing {
            return Err(QueueError::invalid_state(
                &job.id,
                job.state,
                "be committed without an outcome",
            ));
        }

        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?2,
                attempts = ?3,
                error_message = ?4,
                next_retry_at = ?5,
                updated_at = MAX(updated_at, ?6),
                locked_by = NULL,
                locked_at = NULL
            WHERE id = ?1
            "#,
        )
        .bind(&job.id)
        .bind(job.state.as_str())
        .bind(job.attempts)
        .bind(job.error_message.as_deref())
        .bind(job.next_retry_at.map(ts))
        .bind(ts(now.max(job.updated_at)))
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(QueueError::NotFound(job.id.clone()));
        }
        Ok(())
    }

    // ----------------------------
    // Administration
    // ----------------------------

    /// Move a dead job back to pending with a fresh retry budget.
    pub async fn retry_dead(&self, id: &str, now: DateTime<Utc>) -> Result<Job> {
        let mut job = self
            .get_job(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        job.reset_for_retry(now)?;

        // Conditional on the state we just read; a concurrent change wins.
        let reset = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET state = 'pending',
                attempts = 0,
                error_message = NULL,
                next_retry_at = NULL,
                locked_by = NULL,
                locked_at = NULL,
                updated_at = MAX(updated_at, ?2)
            WHERE id = ?1
              AND state = 'dead'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(ts(job.updated_at))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .next();

        match reset {
            Some(job) => Ok(job),
            None => match self.get_job(id).await? {
                Some(current) => Err(QueueError::invalid_state(id, current.state, "be retried")),
                None => Err(QueueError::NotFound(id.to_string())),
            },
        }
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
