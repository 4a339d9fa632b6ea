//! The worker loop: heartbeat, claim, execute, commit, and drain on request.
//!
//! Workers share nothing in memory. Everything they agree on goes through
//! the store's conditional claim, so any number of loops (tasks or
//! processes) can run against one database.

use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::QueueError;
use crate::jobs::{
    workers::STATUS_DRAINING, CommandRunner, Job, JobRunner, JobState, JobsRepo, SettingsRepo,
    WorkersRepo, DEFAULT_LEASE_TIMEOUT,
};

const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub poll_interval: Duration,
    pub lease_timeout: Duration,
    pub max_backoff_seconds: Option<i64>,
    pub max_store_failures: Option<u32>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            max_backoff_seconds: None,
            max_store_failures: None,
        }
    }
}

impl From<&Config> for WorkerOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            poll_interval: cfg.poll_interval,
            lease_timeout: cfg.lease_timeout,
            max_backoff_seconds: cfg.max_backoff_seconds,
            max_store_failures: cfg.max_store_failures,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Starting,
    Running,
    Draining,
    Stopped,
}

pub struct Worker<R> {
    id: String,
    jobs: JobsRepo,
    workers: WorkersRepo,
    runner: JobRunner,
    commands: R,
    options: WorkerOptions,
    phase: watch::Sender<WorkerPhase>,
    processed: u64,
}

impl<R: CommandRunner> Worker<R> {
    /// Each worker owns its own repo handles over `pool`.
    pub fn new(id: impl Into<String>, pool: SqlitePool, commands: R, options: WorkerOptions) -> Self {
        let jobs = JobsRepo::with_lease_timeout(pool.clone(), options.lease_timeout);
        let runner = JobRunner::new(jobs.clone(), SettingsRepo::new(pool.clone()))
            .with_max_delay(options.max_backoff_seconds);

        Self {
            id: id.into(),
            jobs,
            workers: WorkersRepo::new(pool),
            runner,
            commands,
            options,
            phase: watch::channel(WorkerPhase::Starting).0,
            processed: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> WorkerPhase {
        *self.phase.borrow()
    }

    /// Follow the phase from outside once `run` has taken the worker.
    pub fn subscribe(&self) -> watch::Receiver<WorkerPhase> {
        self.phase.subscribe()
    }

    /// Run until `shutdown` fires. A job already claimed when that happens is
    /// finished and committed first. Returns the number of jobs processed.
    pub async fn run(mut self, shutdown: CancellationToken) -> anyhow::Result<u64> {
        let result = match self.register(&shutdown).await {
            Ok(()) => {
                self.phase.send_replace(WorkerPhase::Running);
                tracing::info!(worker_id = %self.id, "worker started");

                let result = self.poll_loop(&shutdown).await;
                if let Err(e) = self.workers.remove(&self.id).await {
                    tracing::warn!(worker_id = %self.id, error = %e, "failed to deregister worker");
                }
                result
            }
            Err(e) => Err(e),
        };
        self.phase.send_replace(WorkerPhase::Stopped);

        match &result {
            Ok(()) => tracing::info!(worker_id = %self.id, processed = self.processed, "worker stopped"),
            Err(e) => tracing::error!(worker_id = %self.id, error = %e, "worker stopped on error"),
        }
        result.map(|()| self.processed)
    }

    async fn register(&self, shutdown: &CancellationToken) -> anyhow::Result<()> {
        let mut failures = 0;
        loop {
            match self.workers.register(&self.id, Utc::now()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    self.check_failure_budget(failures, &e)?;
                    tracing::warn!(worker_id = %self.id, error = %e, failures, "register failed, retrying");
                    if sleep_or_cancel(self.error_backoff(failures), shutdown).await {
                        anyhow::bail!("shutdown requested before worker {} registered", self.id);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn poll_loop(&mut self, shutdown: &CancellationToken) -> anyhow::Result<()> {
        let mut failures = 0;

        while !shutdown.is_cancelled() {
            match self.poll_once().await {
                Ok(Some(job)) => {
                    failures = 0;
                    self.process(job, shutdown).await?;
                }
                Ok(None) => {
                    failures = 0;
                    sleep_or_cancel(self.options.poll_interval, shutdown).await;
                }
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    self.check_failure_budget(failures, &e)?;
                    tracing::warn!(worker_id = %self.id, error = %e, failures, "poll failed, backing off");
                    sleep_or_cancel(self.error_backoff(failures), shutdown).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.enter_draining().await;
        Ok(())
    }

    /// First sighting of cancellation: mark the worker record so `status`
    /// shows it while an in-flight job finishes, then publish `Draining`.
    async fn enter_draining(&self) {
        if self.phase() == WorkerPhase::Draining {
            return;
        }
        tracing::info!(worker_id = %self.id, "shutdown requested, draining");
        if let Err(e) = self.workers.set_status(&self.id, STATUS_DRAINING).await {
            tracing::debug!(worker_id = %self.id, error = %e, "could not mark worker draining");
        }
        self.phase.send_replace(WorkerPhase::Draining);
    }

    /// One heartbeat plus one claim attempt.
    async fn poll_once(&self) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        if !self.workers.heartbeat(&self.id, now).await? {
            // Record vanished underneath us; put it back.
            self.workers.register(&self.id, now).await?;
        }
        self.jobs.claim(&self.id, now).await
    }

    /// Execute a leased job and commit the outcome. The commit is retried
    /// until it lands (the lease is only released by a successful commit),
    /// and is deliberately not interrupted by shutdown.
    async fn process(&mut self, job: Job, shutdown: &CancellationToken) -> anyhow::Result<()> {
        tracing::info!(
            worker_id = %self.id,
            job_id = %job.id,
            command = %job.command,
            attempt = job.attempts + 1,
            max_retries = job.max_retries,
            "processing job"
        );

        let output = {
            let mut run = self.commands.run(&job.command);
            tokio::select! {
                out = &mut run => out,
                _ = shutdown.cancelled() => {
                    self.enter_draining().await;
                    run.await
                }
            }
        };
        let mut failures = 0;

        loop {
            match self.runner.settle(&job, &output, Utc::now()).await {
                Ok(settled) => {
                    self.processed += 1;
                    log_outcome(&self.id, &settled);
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    self.check_failure_budget(failures, &e)?;
                    tracing::warn!(worker_id = %self.id, job_id = %job.id, error = %e, failures, "commit failed, retrying");
                    tokio::time::sleep(self.error_backoff(failures)).await;
                }
                Err(QueueError::NotFound(_)) => {
                    tracing::warn!(worker_id = %self.id, job_id = %job.id, "job deleted while running, result discarded");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn check_failure_budget(&self, failures: u32, err: &QueueError) -> anyhow::Result<()> {
        if let Some(max) = self.options.max_store_failures {
            if failures >= max {
                anyhow::bail!(
                    "worker {}: {failures} consecutive store failures, last: {err}",
                    self.id
                );
            }
        }
        Ok(())
    }

    fn error_backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.min(16));
        self.options
            .poll_interval
            .saturating_mul(factor)
            .min(MAX_ERROR_BACKOFF)
    }
}

fn log_outcome(worker_id: &str, job: &Job) {
    match job.state {
        JobState::Completed => {
            tracing::info!(worker_id, job_id = %job.id, attempts = job.attempts, "job completed")
        }
        JobState::Failed => tracing::warn!(
            worker_id,
            job_id = %job.id,
            attempts = job.attempts,
            max_retries = job.max_retries,
            next_retry_at = ?job.next_retry_at,
            error = job.error_message.as_deref().unwrap_or_default(),
            "job failed, retry scheduled"
        ),
        JobState::Dead => tracing::error!(
            worker_id,
            job_id = %job.id,
            attempts = job.attempts,
            error = job.error_message.as_deref().unwrap_or_default(),
            "job moved to DLQ"
        ),
        other => tracing::debug!(worker_id, job_id = %job.id, state = %other, "job settled"),
    }
}

/// Cancel `shutdown` on the first SIGINT (Ctrl-C) or SIGTERM.
///
/// Handlers are installed before this returns, so a signal arriving right
/// after the call is not lost.
#[cfg(unix)]
pub fn cancel_on_signal(shutdown: CancellationToken) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        tracing::info!(signal = name, "shutdown signal received, finishing in-flight jobs");
        shutdown.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn cancel_on_signal(shutdown: CancellationToken) -> std::io::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, finishing in-flight jobs");
            shutdown.cancel();
        }
    });
    Ok(())
}

/// Sleep for `dur`, waking early on shutdown. Returns true if cancelled.
async fn sleep_or_cancel(dur: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(dur) => false,
        _ = shutdown.cancelled() => true,
    }
}
