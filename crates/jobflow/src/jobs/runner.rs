use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::jobs::{
    command::CommandOutput,
    model::Job,
    repo::JobsRepo,
    retry::RetryPolicy,
    settings::SettingsRepo,
};

/// Turns the result of running a leased job into its next state and
/// commits it. Every method works on a copy of the leased job, so a failed
/// commit can simply be attempted again with the same input.
#[derive(Clone)]
pub struct JobRunner {
    jobs: JobsRepo,
    settings: SettingsRepo,
    max_delay_seconds: Option<i64>,
}

impl JobRunner {
    pub fn new(jobs: JobsRepo, settings: SettingsRepo) -> Self {
        Self {
            jobs,
            settings,
            max_delay_seconds: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay_seconds: Option<i64>) -> Self {
        self.max_delay_seconds = max_delay_seconds;
        self
    }

    /// Built per failure so `config set backoff-base` takes effect without
    /// restarting workers.
    pub async fn retry_policy(&self) -> Result<RetryPolicy> {
        let base = self.settings.backoff_base().await?;
        Ok(RetryPolicy::new(base).with_max_delay(self.max_delay_seconds))
    }

    pub async fn on_success(&self, job: &Job, now: DateTime<Utc>) -> Result<Job> {
        let mut job = job.clone();
        job.complete(now)?;
        self.jobs.update(&job, now).await?;
        Ok(job)
    }

    pub async fn on_failure(
        &self,
        job: &Job,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        let policy = self.retry_policy().await?;
        let mut job = job.clone();
        job.record_failure(error_message, &policy, now)?;
        self.jobs.update(&job, now).await?;
        Ok(job)
    }

    /// Decide retry vs DLQ vs done from the command output and persist it.
    pub async fn settle(
        &self,
        job: &Job,
        output: &CommandOutput,
        now: DateTime<Utc>,
    ) -> Result<Job> {
        if output.success() {
            self.on_success(job, now).await
        } else {
            self.on_failure(job, &output.failure_message(), now).await
        }
    }
}
