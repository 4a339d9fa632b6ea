use std::path::PathBuf;
use std::time::Duration;

use crate::jobs::command::DEFAULT_COMMAND_TIMEOUT;
use crate::jobs::repo::DEFAULT_LEASE_TIMEOUT;

/// Runtime configuration shared by `jobflowctl` and the worker binary.
///
/// Values come from the environment (a `.env` file is honoured). Every
/// `JOBFLOW_*` variable also has an un-prefixed fallback.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    pub worker_count: usize,
    pub lease_timeout: Duration,
    pub poll_interval: Duration,
    pub command_timeout: Duration,
    pub max_backoff_seconds: Option<i64>,
    /// Consecutive store failures a worker tolerates before giving up.
    /// `None` retries forever.
    pub max_store_failures: Option<u32>,
    pub migrate_on_startup: bool,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = match env_or_fallback("JOBFLOW_DATABASE_URL", "DATABASE_URL") {
            Some(url) => url,
            None => default_database_url()?,
        };

        let worker_id = env_or_fallback("JOBFLOW_WORKER_ID", "WORKER_ID")
            .unwrap_or_else(|| format!("worker-{}", short_id()));

        let worker_count = env_or_fallback("JOBFLOW_WORKER_COUNT", "WORKER_COUNT")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);

        let lease_seconds = env_or_fallback("JOBFLOW_LEASE_SECONDS", "LEASE_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_LEASE_TIMEOUT.as_secs());

        let poll_interval_ms = env_or_fallback("JOBFLOW_POLL_INTERVAL_MS", "POLL_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1000);

        let command_timeout_secs =
            env_or_fallback("JOBFLOW_COMMAND_TIMEOUT_SECS", "COMMAND_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT.as_secs());

        let max_backoff_seconds =
            env_or_fallback("JOBFLOW_MAX_BACKOFF_SECONDS", "MAX_BACKOFF_SECONDS")
                .and_then(|s| s.parse::<i64>().ok())
                .filter(|n| *n > 0);

        let max_store_failures =
            env_or_fallback("JOBFLOW_MAX_STORE_FAILURES", "MAX_STORE_FAILURES")
                .and_then(|s| s.parse::<u32>().ok())
                .filter(|n| *n > 0);

        let migrate_on_startup = env_bool("JOBFLOW_MIGRATE_ON_STARTUP").unwrap_or(true);
        let log_json = env_bool("JOBFLOW_LOG_JSON").unwrap_or(false);

        Ok(Self {
            database_url,
            worker_id,
            worker_count,
            lease_timeout: Duration::from_secs(lease_seconds),
            poll_interval: Duration::from_millis(poll_interval_ms),
            command_timeout: Duration::from_secs(command_timeout_secs),
            max_backoff_seconds,
            max_store_failures,
            migrate_on_startup,
            log_json,
        })
    }
}

/// `~/.jobflow/jobflow.db`, creating the directory if needed.
fn default_database_url() -> anyhow::Result<String> {
    let home = dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("cannot locate home directory; set JOBFLOW_DATABASE_URL"))?;
    let dir: PathBuf = home.join(".jobflow");
    std::fs::create_dir_all(&dir)?;
    Ok(format!("sqlite://{}", dir.join("jobflow.db").to_string_lossy()))
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
