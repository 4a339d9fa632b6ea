use std::time::Duration;

use jobflow::config::Config;
use jobflow::jobs::DEFAULT_LEASE_TIMEOUT;
use serial_test::serial;

const VARS: &[&str] = &[
    "JOBFLOW_DATABASE_URL",
    "DATABASE_URL",
    "JOBFLOW_WORKER_ID",
    "WORKER_ID",
    "JOBFLOW_WORKER_COUNT",
    "WORKER_COUNT",
    "JOBFLOW_LEASE_SECONDS",
    "LEASE_SECONDS",
    "JOBFLOW_POLL_INTERVAL_MS",
    "POLL_INTERVAL_MS",
    "JOBFLOW_COMMAND_TIMEOUT_SECS",
    "COMMAND_TIMEOUT_SECS",
    "JOBFLOW_MAX_BACKOFF_SECONDS",
    "MAX_BACKOFF_SECONDS",
    "JOBFLOW_MAX_STORE_FAILURES",
    "MAX_STORE_FAILURES",
    "JOBFLOW_MIGRATE_ON_STARTUP",
    "JOBFLOW_LOG_JSON",
];

fn clear_env() {
    for v in VARS {
        std::env::remove_var(v);
    }
}

#[test]
#[serial]
fn config_defaults() {
    clear_env();
    std::env::set_var("JOBFLOW_DATABASE_URL", "sqlite::memory:");

    let cfg = Config::from_env().unwrap();

    assert_eq!(cfg.database_url, "sqlite::memory:");
    assert!(cfg.worker_id.starts_with("worker-"));
    assert_eq!(cfg.worker_count, 1);
    assert_eq!(cfg.lease_timeout, DEFAULT_LEASE_TIMEOUT);
    assert_eq!(cfg.poll_interval, Duration::from_secs(1));
    assert_eq!(cfg.command_timeout, Duration::from_secs(300));
    assert_eq!(cfg.max_backoff_seconds, None);
    assert_eq!(cfg.max_store_failures, None);
    assert!(cfg.migrate_on_startup);
    assert!(!cfg.log_json);

    clear_env();
}

#[test]
#[serial]
fn config_reads_prefixed_variables() {
    clear_env();
    std::env::set_var("JOBFLOW_DATABASE_URL", "sqlite:///tmp/jobflow-config-test.db");
    std::env::set_var("JOBFLOW_WORKER_ID", "box-7");
    std::env::set_var("JOBFLOW_WORKER_COUNT", "4");
    std::env::set_var("JOBFLOW_LEASE_SECONDS", "900");
    std::env::set_var("JOBFLOW_POLL_INTERVAL_MS", "250");
    std::env::set_var("JOBFLOW_COMMAND_TIMEOUT_SECS", "60");
    std::env::set_var("JOBFLOW_MAX_BACKOFF_SECONDS", "3600");
    std::env::set_var("JOBFLOW_MAX_STORE_FAILURES", "10");
    std::env::set_var("JOBFLOW_MIGRATE_ON_STARTUP", "false");
    std::env::set_var("JOBFLOW_LOG_JSON", "yes");

    let cfg = Config::from_env().unwrap();

    assert_eq!(cfg.database_url, "sqlite:///tmp/jobflow-config-test.db");
    assert_eq!(cfg.worker_id, "box-7");
    assert_eq!(cfg.worker_count, 4);
    assert_eq!(cfg.lease_timeout, Duration::from_secs(900));
    assert_eq!(cfg.poll_interval, Duration::from_millis(250));
    assert_eq!(cfg.command_timeout, Duration::from_secs(60));
    assert_eq!(cfg.max_backoff_seconds, Some(3600));
    assert_eq!(cfg.max_store_failures, Some(10));
    assert!(!cfg.migrate_on_startup);
    assert!(cfg.log_json);

    clear_env();
}

#[test]
#[serial]
fn config_falls_back_to_unprefixed_and_ignores_junk() {
    clear_env();
    std::env::set_var("DATABASE_URL", "sqlite::memory:");
    std::env::set_var("WORKER_ID", "plain");
    std::env::set_var("JOBFLOW_WORKER_COUNT", "0");
    std::env::set_var("JOBFLOW_LEASE_SECONDS", "soon");
    std::env::set_var("JOBFLOW_MAX_BACKOFF_SECONDS", "-5");

    let cfg = Config::from_env().unwrap();

    assert_eq!(cfg.database_url, "sqlite::memory:");
    assert_eq!(cfg.worker_id, "plain");
    assert_eq!(cfg.worker_count, 1);
    assert_eq!(cfg.lease_timeout, DEFAULT_LEASE_TIMEOUT);
    assert_eq!(cfg.max_backoff_seconds, None);

    clear_env();
}
