use jobflow::config::Config;
use jobflow::jobs::ShellRunner;
use jobflow::{db, telemetry, worker, Worker, WorkerOptions};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    telemetry::init(cfg.log_json);

    // `worker [count]` overrides JOBFLOW_WORKER_COUNT.
    let count = match std::env::args().nth(1) {
        Some(arg) => match arg.parse::<usize>() {
            Ok(n) if n >= 1 => n,
            _ => {
                eprintln!("usage: worker [count]   (count must be a positive integer)");
                std::process::exit(2);
            }
        },
        None => cfg.worker_count,
    };

    tracing::info!(
        worker_id = %cfg.worker_id,
        count,
        database_url = %cfg.database_url,
        lease_secs = cfg.lease_timeout.as_secs(),
        poll_interval_ms = cfg.poll_interval.as_millis() as u64,
        command_timeout_secs = cfg.command_timeout.as_secs(),
        migrate_on_startup = cfg.migrate_on_startup,
        "jobflow worker starting"
    );

    if cfg.lease_timeout <= cfg.command_timeout {
        tracing::warn!(
            lease_secs = cfg.lease_timeout.as_secs(),
            command_timeout_secs = cfg.command_timeout.as_secs(),
            "lease timeout does not exceed command timeout; slow jobs may run twice"
        );
    }

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    // SIGINT / SIGTERM drain every loop.
    let shutdown = CancellationToken::new();
    worker::cancel_on_signal(shutdown.clone())?;

    let options = WorkerOptions::from(&cfg);

    let mut join_set = JoinSet::new();
    for n in 1..=count {
        let worker = Worker::new(
            format!("{}-{n}", cfg.worker_id),
            pool.clone(),
            ShellRunner::new(cfg.command_timeout),
            options.clone(),
        );
        join_set.spawn(worker.run(shutdown.child_token()));
    }

    let mut total = 0u64;
    let mut failed = false;
    while let Some(joined) = join_set.join_next().await {
        match joined? {
            Ok(processed) => total += processed,
            Err(e) => {
                tracing::error!(error = %e, "worker exited with error");
                failed = true;
                // One dead worker takes the rest down cleanly.
                shutdown.cancel();
            }
        }
    }

    pool.close().await;
    tracing::info!(processed = total, "all workers stopped");

    if failed {
        anyhow::bail!("one or more workers failed");
    }
    Ok(())
}
