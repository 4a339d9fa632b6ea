use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::error::Result;

/// Open (creating if missing) the SQLite store behind `database_url`.
///
/// WAL lets readers proceed while one writer holds the lock; the busy
/// timeout makes concurrent writers queue instead of failing outright.
pub async fn make_pool(database_url: &str) -> Result<SqlitePool> {
    let max_connections = std::env::var("JOBFLOW_DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(4)
        .clamp(1, 32);

    let busy_timeout_secs = std::env::var("JOBFLOW_DB_BUSY_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(5)
        .clamp(1, 60);

    let opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(busy_timeout_secs));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(busy_timeout_secs * 2))
        .connect_with(opts)
        .await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// `make_pool` followed by migrations.
pub async fn open(database_url: &str) -> Result<SqlitePool> {
    let pool = make_pool(database_url).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
