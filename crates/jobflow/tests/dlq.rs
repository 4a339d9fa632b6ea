mod common;

use common::{fetch_job, insert_job, setup_db};

use chrono::Utc;
use jobflow::jobs::{JobRunner, JobState, JobsRepo, SettingsRepo};
use jobflow::{Queue, QueueError};
use sqlx::SqlitePool;

async fn kill_job(pool: &SqlitePool, id: &str) {
    let jobs = JobsRepo::new(pool.clone());
    let runner = JobRunner::new(jobs.clone(), SettingsRepo::new(pool.clone()));

    insert_job(pool, id, "exit 1", 1).await;
    let now = Utc::now();
    let job = jobs.claim("worker-a", now).await.unwrap().unwrap();
    let dead = runner.on_failure(&job, "permanent failure", now).await.unwrap();
    assert_eq!(dead.state, JobState::Dead);
}

#[tokio::test]
async fn dlq_lists_only_dead_jobs() {
    let pool = setup_db().await;
    let queue = Queue::new(pool.clone());

    kill_job(&pool, "dead-1").await;
    insert_job(&pool, "alive", "true", 3).await;

    let dlq = queue.list_dlq_jobs().await.unwrap();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].id, "dead-1");
    assert_eq!(dlq[0].error_message.as_deref(), Some("permanent failure"));
}

#[tokio::test]
async fn dlq_retry_resets_job_to_pending() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());

    kill_job(&pool, "revive").await;
    let before = fetch_job(&pool, "revive").await;

    let reset = jobs.retry_dead("revive", Utc::now()).await.unwrap();
    assert_eq!(reset.state, JobState::Pending);
    assert_eq!(reset.attempts, 0);
    assert!(reset.error_message.is_none());
    assert!(reset.next_retry_at.is_none());
    assert!(reset.locked_by.is_none());
    assert!(reset.updated_at >= before.updated_at);
    assert_eq!(reset.created_at, before.created_at);
    assert_eq!(reset.max_retries, before.max_retries);

    // And it is immediately claimable again.
    let claimed = jobs.claim("worker-b", Utc::now()).await.unwrap().unwrap();
    assert_eq!(claimed.id, "revive");
}

#[tokio::test]
async fn dlq_retry_refuses_job_that_is_not_dead() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());

    insert_job(&pool, "pending", "true", 3).await;

    let err = jobs.retry_dead("pending", Utc::now()).await.unwrap_err();
    match err {
        QueueError::InvalidState { id, state, .. } => {
            assert_eq!(id, "pending");
            assert_eq!(state, JobState::Pending);
        }
        other => panic!("expected InvalidState, got {other:?}"),
    }

    let unchanged = fetch_job(&pool, "pending").await;
    assert_eq!(unchanged.state, JobState::Pending);
}

#[tokio::test]
async fn dlq_retry_unknown_job_is_not_found() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());

    let err = jobs.retry_dead("ghost", Utc::now()).await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(id) if id == "ghost"));
}

#[tokio::test]
async fn dlq_queue_facade_reports_plain_booleans() {
    let pool = setup_db().await;
    let queue = Queue::new(pool.clone());

    kill_job(&pool, "dead-1").await;
    insert_job(&pool, "alive", "true", 3).await;

    assert!(queue.retry_dead_job("dead-1").await.unwrap());
    assert!(!queue.retry_dead_job("dead-1").await.unwrap(), "already pending");
    assert!(!queue.retry_dead_job("alive").await.unwrap());
    assert!(!queue.retry_dead_job("ghost").await.unwrap());

    assert!(queue.list_dlq_jobs().await.unwrap().is_empty());
}
