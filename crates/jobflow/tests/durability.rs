mod common;

use common::{fetch_job, insert_job, setup_db};

use chrono::Utc;
use jobflow::jobs::{JobRunner, JobState, JobsRepo, SettingsRepo};

// Every write is checked from an independent pool on the same file, first
// while the writing pool is still open and again after it was dropped
// without `close()`.

#[tokio::test]
async fn enqueue_is_visible_to_other_connections_immediately() {
    let db = setup_db().await;
    let writer = db.reopen().await;

    insert_job(&writer, "seen", "echo hi", 2).await;

    let job = fetch_job(&db, "seen").await;
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.max_retries, 2);

    drop(writer);
    let after = db.reopen().await;
    assert_eq!(fetch_job(&after, "seen").await.state, JobState::Pending);
}

#[tokio::test]
async fn claim_is_visible_to_other_connections_immediately() {
    let db = setup_db().await;
    insert_job(&db, "leased", "echo hi", 3).await;

    let writer = db.reopen().await;
    let leased = JobsRepo::new(writer.clone())
        .claim("worker-a", Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(leased.id, "leased");

    let stored = fetch_job(&db, "leased").await;
    assert_eq!(stored.state, JobState::Processing);
    assert_eq!(stored.locked_by.as_deref(), Some("worker-a"));

    // A second claimer elsewhere must already see the lease.
    assert!(JobsRepo::new(db.pool.clone())
        .claim("worker-b", Utc::now())
        .await
        .unwrap()
        .is_none());

    drop(writer);
    let after = db.reopen().await;
    let stored = fetch_job(&after, "leased").await;
    assert_eq!(stored.state, JobState::Processing);
    assert_eq!(stored.locked_by.as_deref(), Some("worker-a"));
}

#[tokio::test]
async fn dlq_retry_is_visible_to_other_connections_immediately() {
    let db = setup_db().await;
    insert_job(&db, "doomed", "false", 1).await;

    let repo = JobsRepo::new(db.pool.clone());
    let runner = JobRunner::new(repo.clone(), SettingsRepo::new(db.pool.clone()));
    let now = Utc::now();
    let job = repo.claim("worker-a", now).await.unwrap().unwrap();
    assert_eq!(
        runner.on_failure(&job, "nope", now).await.unwrap().state,
        JobState::Dead
    );

    let writer = db.reopen().await;
    let revived = JobsRepo::new(writer.clone())
        .retry_dead("doomed", Utc::now())
        .await
        .unwrap();
    assert_eq!(revived.state, JobState::Pending);

    let stored = fetch_job(&db, "doomed").await;
    assert_eq!(stored.state, JobState::Pending);
    assert_eq!(stored.attempts, 0);

    drop(writer);
    let after = db.reopen().await;
    assert_eq!(fetch_job(&after, "doomed").await.state, JobState::Pending);
}

#[tokio::test]
async fn settings_are_visible_to_other_connections_immediately() {
    let db = setup_db().await;

    let writer = db.reopen().await;
    SettingsRepo::new(writer.clone())
        .set_backoff_base(5)
        .await
        .unwrap();

    let observer = SettingsRepo::new(db.pool.clone());
    assert_eq!(observer.backoff_base().await.unwrap(), 5);

    drop(writer);
    let after = db.reopen().await;
    assert_eq!(SettingsRepo::new(after).backoff_base().await.unwrap(), 5);
}
