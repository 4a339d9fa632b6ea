//! jobflow: a persistent shell-command job queue on SQLite.
//!
//! Producers enqueue jobs through [`queue::Queue`]; any number of
//! [`worker::Worker`] loops lease them with [`jobs::JobsRepo::claim`], run the
//! command, and commit the outcome. Failed jobs are retried with exponential
//! backoff until their budget runs out, then parked in the dead letter queue.

pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod queue;
pub mod telemetry;
pub mod worker;

pub use error::{QueueError, Result};
pub use queue::{CleanupReport, Queue, StatusReport};
pub use worker::{Worker, WorkerOptions, WorkerPhase};
