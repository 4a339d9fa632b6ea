pub mod command;
pub mod model;
pub mod repo;
pub mod retry;
pub mod runner;
pub mod settings;
pub mod workers;

pub use command::{CommandOutput, CommandRunner, ShellRunner};
pub use model::{Job, JobState, NewJob};
pub use repo::{JobsRepo, DEFAULT_LEASE_TIMEOUT};
pub use retry::RetryPolicy;
pub use runner::JobRunner;
pub use settings::{SettingKey, Settings, SettingsRepo};
pub use workers::{WorkerRecord, WorkersRepo, ACTIVITY_WINDOW};
