use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{Sqlite, SqliteTypeInfo, SqliteValueRef};

use crate::error::{QueueError, Result};
use crate::jobs::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: i32,
    pub max_retries: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub error_message: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,

    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
}

/// What a producer hands to the store. `max_retries` of `None` (or 0) means
/// "use the configured default".
#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub max_retries: Option<i32>,
}

impl NewJob {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            max_retries: None,
        }
    }

    pub fn max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }

    /// Legal edges of the job lifecycle. `Dead -> Pending` is the operator reset,
    /// `Processing -> Processing` is a reclaim of an expired lease.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Failed, Processing)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Dead)
                | (Dead, Pending)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(QueueError::InvalidArgument(format!(
                "invalid state '{other}' (valid states: pending, processing, completed, failed, dead)"
            ))),
        }
    }
}

impl sqlx::Type<Sqlite> for JobState {
    fn type_info() -> SqliteTypeInfo {
        <&str as sqlx::Type<Sqlite>>::type_info()
    }

    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <&str as sqlx::Type<Sqlite>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, Sqlite> for JobState {
    fn decode(value: SqliteValueRef<'r>) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<'r, Sqlite>>::decode(value)?;
        s.parse::<JobState>()
            .map_err(|_| format!("invalid job state: {s}").into())
    }
}

impl Job {
    fn transition(&mut self, next: JobState, action: &'static str) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(QueueError::invalid_state(&self.id, self.state, action));
        }
        self.state = next;
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    fn release_lease(&mut self) {
        self.locked_by = None;
        self.locked_at = None;
    }

    /// Processing -> Completed. Counts the attempt.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobState::Completed, "complete")?;
        self.attempts += 1;
        self.error_message = None;
        self.next_retry_at = None;
        self.release_lease();
        self.touch(now);
        Ok(())
    }

    /// Processing -> Failed (scheduled retry) or Dead (budget exhausted).
    pub fn record_failure(
        &mut self,
        error_message: impl Into<String>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<JobState> {
        let attempts = self.attempts + 1;
        let next = if policy.should_dead_letter(attempts, self.max_retries) {
            JobState::Dead
        } else {
            JobState::Failed
        };
        self.transition(next, "record a failure")?;

        self.attempts = attempts;
        self.error_message = Some(error_message.into());
        self.next_retry_at = match next {
            JobState::Failed => Some(policy.next_retry_at(attempts, now)),
            _ => None,
        };
        self.release_lease();
        self.touch(now);
        Ok(next)
    }

    /// Dead -> Pending, a full reset of the retry budget.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobState::Pending, "be retried")?;
        self.attempts = 0;
        self.error_message = None;
        self.next_retry_at = None;
        self.release_lease();
        self.touch(now);
        Ok(())
    }
}

/// Canonical text form for timestamps written to the store. Fixed width so
/// that SQL string comparison orders the same way the instants do.
pub fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn leased(max_retries: i32) -> Job {
        let now = Utc::now();
        Job {
            id: "j".into(),
            command: "true".into(),
            state: JobState::Processing,
            attempts: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            error_message: None,
            next_retry_at: None,
            locked_by: Some("w".into()),
            locked_at: Some(now),
        }
    }

    #[test]
    fn state_round_trips_through_text() {
        for s in JobState::ALL {
            assert_eq!(s.as_str().parse::<JobState>().unwrap(), s);
        }
        assert_eq!(" DEAD ".parse::<JobState>().unwrap(), JobState::Dead);
        assert!("running".parse::<JobState>().is_err());
    }

    #[test]
    fn finished_jobs_cannot_be_leased() {
        assert!(!JobState::Completed.can_transition_to(JobState::Processing));
        assert!(!JobState::Dead.can_transition_to(JobState::Processing));
        assert!(!JobState::Completed.can_transition_to(JobState::Pending));
        assert!(JobState::Dead.can_transition_to(JobState::Pending));
    }

    #[test]
    fn failure_schedules_retry_then_dead_letters() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let mut job = leased(2);

        assert_eq!(job.record_failure("e1", &policy, now).unwrap(), JobState::Failed);
        assert_eq!(job.next_retry_at, Some(now + Duration::seconds(2)));
        assert!(job.locked_by.is_none());

        job.state = JobState::Processing;
        assert_eq!(job.record_failure("e2", &policy, now).unwrap(), JobState::Dead);
        assert_eq!(job.attempts, 2);
        assert!(job.next_retry_at.is_none());
        assert_eq!(job.error_message.as_deref(), Some("e2"));
    }

    #[test]
    fn updated_at_never_moves_backwards() {
        let mut job = leased(3);
        let original = job.updated_at;
        job.complete(original - Duration::hours(1)).unwrap();
        assert_eq!(job.updated_at, original);
    }

    #[test]
    fn completing_twice_is_refused() {
        let mut job = leased(3);
        job.complete(Utc::now()).unwrap();
        let err = job.complete(Utc::now()).unwrap_err();
        assert!(matches!(err, QueueError::InvalidState { .. }));
    }

    #[test]
    fn timestamps_have_fixed_width() {
        let a = ts(DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().into());
        let b = ts(DateTime::parse_from_rfc3339("2024-01-01T00:00:00.5Z").unwrap().into());
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }
}
