use thiserror::Error;

use crate::jobs::model::JobState;

pub type Result<T, E = QueueError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job '{0}' already exists")]
    Duplicate(String),

    #[error("job '{0}' not found")]
    NotFound(String),

    #[error("job '{id}' cannot {action} while {state}")]
    InvalidState {
        id: String,
        state: JobState,
        action: &'static str,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("job store unavailable: {0}")]
    StoreUnavailable(#[source] sqlx::Error),

    #[error("job store holds an unreadable row: {0}")]
    Corrupt(String),

    #[error("failed to migrate job store: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl QueueError {
    /// Only storage I/O failures are worth retrying at the polling layer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::StoreUnavailable(_))
    }

    pub(crate) fn invalid_state(id: &str, state: JobState, action: &'static str) -> Self {
        QueueError::InvalidState {
            id: id.to_string(),
            state,
            action,
        }
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                QueueError::Corrupt(err.to_string())
            }
            other => QueueError::StoreUnavailable(other),
        }
    }
}
