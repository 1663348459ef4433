//! Error types for the scheduler core.

use thiserror::Error;

/// Errors raised by a [`JobStore`](crate::store::JobStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// No job with this id exists in the store.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// The backing database could not be opened or reached.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// A statement failed.
    #[error("Store query error: {0}")]
    Query(String),

    /// A trigger could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store URI was not understood.
    #[error("Unsupported store URI: {0}")]
    InvalidUri(String),
}

impl StoreError {
    /// Whether this is the benign "job id absent" case.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        if matches!(e, tokio_rusqlite::Error::ConnectionClosed) {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Query(e.to_string())
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while building a trigger.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// A cron field could not be parsed.
    #[error("Invalid cron trigger '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    /// Interval triggers need a positive period.
    #[error("Interval must be greater than zero")]
    ZeroInterval,
}

/// Failures reported by job bodies and freshness checks.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The body ran and reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The body panicked.
    #[error("Job body panicked: {0}")]
    Panicked(String),

    /// No body is registered for this job id.
    #[error("No body registered for job '{0}'")]
    MissingBody(String),
}

impl JobError {
    /// Create a failure from anything printable.
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(message.into())
    }
}

/// Failures reported by event listeners.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// A store call made by the listener failed.
    #[error("Listener store error: {0}")]
    Store(#[from] StoreError),

    /// Any other listener failure.
    #[error("Listener failed: {0}")]
    Failed(String),
}

/// Top-level scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Trigger failure.
    #[error(transparent)]
    Trigger(#[from] TriggerError),

    /// The dispatcher loop is already running.
    #[error("Dispatcher is already running")]
    AlreadyRunning,
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_benign() {
        let err = StoreError::NotFound("get_tmdb_data".to_string());
        assert!(err.is_not_found());
        assert!(err.to_string().contains("get_tmdb_data"));

        let err = StoreError::Query("disk I/O error".to_string());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_scheduler_error_from_store() {
        let err: SchedulerError = StoreError::Connection("refused".to_string()).into();
        assert!(matches!(err, SchedulerError::Store(StoreError::Connection(_))));
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_listener_error_from_store() {
        let err: ListenerError = StoreError::NotFound("x".to_string()).into();
        assert!(matches!(err, ListenerError::Store(StoreError::NotFound(_))));
    }

    #[test]
    fn test_job_error_display() {
        assert_eq!(JobError::failed("exit 1").to_string(), "exit 1");
        assert!(JobError::MissingBody("info".into()).to_string().contains("info"));
    }
}
