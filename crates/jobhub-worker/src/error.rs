//! Errors surfaced by the dispatcher to callers and worker loops.

use thiserror::Error;

use jobhub_core::error::{AppError, ErrorKind};

/// Failure modes of the dispatch subsystem.
///
/// Everything except [`DispatchError::Submission`] reaches callers through
/// the `result` future of their job handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// A newer long-poll replaced this one; the worker loop must poll again.
    #[error("wait on queue '{queue}' was superseded by a newer wait")]
    SupersededWait {
        /// Queue the wait was installed on.
        queue: String,
    },

    /// The submission was rejected before anything was enqueued.
    #[error("invalid submission: {0}")]
    Submission(String),

    /// The worker ran the job and it failed.
    #[error("job failed in worker: {0}")]
    WorkerReported(String),

    /// The worker pool terminated while the job was in flight.
    #[error("worker pool '{pool}' closed while the job was in flight")]
    WorkerClosed {
        /// Pool that owned the job's queue.
        pool: String,
    },

    /// The worker's result did not decode into the caller's type.
    #[error("failed to decode job result: {0}")]
    Decode(String),

    /// The dispatcher dropped the job without producing an outcome.
    #[error("job was dropped before completing")]
    Canceled,
}

/// Result alias for dispatcher operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

impl DispatchError {
    /// Whether a worker loop should simply poll again.
    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::SupersededWait { .. })
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        let kind = match &err {
            DispatchError::SupersededWait { .. } => ErrorKind::Conflict,
            DispatchError::Submission(_) => ErrorKind::Validation,
            DispatchError::WorkerReported(_) => ErrorKind::Worker,
            DispatchError::WorkerClosed { .. } => ErrorKind::ServiceUnavailable,
            DispatchError::Decode(_) => ErrorKind::Serialization,
            DispatchError::Canceled => ErrorKind::Internal,
        };
        AppError::with_source(kind, err.to_string(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_mapping() {
        let err: AppError = DispatchError::WorkerClosed {
            pool: "studio0".to_string(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
        assert!(err.message.contains("studio0"));

        let err: AppError = DispatchError::Submission("empty queue name".to_string()).into();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_is_superseded() {
        let err = DispatchError::SupersededWait {
            queue: "q".to_string(),
        };
        assert!(err.is_superseded());
        assert!(!DispatchError::Canceled.is_superseded());
    }
}
