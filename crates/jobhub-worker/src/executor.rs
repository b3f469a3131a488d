//! Job executor: runs a job through its processor and turns the result
//! into something a worker can report.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value;

use jobhub_core::error::AppError;
use jobhub_core::types::id::WorkerId;

use crate::channel::WorkerChannel;
use crate::error::DispatchError;
use crate::job::{JobKind, JobOutcome, JobSpec};

/// Trait for job processor implementations.
///
/// A processor handles every variant of its job enum; the match on the
/// variant lives inside `process`.
#[async_trait]
pub trait JobProcessor<J>: Send + Sync + fmt::Debug {
    /// Execute `job`, returning a JSON-serializable result.
    async fn process(
        &self,
        job: &JobSpec<J>,
        ctx: &JobContext<J>,
    ) -> Result<Value, JobExecutionError>;
}

/// Error from job execution
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// The job cannot succeed as submitted.
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// The job failed for a reason that might not recur.
    #[error("Transient job failure: {0}")]
    Transient(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

impl From<JobExecutionError> for DispatchError {
    fn from(err: JobExecutionError) -> Self {
        DispatchError::WorkerReported(err.to_string())
    }
}

/// What a processor can see of the worker running it.
pub struct JobContext<J> {
    /// Worker executing the job.
    pub worker_id: WorkerId,
    /// Queue the job was taken from.
    pub queue: String,
    channel: WorkerChannel<J>,
}

impl<J> fmt::Debug for JobContext<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("worker_id", &self.worker_id)
            .field("queue", &self.queue)
            .finish()
    }
}

impl<J: JobKind> JobContext<J> {
    /// Build a context for a job taken from `queue`.
    pub fn new(worker_id: WorkerId, queue: &str, channel: WorkerChannel<J>) -> Self {
        Self {
            worker_id,
            queue: queue.to_string(),
            channel,
        }
    }

    /// Push a fast-track notification to local subscribers.
    pub fn notify(&self, kind: &str, args: &[&str], payload: Value) -> usize {
        self.channel.fast_track_notify(kind, args, payload)
    }
}

/// Outcome of one execution, with the worker's own timestamps.
#[derive(Debug)]
pub struct Execution {
    /// When processing started.
    pub started_at: DateTime<Utc>,
    /// When processing ended.
    pub finished_at: DateTime<Utc>,
    /// Result to report.
    pub outcome: JobOutcome,
}

/// Runs jobs through a single processor.
#[derive(Debug)]
pub struct JobExecutor<J> {
    processor: Arc<dyn JobProcessor<J>>,
}

impl<J> Clone for JobExecutor<J> {
    fn clone(&self) -> Self {
        Self {
            processor: Arc::clone(&self.processor),
        }
    }
}

impl<J: JobKind> JobExecutor<J> {
    /// Create an executor around `processor`.
    pub fn new(processor: Arc<dyn JobProcessor<J>>) -> Self {
        Self { processor }
    }

    /// Execute a job, converting processor errors and panics into a
    /// reportable failure.
    pub async fn execute(&self, job: &JobSpec<J>, ctx: &JobContext<J>) -> Execution {
        let started_at = Utc::now();
        tracing::info!(
            "Executing job: id={}, type='{}', queue='{}', worker={}",
            job.id,
            job.name(),
            ctx.queue,
            ctx.worker_id.short()
        );

        let result = AssertUnwindSafe(self.processor.process(job, ctx))
            .catch_unwind()
            .await;
        let finished_at = Utc::now();

        let outcome = match result {
            Ok(Ok(value)) => {
                tracing::info!(
                    "Job {} completed in {}ms",
                    job.id,
                    (finished_at - started_at).num_milliseconds()
                );
                Ok(value)
            }
            Ok(Err(JobExecutionError::Transient(msg))) => {
                tracing::warn!("Job {} failed (transient): {}", job.id, msg);
                Err(JobExecutionError::Transient(msg).into())
            }
            Ok(Err(err)) => {
                tracing::error!("Job {} failed: {}", job.id, err);
                Err(err.into())
            }
            Err(_) => {
                tracing::error!("Job {} panicked during execution", job.id);
                Err(DispatchError::WorkerReported(format!(
                    "job '{}' panicked",
                    job.name()
                )))
            }
        };

        Execution {
            started_at,
            finished_at,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dispatcher::Dispatcher;

    #[derive(Debug, Clone)]
    enum Calc {
        Double(i64),
        Fail,
        Panic,
    }

    impl JobKind for Calc {
        fn name(&self) -> &'static str {
            match self {
                Calc::Double(_) => "double",
                Calc::Fail => "fail",
                Calc::Panic => "panic",
            }
        }
    }

    #[derive(Debug)]
    struct CalcProcessor;

    #[async_trait]
    impl JobProcessor<Calc> for CalcProcessor {
        async fn process(
            &self,
            job: &JobSpec<Calc>,
            _ctx: &JobContext<Calc>,
        ) -> Result<Value, JobExecutionError> {
            match job.job {
                Calc::Double(n) => Ok(json!(n * 2)),
                Calc::Fail => Err(JobExecutionError::Permanent("bad input".to_string())),
                Calc::Panic => panic!("processor bug"),
            }
        }
    }

    fn setup() -> (JobExecutor<Calc>, JobContext<Calc>) {
        let d = Dispatcher::<Calc>::new();
        let ctx = JobContext::new(WorkerId::new(), "q", d.channel());
        (JobExecutor::new(Arc::new(CalcProcessor)), ctx)
    }

    #[tokio::test]
    async fn test_execute_success() {
        let (executor, ctx) = setup();
        let exec = executor.execute(&JobSpec::new(Calc::Double(21)), &ctx).await;
        assert_eq!(exec.outcome, Ok(json!(42)));
        assert!(exec.finished_at >= exec.started_at);
    }

    #[tokio::test]
    async fn test_execute_failure_is_reported() {
        let (executor, ctx) = setup();
        let exec = executor.execute(&JobSpec::new(Calc::Fail), &ctx).await;
        match exec.outcome {
            Err(DispatchError::WorkerReported(msg)) => assert!(msg.contains("bad input")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_panic_is_contained() {
        let (executor, ctx) = setup();
        let exec = executor.execute(&JobSpec::new(Calc::Panic), &ctx).await;
        assert!(matches!(exec.outcome, Err(DispatchError::WorkerReported(_))));
    }
}
