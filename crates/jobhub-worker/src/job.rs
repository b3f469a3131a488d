//! Job model shared by the dispatcher and the workers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use jobhub_core::types::id::JobId;

use crate::error::DispatchError;

/// A family of jobs with a fixed payload type per variant.
///
/// Applications implement this on an enum; the variant name is what
/// appears in logs and status output.
pub trait JobKind: fmt::Debug + Send + Sync + 'static {
    /// Stable, human-readable name of this job variant.
    fn name(&self) -> &'static str;
}

/// A job as seen by a worker: identity, typed payload, and submission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec<J> {
    /// Identifier generated at submission.
    pub id: JobId,
    /// The typed job payload.
    pub job: J,
    /// When the job was handed to the queue store.
    pub queued_at: DateTime<Utc>,
}

impl<J: JobKind> JobSpec<J> {
    /// Create a spec with a fresh random id.
    pub fn new(job: J) -> Self {
        Self {
            id: JobId::new(),
            job,
            queued_at: Utc::now(),
        }
    }

    /// Name of the job variant.
    pub fn name(&self) -> &'static str {
        self.job.name()
    }
}

/// Result value a worker produces for a job.
pub type JobOutcome = Result<Value, DispatchError>;

/// Everything a completion handler learns about a finished job.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    /// When the worker started executing, if it did.
    pub started_at: Option<DateTime<Utc>>,
    /// When the worker finished executing, if it did.
    pub finished_at: Option<DateTime<Utc>>,
    /// Worker result or failure.
    pub outcome: JobOutcome,
}

/// Callback invoked exactly once with the outcome of a job.
pub type CompletionHandler = Box<dyn FnOnce(JobCompletion) + Send + Sync + 'static>;

/// Timestamps collected over the life of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTimings {
    /// Submission time.
    pub queue_time: DateTime<Utc>,
    /// Worker-reported execution start.
    pub started_time: Option<DateTime<Utc>>,
    /// Worker-reported execution end.
    pub finished_time: Option<DateTime<Utc>>,
    /// When the dispatcher resolved the caller's handle.
    pub completed_time: DateTime<Utc>,
}

/// A pending job owned by the queue store.
pub struct JobEntry<J> {
    /// The job handed to the worker.
    pub spec: JobSpec<J>,
    /// Handler to run on completion; `None` for fire-and-forget jobs.
    pub handler: Option<CompletionHandler>,
}

impl<J: fmt::Debug> fmt::Debug for JobEntry<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobEntry")
            .field("spec", &self.spec)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}
