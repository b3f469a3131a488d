//! Registry of jobs a worker has taken but not yet reported.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use jobhub_core::types::id::JobId;

use crate::error::DispatchError;
use crate::job::{CompletionHandler, JobCompletion};
use crate::metrics::QueueMetrics;

struct RunningJob {
    queue: String,
    name: &'static str,
    handler: Option<CompletionHandler>,
    taken_at: DateTime<Utc>,
}

/// Maps in-flight job ids to their queue and completion handler.
///
/// Every operation that resolves a job removes it from the map first, so a
/// handler runs at most once even when a late worker report races a
/// forced failure.
pub struct CompletionTracker {
    running: DashMap<JobId, RunningJob>,
    metrics: Arc<QueueMetrics>,
}

impl std::fmt::Debug for CompletionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionTracker")
            .field("in_flight", &self.running.len())
            .finish()
    }
}

impl CompletionTracker {
    /// Create an empty tracker.
    pub fn new(metrics: Arc<QueueMetrics>) -> Self {
        Self {
            running: DashMap::new(),
            metrics,
        }
    }

    /// Record that a worker took `id` from `queue`.
    pub fn register(
        &self,
        id: JobId,
        queue: &str,
        name: &'static str,
        handler: Option<CompletionHandler>,
    ) {
        self.running.insert(
            id,
            RunningJob {
                queue: queue.to_string(),
                name,
                handler,
                taken_at: Utc::now(),
            },
        );
    }

    /// Resolve `id` with a worker-supplied completion.
    ///
    /// Returns `false` when the id is unknown, which happens for late
    /// reports after a forced failure. Unknown ids touch neither handlers
    /// nor metrics.
    pub fn complete(&self, id: JobId, completion: JobCompletion) -> bool {
        let Some((_, job)) = self.running.remove(&id) else {
            tracing::debug!("Ignoring completion for unknown job {}", id);
            return false;
        };
        self.resolve(id, job, completion);
        true
    }

    /// Fail every in-flight job whose queue satisfies `predicate`.
    ///
    /// Returns the number of jobs failed.
    pub fn fail_all<F>(&self, predicate: F, error: DispatchError) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let ids: Vec<JobId> = self
            .running
            .iter()
            .filter(|entry| predicate(&entry.value().queue))
            .map(|entry| *entry.key())
            .collect();

        let mut failed = 0;
        for id in ids {
            if let Some((_, job)) = self.running.remove(&id) {
                let now = Utc::now();
                self.resolve(
                    id,
                    job,
                    JobCompletion {
                        started_at: Some(now),
                        finished_at: Some(now),
                        outcome: Err(error.clone()),
                    },
                );
                failed += 1;
            }
        }
        failed
    }

    /// Whether `id` is currently in flight.
    pub fn contains(&self, id: JobId) -> bool {
        self.running.contains_key(&id)
    }

    /// Number of jobs in flight.
    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    /// Number of jobs in flight for queues matching `predicate`.
    pub fn in_flight_for<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        self.running
            .iter()
            .filter(|entry| predicate(&entry.value().queue))
            .count()
    }

    fn resolve(&self, id: JobId, job: RunningJob, completion: JobCompletion) {
        tracing::debug!(
            "Resolving job {} ('{}' on '{}') after {}ms in flight",
            id,
            job.name,
            job.queue,
            (Utc::now() - job.taken_at).num_milliseconds()
        );
        match &completion.outcome {
            Ok(_) => self.metrics.record_succeeded(&job.queue),
            Err(_) => self.metrics.record_failed(&job.queue),
        }

        match job.handler {
            Some(handler) => handler(completion),
            None => {
                if let Err(e) = &completion.outcome {
                    tracing::warn!(
                        "Fire-and-forget job {} ('{}' on '{}') failed: {}",
                        id,
                        job.name,
                        job.queue,
                        e
                    );
                }
            }
        }
    }
}
