//! Worker-side adapter over the queue store, tracker, and fast-track hub.
//!
//! This is the whole surface a worker loop needs: wait, take, report,
//! interrupt, and notify.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use jobhub_core::types::id::JobId;

use crate::error::DispatchResult;
use crate::fast_track::FastTrackHub;
use crate::job::{JobCompletion, JobKind, JobOutcome, JobSpec};
use crate::queue::{QueueStore, Take, Wake, WakeSignal};
use crate::tracker::CompletionTracker;

/// Result of a single [`WorkerChannel::poll_for_work`] round.
#[derive(Debug)]
pub enum PollOutcome<J> {
    /// A job was taken and is now tracked as in flight.
    Job(JobSpec<J>),
    /// The wait was interrupted without a job.
    Interrupted,
}

enum Taken<J> {
    Job(JobSpec<J>),
    Interrupted,
    Empty,
}

/// Handle a worker loop uses to talk to the dispatcher.
pub struct WorkerChannel<J> {
    store: Arc<QueueStore<J>>,
    tracker: Arc<CompletionTracker>,
    fast_track: FastTrackHub,
}

impl<J> Clone for WorkerChannel<J> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            tracker: Arc::clone(&self.tracker),
            fast_track: self.fast_track.clone(),
        }
    }
}

impl<J> fmt::Debug for WorkerChannel<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerChannel")
            .field("store", &self.store)
            .field("tracker", &self.tracker)
            .finish()
    }
}

impl<J: JobKind> WorkerChannel<J> {
    pub(crate) fn new(
        store: Arc<QueueStore<J>>,
        tracker: Arc<CompletionTracker>,
        fast_track: FastTrackHub,
    ) -> Self {
        Self {
            store,
            tracker,
            fast_track,
        }
    }

    /// Arm a long-poll on `queue`.
    pub fn wait_for_next_job(&self, queue: &str) -> WakeSignal {
        self.store.wait_for_next(queue)
    }

    /// Take the next job from `queue` and track it as in flight.
    ///
    /// Returns `None` for an empty queue or a consumed interrupt sentinel.
    pub fn get_next_job(&self, queue: &str) -> Option<JobSpec<J>> {
        match self.take_and_track(queue) {
            Taken::Job(spec) => Some(spec),
            Taken::Interrupted | Taken::Empty => None,
        }
    }

    /// Wake the waiter on `queue` without a job.
    pub fn interrupt_job_stream(&self, queue: &str) {
        self.store.interrupt(queue);
    }

    /// Report the outcome of a job this worker took.
    ///
    /// Returns `false` if the job was no longer in flight.
    pub fn report_job_done(
        &self,
        id: JobId,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
        outcome: JobOutcome,
    ) -> bool {
        self.tracker.complete(
            id,
            JobCompletion {
                started_at,
                finished_at,
                outcome,
            },
        )
    }

    /// Push `payload` to local subscribers of `(kind, args)`.
    pub fn fast_track_notify(&self, kind: &str, args: &[&str], payload: Value) -> usize {
        self.fast_track.publish(kind, args, payload)
    }

    /// Wait on `queue` until a job is taken or the wait is interrupted.
    ///
    /// Wakes that find the queue already drained are retried. A
    /// superseded wait is returned as an error so the caller can decide
    /// whether to poll again.
    pub async fn poll_for_work(&self, queue: &str) -> DispatchResult<PollOutcome<J>> {
        loop {
            let wake = self.wait_for_next_job(queue).await?;
            match self.take_and_track(queue) {
                Taken::Job(spec) => return Ok(PollOutcome::Job(spec)),
                Taken::Interrupted => return Ok(PollOutcome::Interrupted),
                Taken::Empty if wake == Wake::Interrupted => {
                    return Ok(PollOutcome::Interrupted);
                }
                Taken::Empty => {
                    tracing::trace!("Woke on '{}' but the queue was already drained", queue);
                }
            }
        }
    }

    fn take_and_track(&self, queue: &str) -> Taken<J> {
        match self.store.take(queue) {
            Take::Job(entry) => {
                let spec = entry.spec;
                self.tracker
                    .register(spec.id, queue, spec.name(), entry.handler);
                Taken::Job(spec)
            }
            Take::Interrupted => Taken::Interrupted,
            Take::Empty => Taken::Empty,
        }
    }
}
