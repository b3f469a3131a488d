//! Caller-facing job submission.
//!
//! [`Dispatcher`] wraps a job in a [`JobEntry`], hands it to the queue
//! store, and gives the caller a [`JobHandle`] whose futures resolve when
//! the worker reports back or the owning pool closes.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, join_all};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use jobhub_core::types::id::JobId;

use crate::channel::WorkerChannel;
use crate::error::{DispatchError, DispatchResult};
use crate::fast_track::FastTrackHub;
use crate::job::{CompletionHandler, JobCompletion, JobEntry, JobKind, JobSpec, JobTimings};
use crate::metrics::{QueueCountersSnapshot, QueueMetrics};
use crate::queue::QueueStore;
use crate::tracker::CompletionTracker;

/// Entry point for submitting jobs to named queues.
pub struct Dispatcher<J> {
    store: Arc<QueueStore<J>>,
    tracker: Arc<CompletionTracker>,
    metrics: Arc<QueueMetrics>,
    fast_track: FastTrackHub,
}

impl<J> Clone for Dispatcher<J> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            tracker: Arc::clone(&self.tracker),
            metrics: Arc::clone(&self.metrics),
            fast_track: self.fast_track.clone(),
        }
    }
}

impl<J> fmt::Debug for Dispatcher<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("store", &self.store)
            .field("tracker", &self.tracker)
            .finish()
    }
}

impl<J: JobKind> Default for Dispatcher<J> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J: JobKind> Dispatcher<J> {
    /// Create a dispatcher with empty queues and fresh metrics.
    pub fn new() -> Self {
        let metrics = Arc::new(QueueMetrics::new());
        Self {
            store: Arc::new(QueueStore::new(Arc::clone(&metrics))),
            tracker: Arc::new(CompletionTracker::new(Arc::clone(&metrics))),
            metrics,
            fast_track: FastTrackHub::new(),
        }
    }

    /// Submit a job and get a handle to its decoded result.
    pub fn submit_for_result<T>(&self, queue: &str, job: J) -> DispatchResult<JobHandle<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        validate_queue_name(queue)?;

        let spec = JobSpec::new(job);
        let id = spec.id;
        let queued_at = spec.queued_at;
        let name = spec.name();

        let (result_tx, result_rx) = oneshot::channel::<DispatchResult<T>>();
        let (timings_tx, timings_rx) = oneshot::channel::<JobTimings>();

        let handler: CompletionHandler = Box::new(move |completion: JobCompletion| {
            let timings = JobTimings {
                queue_time: queued_at,
                started_time: completion.started_at,
                finished_time: completion.finished_at,
                completed_time: Utc::now(),
            };
            let result = completion.outcome.and_then(|value| {
                serde_json::from_value::<T>(value).map_err(|e| DispatchError::Decode(e.to_string()))
            });
            let _ = timings_tx.send(timings);
            let _ = result_tx.send(result);
        });

        self.store.enqueue(
            queue,
            JobEntry {
                spec,
                handler: Some(handler),
            },
        );
        tracing::debug!("Submitted job {} ('{}') to '{}'", id, name, queue);

        Ok(JobHandle {
            id,
            queue: queue.to_string(),
            result: async move { result_rx.await.unwrap_or(Err(DispatchError::Canceled)) }.boxed(),
            timings: async move { timings_rx.await.map_err(|_| DispatchError::Canceled) }.boxed(),
        })
    }

    /// Submit a job whose outcome nobody waits for.
    ///
    /// Failures are logged by the completion tracker.
    pub fn submit_fire_and_forget(&self, queue: &str, job: J) -> DispatchResult<JobId> {
        validate_queue_name(queue)?;

        let spec = JobSpec::new(job);
        let id = spec.id;
        let name = spec.name();
        self.store.enqueue(queue, JobEntry { spec, handler: None });
        tracing::debug!("Submitted fire-and-forget job {} ('{}') to '{}'", id, name, queue);
        Ok(id)
    }

    /// Submit a copy of `job` to every queue in `queues`.
    ///
    /// All names are validated before anything is enqueued.
    pub fn submit_broadcast<T, Q>(
        &self,
        queues: &[Q],
        job: J,
    ) -> DispatchResult<Vec<JobHandle<T>>>
    where
        T: DeserializeOwned + Send + 'static,
        Q: AsRef<str>,
        J: Clone,
    {
        for queue in queues {
            validate_queue_name(queue.as_ref())?;
        }
        queues
            .iter()
            .map(|queue| self.submit_for_result(queue.as_ref(), job.clone()))
            .collect()
    }

    /// Wake the waiter on `queue` without a job.
    pub fn interrupt(&self, queue: &str) {
        self.store.interrupt(queue);
    }

    /// Worker-side view of this dispatcher.
    pub fn channel(&self) -> WorkerChannel<J> {
        WorkerChannel::new(
            Arc::clone(&self.store),
            Arc::clone(&self.tracker),
            self.fast_track.clone(),
        )
    }

    /// Completion tracker shared with the workers.
    pub fn tracker(&self) -> &Arc<CompletionTracker> {
        &self.tracker
    }

    /// Metrics sink shared with the store and tracker.
    pub fn metrics(&self) -> &Arc<QueueMetrics> {
        &self.metrics
    }

    /// Fast-track hub for local subscribers.
    pub fn fast_track(&self) -> &FastTrackHub {
        &self.fast_track
    }
}

/// Point-in-time view of dispatcher state, for status endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Per-queue counters and depth, ordered by name.
    pub queues: Vec<QueueStats>,
    /// Jobs taken by workers and not yet resolved.
    pub in_flight: usize,
    /// Live fast-track topics.
    pub fast_track_topics: usize,
}

/// Counters and depth for one queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    /// Queue name.
    pub name: String,
    /// Entries waiting to be taken.
    pub pending: usize,
    /// Lifetime counters.
    #[serde(flatten)]
    pub counters: QueueCountersSnapshot,
}

/// Anything that can report [`DispatchStats`].
pub trait StatsSource: Send + Sync + std::fmt::Debug {
    /// Collect a fresh snapshot.
    fn stats(&self) -> DispatchStats;
}

impl<J: JobKind> StatsSource for Dispatcher<J> {
    fn stats(&self) -> DispatchStats {
        let mut names = self.store.queue_names();
        names.extend(self.metrics.snapshot().queues.into_keys());
        names.sort();
        names.dedup();

        let queues = names
            .into_iter()
            .map(|name| QueueStats {
                pending: self.store.pending_len(&name),
                counters: self.metrics.queue(&name),
                name,
            })
            .collect();

        DispatchStats {
            queues,
            in_flight: self.tracker.in_flight(),
            fast_track_topics: self.fast_track.topic_count(),
        }
    }
}

/// Caller's view of a submitted job.
pub struct JobHandle<T> {
    /// Job identifier.
    pub id: JobId,
    /// Queue the job was submitted to.
    pub queue: String,
    /// Resolves with the decoded result or the job's failure.
    pub result: BoxFuture<'static, DispatchResult<T>>,
    /// Resolves with the job's timestamps once it completes either way.
    pub timings: BoxFuture<'static, DispatchResult<JobTimings>>,
}

impl<T> fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("queue", &self.queue)
            .finish()
    }
}

impl<T> JobHandle<T> {
    /// Wait for the result, discarding timings.
    pub async fn wait(self) -> DispatchResult<T> {
        self.result.await
    }

    /// Wait for both the result and the timings.
    pub async fn wait_with_timings(self) -> (DispatchResult<T>, DispatchResult<JobTimings>) {
        futures::join!(self.result, self.timings)
    }
}

/// Wait for every handle and keep the successful results.
///
/// Failures are logged and dropped; output order follows input order.
pub async fn join_best_effort<T>(handles: Vec<JobHandle<T>>) -> Vec<T> {
    let waits = handles.into_iter().map(|handle| {
        let id = handle.id;
        let queue = handle.queue;
        handle.result.map(move |result| (id, queue, result))
    });

    join_all(waits)
        .await
        .into_iter()
        .filter_map(|(id, queue, result)| match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!("Dropping failed broadcast job {} on '{}': {}", id, queue, e);
                None
            }
        })
        .collect()
}

fn validate_queue_name(queue: &str) -> DispatchResult<()> {
    if queue.trim().is_empty() {
        return Err(DispatchError::Submission(
            "queue name must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum TestJob {
        Echo(i64),
    }

    impl JobKind for TestJob {
        fn name(&self) -> &'static str {
            "echo"
        }
    }

    fn complete_next(
        dispatcher: &Dispatcher<TestJob>,
        queue: &str,
        outcome: DispatchResult<serde_json::Value>,
    ) {
        let channel = dispatcher.channel();
        let spec = channel.get_next_job(queue).expect("pending job");
        let now = Utc::now();
        channel.report_job_done(spec.id, Some(now), Some(now), outcome);
    }

    #[tokio::test]
    async fn test_submit_resolves_decoded_result() {
        let d = Dispatcher::<TestJob>::new();
        let handle = d.submit_for_result::<i64>("q", TestJob::Echo(5)).unwrap();
        complete_next(&d, "q", Ok(json!(5)));

        let (result, timings) = handle.wait_with_timings().await;
        assert_eq!(result, Ok(5));
        let timings = timings.unwrap();
        assert!(timings.started_time.is_some());
        assert!(timings.completed_time >= timings.queue_time);
    }

    #[tokio::test]
    async fn test_decode_failure() {
        let d = Dispatcher::<TestJob>::new();
        let handle = d.submit_for_result::<i64>("q", TestJob::Echo(1)).unwrap();
        complete_next(&d, "q", Ok(json!("not a number")));
        assert!(matches!(handle.wait().await, Err(DispatchError::Decode(_))));
    }

    #[tokio::test]
    async fn test_worker_failure_reaches_caller() {
        let d = Dispatcher::<TestJob>::new();
        let handle = d.submit_for_result::<i64>("q", TestJob::Echo(1)).unwrap();
        complete_next(&d, "q", Err(DispatchError::WorkerReported("boom".to_string())));
        assert_eq!(
            handle.wait().await,
            Err(DispatchError::WorkerReported("boom".to_string()))
        );
        assert_eq!(d.metrics().queue("q").failed, 1);
    }

    #[test]
    fn test_empty_queue_name_rejected() {
        let d = Dispatcher::<TestJob>::new();
        assert!(matches!(
            d.submit_for_result::<i64>("  ", TestJob::Echo(1)),
            Err(DispatchError::Submission(_))
        ));
        assert!(d.submit_fire_and_forget("", TestJob::Echo(1)).is_err());
        assert!(d.stats().queues.is_empty());
    }

    #[test]
    fn test_broadcast_validates_before_enqueue() {
        let d = Dispatcher::<TestJob>::new();
        let result = d.submit_broadcast::<i64, _>(&["a", ""], TestJob::Echo(1));
        assert!(result.is_err());
        assert_eq!(d.metrics().queue("a").submitted, 0);
    }

    #[tokio::test]
    async fn test_join_best_effort_drops_failures() {
        let d = Dispatcher::<TestJob>::new();
        let handles = d
            .submit_broadcast::<i64, _>(&["a", "b", "c"], TestJob::Echo(1))
            .unwrap();
        complete_next(&d, "a", Ok(json!(1)));
        complete_next(&d, "b", Err(DispatchError::WorkerReported("nope".to_string())));
        complete_next(&d, "c", Ok(json!(3)));

        assert_eq!(join_best_effort(handles).await, vec![1, 3]);
    }

    #[test]
    fn test_stats_include_pending_and_counters() {
        let d = Dispatcher::<TestJob>::new();
        d.submit_fire_and_forget("q", TestJob::Echo(1)).unwrap();
        d.submit_fire_and_forget("q", TestJob::Echo(2)).unwrap();

        let stats = d.stats();
        assert_eq!(stats.queues.len(), 1);
        assert_eq!(stats.queues[0].name, "q");
        assert_eq!(stats.queues[0].pending, 2);
        assert_eq!(stats.queues[0].counters.submitted, 2);
        assert_eq!(stats.in_flight, 0);
    }
}
