//! Named FIFO queues with a single long-poll waiter per queue.
//!
//! Each queue holds pending entries and at most one waiter. A new wait on a
//! queue with a live waiter rejects the old waiter with
//! [`DispatchError::SupersededWait`]. An interrupt with no waiter is stored
//! as a sentinel at the head of the queue so the next poller wakes up
//! without receiving a job.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::{DispatchError, DispatchResult};
use crate::job::JobEntry;
use crate::metrics::QueueMetrics;

/// Why a waiter was woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The queue has something to take.
    Available,
    /// The waiter was interrupted; there is no job for it.
    Interrupted,
}

/// Outcome of taking from a queue, distinguishing a consumed interrupt
/// sentinel from an empty queue.
#[derive(Debug)]
pub enum Take<J> {
    /// The oldest pending job.
    Job(JobEntry<J>),
    /// An interrupt sentinel was consumed.
    Interrupted,
    /// Nothing was pending.
    Empty,
}

type WaiterSender = oneshot::Sender<DispatchResult<Wake>>;

struct QueueState<J> {
    /// `None` entries are interrupt sentinels.
    pending: VecDeque<Option<JobEntry<J>>>,
    waiter: Option<WaiterSender>,
}

impl<J> Default for QueueState<J> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            waiter: None,
        }
    }
}

/// Store of all named queues.
pub struct QueueStore<J> {
    queues: DashMap<String, QueueState<J>>,
    metrics: Arc<QueueMetrics>,
}

impl<J> std::fmt::Debug for QueueStore<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStore")
            .field("queues", &self.queues.len())
            .finish()
    }
}

impl<J> QueueStore<J> {
    /// Create an empty store that reports submissions to `metrics`.
    pub fn new(metrics: Arc<QueueMetrics>) -> Self {
        Self {
            queues: DashMap::new(),
            metrics,
        }
    }

    /// Append a job to `queue` and wake its waiter, if any.
    pub fn enqueue(&self, queue: &str, entry: JobEntry<J>) {
        let mut state = self.queues.entry(queue.to_string()).or_default();
        state.pending.push_back(Some(entry));
        if let Some(waiter) = state.waiter.take() {
            let _ = waiter.send(Ok(Wake::Available));
        }
        drop(state);

        self.metrics.record_submitted(queue);
        tracing::trace!("Enqueued job on '{}'", queue);
    }

    /// Arm a wait on `queue`.
    ///
    /// Resolves immediately when the queue is non-empty. Otherwise installs
    /// this call as the queue's waiter, superseding any previous one right
    /// away.
    pub fn wait_for_next(&self, queue: &str) -> WakeSignal {
        let mut state = self.queues.entry(queue.to_string()).or_default();
        if !state.pending.is_empty() {
            return WakeSignal::ready(Wake::Available);
        }

        let (tx, rx) = oneshot::channel();
        if let Some(previous) = state.waiter.replace(tx) {
            tracing::debug!("Superseding previous wait on '{}'", queue);
            let _ = previous.send(Err(DispatchError::SupersededWait {
                queue: queue.to_string(),
            }));
        }
        WakeSignal::pending(rx)
    }

    /// Remove and return the oldest pending job.
    ///
    /// An interrupt sentinel at the head is consumed and reported as "no job".
    pub fn take_next(&self, queue: &str) -> Option<JobEntry<J>> {
        match self.take(queue) {
            Take::Job(entry) => Some(entry),
            Take::Interrupted | Take::Empty => None,
        }
    }

    /// Remove the head of `queue`, reporting what kind of entry it was.
    pub fn take(&self, queue: &str) -> Take<J> {
        let Some(mut state) = self.queues.get_mut(queue) else {
            return Take::Empty;
        };
        match state.pending.pop_front() {
            Some(Some(entry)) => Take::Job(entry),
            Some(None) => Take::Interrupted,
            None => Take::Empty,
        }
    }

    /// Wake the waiter on `queue` without a job.
    ///
    /// With no live waiter, a sentinel is placed at the head of the queue so
    /// the next poll wakes immediately. Sentinels coalesce: a queue never
    /// holds two at its head.
    pub fn interrupt(&self, queue: &str) {
        let mut state = self.queues.entry(queue.to_string()).or_default();
        if let Some(waiter) = state.waiter.take() {
            if waiter.send(Ok(Wake::Interrupted)).is_ok() {
                tracing::debug!("Interrupted waiter on '{}'", queue);
                return;
            }
        }
        if !matches!(state.pending.front(), Some(None)) {
            state.pending.push_front(None);
        }
        tracing::debug!("Queued interrupt sentinel on '{}'", queue);
    }

    /// Number of pending entries on `queue`, sentinels included.
    pub fn pending_len(&self, queue: &str) -> usize {
        self.queues.get(queue).map(|s| s.pending.len()).unwrap_or(0)
    }

    /// Whether `queue` currently has a waiter installed.
    pub fn has_waiter(&self, queue: &str) -> bool {
        self.queues
            .get(queue)
            .map(|s| s.waiter.as_ref().is_some_and(|w| !w.is_closed()))
            .unwrap_or(false)
    }

    /// Names of all queues the store has seen.
    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }
}

/// Future returned by [`QueueStore::wait_for_next`].
///
/// The wait is armed when created, not when first polled.
#[derive(Debug)]
pub struct WakeSignal {
    state: WakeState,
}

#[derive(Debug)]
enum WakeState {
    Ready(Wake),
    Waiting(oneshot::Receiver<DispatchResult<Wake>>),
    Done,
}

impl WakeSignal {
    fn ready(wake: Wake) -> Self {
        Self {
            state: WakeState::Ready(wake),
        }
    }

    fn pending(rx: oneshot::Receiver<DispatchResult<Wake>>) -> Self {
        Self {
            state: WakeState::Waiting(rx),
        }
    }
}

impl Future for WakeSignal {
    type Output = DispatchResult<Wake>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let output = match &mut this.state {
            WakeState::Ready(wake) => Ok(*wake),
            WakeState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => result,
                // Store dropped the sender without resolving.
                Poll::Ready(Err(_)) => Err(DispatchError::Canceled),
                Poll::Pending => return Poll::Pending,
            },
            WakeState::Done => Err(DispatchError::Canceled),
        };
        this.state = WakeState::Done;
        Poll::Ready(output)
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;
    use crate::job::JobSpec;

    #[derive(Debug, Clone, PartialEq)]
    struct Noop(u32);

    impl crate::job::JobKind for Noop {
        fn name(&self) -> &'static str {
            "noop"
        }
    }

    fn store() -> QueueStore<Noop> {
        QueueStore::new(Arc::new(QueueMetrics::new()))
    }

    fn entry(n: u32) -> JobEntry<Noop> {
        JobEntry {
            spec: JobSpec::new(Noop(n)),
            handler: None,
        }
    }

    #[test]
    fn test_fifo_order() {
        let s = store();
        s.enqueue("q", entry(1));
        s.enqueue("q", entry(2));
        assert_eq!(s.take_next("q").map(|e| e.spec.job), Some(Noop(1)));
        assert_eq!(s.take_next("q").map(|e| e.spec.job), Some(Noop(2)));
        assert!(s.take_next("q").is_none());
    }

    #[test]
    fn test_take_unknown_queue() {
        let s = store();
        assert!(s.take_next("missing").is_none());
        assert!(matches!(s.take("missing"), Take::Empty));
    }

    #[tokio::test]
    async fn test_wait_ready_when_non_empty() {
        let s = store();
        s.enqueue("q", entry(1));
        assert_eq!(s.wait_for_next("q").await, Ok(Wake::Available));
        assert!(!s.has_waiter("q"));
    }

    #[tokio::test]
    async fn test_enqueue_wakes_waiter() {
        let s = store();
        let mut signal = s.wait_for_next("q");
        assert!((&mut signal).now_or_never().is_none());
        assert!(s.has_waiter("q"));

        s.enqueue("q", entry(7));
        assert_eq!(signal.await, Ok(Wake::Available));
        assert!(!s.has_waiter("q"));
        assert_eq!(s.take_next("q").map(|e| e.spec.job), Some(Noop(7)));
    }

    #[tokio::test]
    async fn test_second_wait_supersedes_first() {
        let s = store();
        let first = s.wait_for_next("q");
        let second = s.wait_for_next("q");

        let rejected = first.now_or_never().expect("first wait resolved");
        assert_eq!(
            rejected,
            Err(DispatchError::SupersededWait {
                queue: "q".to_string()
            })
        );

        s.enqueue("q", entry(1));
        assert_eq!(second.await, Ok(Wake::Available));
    }

    #[tokio::test]
    async fn test_interrupt_wakes_waiter_without_job() {
        let s = store();
        let signal = s.wait_for_next("q");
        s.interrupt("q");
        assert_eq!(signal.await, Ok(Wake::Interrupted));
        assert_eq!(s.pending_len("q"), 0);
    }

    #[tokio::test]
    async fn test_interrupt_without_waiter_leaves_sentinel() {
        let s = store();
        s.enqueue("q", entry(1));
        s.interrupt("q");
        s.interrupt("q");
        assert_eq!(s.pending_len("q"), 2);

        assert_eq!(s.wait_for_next("q").await, Ok(Wake::Available));
        assert!(matches!(s.take("q"), Take::Interrupted));
        assert_eq!(s.take_next("q").map(|e| e.spec.job), Some(Noop(1)));
    }

    #[tokio::test]
    async fn test_interrupt_after_waiter_dropped() {
        let s = store();
        drop(s.wait_for_next("q"));
        s.interrupt("q");
        assert_eq!(s.pending_len("q"), 1);
        assert!(s.take_next("q").is_none());
        assert_eq!(s.pending_len("q"), 0);
    }

    #[test]
    fn test_enqueue_counts_submission() {
        let metrics = Arc::new(QueueMetrics::new());
        let s: QueueStore<Noop> = QueueStore::new(Arc::clone(&metrics));
        s.enqueue("q", entry(1));
        s.enqueue("q", entry(2));
        assert_eq!(metrics.queue("q").submitted, 2);
    }
}
