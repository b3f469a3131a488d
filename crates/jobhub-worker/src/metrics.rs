//! Per-queue job counters.
//!
//! Counters are plain atomics behind a `DashMap`, so recording never
//! blocks the dispatcher. Values are exposed on request via
//! [`QueueMetrics::snapshot`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Counters for a single queue.
#[derive(Debug, Default)]
pub struct QueueCounters {
    /// Jobs handed to the queue store.
    pub submitted: AtomicU64,
    /// Jobs completed without error.
    pub succeeded: AtomicU64,
    /// Jobs completed with an error, reported or synthesized.
    pub failed: AtomicU64,
}

impl QueueCounters {
    fn snapshot(&self) -> QueueCountersSnapshot {
        QueueCountersSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Metrics sink keyed by queue name.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    queues: DashMap<String, Arc<QueueCounters>>,
}

impl QueueMetrics {
    /// Create an empty metrics sink.
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, queue: &str) -> Arc<QueueCounters> {
        if let Some(counters) = self.queues.get(queue) {
            return Arc::clone(counters.value());
        }
        Arc::clone(
            self.queues
                .entry(queue.to_string())
                .or_insert_with(|| Arc::new(QueueCounters::default()))
                .value(),
        )
    }

    /// Record a job entering a queue.
    pub fn record_submitted(&self, queue: &str) {
        self.counters(queue).submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful completion.
    pub fn record_succeeded(&self, queue: &str) {
        self.counters(queue).succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed completion.
    pub fn record_failed(&self, queue: &str) {
        self.counters(queue).failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values for one queue; zeroes if the queue was never seen.
    pub fn queue(&self, queue: &str) -> QueueCountersSnapshot {
        self.queues
            .get(queue)
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    /// Current values for every known queue.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let queues = self
            .queues
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();
        MetricsSnapshot { queues }
    }
}

/// Serializable counter values for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCountersSnapshot {
    /// Jobs handed to the queue store.
    pub submitted: u64,
    /// Jobs completed without error.
    pub succeeded: u64,
    /// Jobs completed with an error.
    pub failed: u64,
}

/// Serializable metrics snapshot, ordered by queue name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Counters per queue.
    pub queues: BTreeMap<String, QueueCountersSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_counting() {
        let m = QueueMetrics::new();
        m.record_submitted("a.studio");
        m.record_submitted("a.studio");
        m.record_succeeded("a.studio");
        m.record_failed("a.studio");
        m.record_submitted("b.events");

        let a = m.queue("a.studio");
        assert_eq!(a.submitted, 2);
        assert_eq!(a.succeeded, 1);
        assert_eq!(a.failed, 1);

        let snap = m.snapshot();
        assert_eq!(snap.queues.len(), 2);
        assert_eq!(snap.queues["b.events"].submitted, 1);
    }

    #[test]
    fn test_unknown_queue_is_zero() {
        let m = QueueMetrics::new();
        assert_eq!(m.queue("nope"), QueueCountersSnapshot::default());
        assert!(m.snapshot().queues.is_empty());
    }

    #[test]
    fn test_snapshot_serialization() {
        let m = QueueMetrics::new();
        m.record_submitted("q");
        let json = serde_json::to_value(m.snapshot()).expect("serialize");
        assert_eq!(json["queues"]["q"]["submitted"], 1);
    }
}
