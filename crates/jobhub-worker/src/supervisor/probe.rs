//! Liveness probe sent to a runner's main loop.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time;

use jobhub_core::types::id::WorkerId;

use crate::runner::Probe;

/// What a single probe found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The runner replied in time.
    Alive(WorkerId),
    /// The runner did not reply within the freeze window.
    Frozen,
    /// The runner's loop has exited.
    Gone,
}

/// Ask the runner behind `probes` to prove it is alive.
pub async fn probe(probes: &mpsc::Sender<Probe>, timeout: Duration) -> ProbeResult {
    let (tx, rx) = oneshot::channel();
    let exchange = async {
        if probes.send(tx).await.is_err() {
            return ProbeResult::Gone;
        }
        match rx.await {
            Ok(worker_id) => ProbeResult::Alive(worker_id),
            Err(_) => ProbeResult::Gone,
        }
    };

    time::timeout(timeout, exchange)
        .await
        .unwrap_or(ProbeResult::Frozen)
}
