// Write serializer: the only task that writes to the store during a cycle.
// Device workers enqueue typed requests; this task applies them one at a time, in arrival order.

use crate::models::WriteRequest;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Write side of the store.
#[async_trait]
pub trait CounterSink: Send + Sync {
    async fn apply(&self, request: &WriteRequest) -> anyhow::Result<()>;

    /// Group-level rollup over the last window's deltas. Returns groups updated.
    async fn rollup_groups(&self, window_seconds: u64) -> anyhow::Result<u64>;
}

/// Channel capacity for the write queue: at least two writes per worker in flight.
pub fn write_queue_capacity(configured: usize, workers: usize) -> usize {
    configured.max(workers * 2).max(1)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub applied: u64,
    pub failed: u64,
}

/// Spawns the serializer. It exits, returning its stats, once every sender has been dropped
/// and the queue is empty. A failed request is logged and the drain continues.
pub fn spawn_write_serializer(
    mut write_rx: mpsc::Receiver<WriteRequest>,
    sink: Arc<dyn CounterSink>,
) -> tokio::task::JoinHandle<WriterStats> {
    tokio::spawn(async move {
        let mut stats = WriterStats::default();
        while let Some(request) = write_rx.recv().await {
            match sink.apply(&request).await {
                Ok(()) => stats.applied += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(
                        error = %e,
                        operation = request.kind(),
                        interface = %request.interface_name(),
                        "write apply failed"
                    );
                }
            }
        }
        debug!(
            applied = stats.applied,
            failed = stats.failed,
            "write serializer drained"
        );
        stats
    })
}
