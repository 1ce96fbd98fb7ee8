// Dispatcher - bounded queue of snapshots drained by a fixed worker pool
//
// The report timer enqueues copies of the current snapshot; `rate_limit`
// workers pull them one at a time, so at most that many deliveries (and their
// retries) are in flight at once.

use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::collector::Snapshot;
use super::sender::{MetricsSender, SendError};

/// Anything able to deliver one snapshot to the collector
#[async_trait]
pub trait SnapshotDelivery: Send + Sync {
    async fn deliver(&self, snapshot: &Snapshot, cancel: &CancellationToken)
        -> Result<(), SendError>;
}

#[async_trait]
impl SnapshotDelivery for MetricsSender {
    async fn deliver(
        &self,
        snapshot: &Snapshot,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        self.send_metrics(snapshot, cancel).await
    }
}

pub struct Dispatcher {
    queue: mpsc::Sender<Snapshot>,
    workers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Spawns the worker pool
    ///
    /// # Arguments
    /// * `delivery` - Shared delivery used by every worker
    /// * `workers` - Pool size; the queue holds twice as many snapshots
    /// * `cancel` - Stops workers at their next suspension point
    pub fn start(
        delivery: Arc<dyn SnapshotDelivery>,
        workers: usize,
        cancel: CancellationToken,
    ) -> Self {
        let workers = workers.max(1);
        let (queue, receiver) = mpsc::channel(workers * 2);
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(Self::run_worker(
                    id,
                    Arc::clone(&receiver),
                    Arc::clone(&delivery),
                    cancel.clone(),
                ))
            })
            .collect();

        info!(workers, "Started sender workers");

        Dispatcher {
            queue,
            workers: handles,
            cancel,
        }
    }

    /// Offers a snapshot to the workers
    ///
    /// Waits while the queue is full. Returns `false` when cancellation fires
    /// first, in which case the snapshot is dropped.
    pub async fn enqueue(&self, snapshot: Snapshot) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.queue.send(snapshot) => sent.is_ok(),
        }
    }

    /// Closes the queue and waits for every worker to exit
    pub async fn shutdown(self) {
        drop(self.queue);

        for result in join_all(self.workers).await {
            if let Err(e) = result {
                error!("Sender worker panicked: {}", e);
            }
        }
        info!("Sender workers stopped");
    }

    async fn run_worker(
        id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<Snapshot>>>,
        delivery: Arc<dyn SnapshotDelivery>,
        cancel: CancellationToken,
    ) {
        loop {
            // The lock is released before delivery starts
            let next = {
                let mut receiver = receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    snapshot = receiver.recv() => snapshot,
                }
            };

            let Some(snapshot) = next else {
                break;
            };

            match delivery.deliver(&snapshot, &cancel).await {
                Ok(()) => debug!(worker = id, poll_count = snapshot.poll_count, "Snapshot delivered"),
                Err(SendError::Cancelled) => break,
                Err(e) => error!(worker = id, error = %e, "Failed to deliver snapshot"),
            }
        }

        debug!(worker = id, "Sender worker exiting");
    }
}
