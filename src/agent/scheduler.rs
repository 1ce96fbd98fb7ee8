// Scheduler module - drives the agent's poll and report timers
//
// # Architecture
// - A poll task refreshes the current snapshot on its own interval
// - The report loop copies the latest snapshot into the dispatcher queue
// - Sender workers drain the queue concurrently (see `dispatcher`)
// - One cancellation token stops timers, queue and workers

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::collector::{Collector, Snapshot};
use super::dispatcher::{Dispatcher, SnapshotDelivery};
use crate::config::AgentConfig;

/// Agent scheduler owning the poll and report cadence
pub struct AgentScheduler {
    poll_interval: Duration,
    report_interval: Duration,
    rate_limit: usize,
}

impl AgentScheduler {
    /// Creates a scheduler from explicit timings
    ///
    /// # Arguments
    /// * `poll_interval` - How often sources are sampled
    /// * `report_interval` - How often the latest snapshot is queued for delivery
    /// * `rate_limit` - Number of concurrent sender workers
    pub fn new(poll_interval: Duration, report_interval: Duration, rate_limit: usize) -> Self {
        AgentScheduler {
            poll_interval,
            report_interval,
            rate_limit,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.poll_interval, config.report_interval, config.rate_limit)
    }

    /// Runs until `cancel` fires
    ///
    /// # Behavior
    /// - The first poll happens immediately, the first report after one report interval
    /// - An empty snapshot (nothing polled yet) is not queued
    /// - On cancellation the poll task is joined, the queue is closed and
    ///   workers are awaited before returning
    pub async fn run(
        self,
        collector: Collector,
        delivery: Arc<dyn SnapshotDelivery>,
        cancel: CancellationToken,
    ) {
        info!(
            "Starting agent scheduler (poll every {:?}, report every {:?}, {} workers)",
            self.poll_interval, self.report_interval, self.rate_limit
        );

        let (current, latest) = watch::channel(Snapshot::default());
        let poller = tokio::spawn(Self::run_poll_loop(
            collector,
            current,
            self.poll_interval,
            cancel.clone(),
        ));
        let dispatcher = Dispatcher::start(delivery, self.rate_limit, cancel.clone());

        let mut ticker = interval_at(Instant::now() + self.report_interval, self.report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = latest.borrow().clone();
                    if snapshot.is_empty() {
                        debug!("Nothing polled yet, skipping report");
                        continue;
                    }
                    if !dispatcher.enqueue(snapshot).await {
                        break;
                    }
                }
            }
        }

        info!("Stopping agent scheduler");

        if let Err(e) = poller.await {
            error!("Poll task panicked: {}", e);
        }
        dispatcher.shutdown().await;
    }

    async fn run_poll_loop(
        mut collector: Collector,
        current: watch::Sender<Snapshot>,
        period: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = collector.poll().await;
                    if snapshot.gauges.is_empty() {
                        warn!("Poll produced no gauges");
                    }
                    current.send_replace(snapshot);
                }
            }
        }
    }
}
