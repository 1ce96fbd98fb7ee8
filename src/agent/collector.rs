// Agent-side sampler producing snapshots from the metric sources

use tracing::{debug, warn};

use super::metrics::{Gauges, MetricsSource};
use crate::model::MetricSample;

/// Name of the counter carrying the number of polls
pub const POLL_COUNT: &str = "PollCount";

/// One poll's gauges plus the cumulative poll counter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub gauges: Gauges,
    pub poll_count: i64,
}

impl Snapshot {
    /// Flattens the snapshot into wire samples, sorted by id
    ///
    /// Every gauge becomes a gauge sample; `PollCount` is appended as a
    /// counter sample unless it is zero.
    pub fn samples(&self) -> Vec<MetricSample> {
        let mut samples: Vec<MetricSample> = self
            .gauges
            .iter()
            .map(|(name, value)| MetricSample::gauge(name.clone(), *value))
            .collect();
        samples.sort_by(|a, b| a.id.cmp(&b.id));

        if self.poll_count != 0 {
            samples.push(MetricSample::counter(POLL_COUNT, self.poll_count));
        }
        samples
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.poll_count == 0
    }
}

/// Polls every source and builds a fresh snapshot each time
pub struct Collector {
    sources: Vec<Box<dyn MetricsSource>>,
    poll_count: i64,
}

impl Collector {
    pub fn new(sources: Vec<Box<dyn MetricsSource>>) -> Self {
        Collector {
            sources,
            poll_count: 0,
        }
    }

    /// Reads all sources into a new snapshot
    ///
    /// The gauges replace the previous poll entirely; the poll counter is
    /// carried forward and incremented. A failing source is logged and skipped.
    pub async fn poll(&mut self) -> Snapshot {
        self.poll_count += 1;

        let mut gauges = Gauges::new();
        for source in &self.sources {
            match source.collect().await {
                Ok(values) => gauges.extend(values),
                Err(e) => warn!(source = source.name(), error = %e, "Metric source failed, skipping"),
            }
        }

        debug!(gauges = gauges.len(), poll_count = self.poll_count, "Poll complete");

        Snapshot {
            gauges,
            poll_count: self.poll_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl MetricsSource for Counting {
        fn name(&self) -> &str {
            "Counting"
        }

        async fn collect(&self) -> Result<Gauges, Box<dyn Error + Send + Sync>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let mut gauges = Gauges::new();
            gauges.insert(format!("Only{}", n), n as f64);
            gauges.insert("Calls".to_string(), n as f64);
            Ok(gauges)
        }
    }

    struct Broken;

    #[async_trait]
    impl MetricsSource for Broken {
        fn name(&self) -> &str {
            "Broken"
        }

        async fn collect(&self) -> Result<Gauges, Box<dyn Error + Send + Sync>> {
            Err("permission denied".into())
        }
    }

    #[tokio::test]
    async fn test_poll_replaces_gauges_and_counts() {
        let mut collector = Collector::new(vec![
            Box::new(Counting {
                calls: AtomicU32::new(0),
            }),
            Box::new(Broken),
        ]);

        let first = collector.poll().await;
        assert_eq!(first.poll_count, 1);
        assert!(first.gauges.contains_key("Only1"));

        let second = collector.poll().await;
        assert_eq!(second.poll_count, 2);
        assert_eq!(second.gauges["Calls"], 2.0);
        assert!(!second.gauges.contains_key("Only1"));
    }

    #[test]
    fn test_samples_include_poll_count() {
        let mut snapshot = Snapshot::default();
        snapshot.gauges.insert("b".to_string(), 2.0);
        snapshot.gauges.insert("a".to_string(), 1.0);
        snapshot.poll_count = 5;

        assert_eq!(
            snapshot.samples(),
            vec![
                MetricSample::gauge("a", 1.0),
                MetricSample::gauge("b", 2.0),
                MetricSample::counter(POLL_COUNT, 5),
            ]
        );

        snapshot.poll_count = 0;
        assert_eq!(snapshot.samples().len(), 2);
        assert!(Snapshot::default().is_empty());
    }
}
