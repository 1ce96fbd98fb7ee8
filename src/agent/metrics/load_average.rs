// Load Average metric source
//
// Collects system load average (1min, 5min, 15min). These values are the
// average number of processes in the run queue or waiting for disk I/O.

use async_trait::async_trait;
use std::error::Error;
use sysinfo::System;
use tracing::debug;

use super::{Gauges, MetricsSource};

/// Load Average source
///
/// # Interpretation
/// - Values < number of CPU cores = system not overloaded
/// - Values > number of CPU cores = system is experiencing high load
///
/// # Platform Support
/// - Linux: Full support via /proc/loadavg
/// - macOS: Full support via sysctl
/// - Windows: Not available (returns 0.0)
pub struct LoadAverageSource;

impl LoadAverageSource {
    /// Creates a new LoadAverageSource instance
    pub fn new() -> Self {
        LoadAverageSource
    }
}

#[async_trait]
impl MetricsSource for LoadAverageSource {
    fn name(&self) -> &str {
        "LoadAverage"
    }

    async fn collect(&self) -> Result<Gauges, Box<dyn Error + Send + Sync>> {
        let load_avg = System::load_average();

        // Helps interpret whether load values are high or normal
        let cpu_count = num_cpus::get();

        let mut gauges = Gauges::new();
        gauges.insert("LoadAverage1".to_string(), load_avg.one);
        gauges.insert("LoadAverage5".to_string(), load_avg.five);
        gauges.insert("LoadAverage15".to_string(), load_avg.fifteen);
        gauges.insert("CpuCores".to_string(), cpu_count as f64);

        debug!(
            "Load average: 1min={:.2}, 5min={:.2}, 15min={:.2} (CPUs: {})",
            load_avg.one, load_avg.five, load_avg.fifteen, cpu_count
        );

        Ok(gauges)
    }
}

impl Default for LoadAverageSource {
    fn default() -> Self {
        Self::new()
    }
}
