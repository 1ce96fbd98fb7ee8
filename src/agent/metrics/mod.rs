// Metrics sources - the extensible set of gauges sampled on every poll
//
// Each source reads one area of the process or host and returns a map of gauge
// names to values. The collector merges the maps into one snapshot.

use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;

pub mod cpu;
pub mod load_average;
pub mod memory;
pub mod runtime;

/// Gauge values keyed by metric name
pub type Gauges = HashMap<String, f64>;

/// Core trait that all metric sources must implement.
///
/// Sources never perform network I/O: a poll must complete even when the
/// collector server is unreachable.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Returns the human-readable name of this source.
    /// Used for logging and identification.
    fn name(&self) -> &str;

    /// Reads the current values.
    ///
    /// # Returns
    /// * `Ok(Gauges)` - Gauge names and values produced by this source
    /// * `Err(Box<dyn Error>)` - If the values cannot be read (e.g., permission denied)
    async fn collect(&self) -> Result<Gauges, Box<dyn Error + Send + Sync>>;
}

/// Helper function to create all metric sources.
///
/// # Adding New Metrics
/// 1. Create a new module (e.g., `network.rs`)
/// 2. Implement the `MetricsSource` trait
/// 3. Add the module declaration at the top of this file
/// 4. Add instantiation here
pub fn create_all_sources() -> Vec<Box<dyn MetricsSource>> {
    vec![
        // Process memory, CPU, uptime, disk I/O and RandomValue
        Box::new(runtime::RuntimeSource::new()),

        // Host memory (TotalMemory, FreeMemory, ...)
        Box::new(memory::MemorySource::new()),

        // Per-core utilisation (CPUutilization1..N)
        Box::new(cpu::CpuSource::new()),

        // Load average (1min, 5min, 15min) and core count
        Box::new(load_average::LoadAverageSource::new()),
    ]
}
