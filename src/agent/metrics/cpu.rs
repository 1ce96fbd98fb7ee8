// CPU utilisation source - one gauge per logical core

use async_trait::async_trait;
use std::error::Error;
use std::sync::Mutex;
use sysinfo::System;

use super::{Gauges, MetricsSource};

/// Per-core utilisation as `CPUutilization1..N`
///
/// Usage is measured between two refreshes, so the first poll after start
/// reports 0 for every core.
pub struct CpuSource {
    system: Mutex<System>,
}

impl CpuSource {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        CpuSource {
            system: Mutex::new(system),
        }
    }
}

impl Default for CpuSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsSource for CpuSource {
    fn name(&self) -> &str {
        "CPU"
    }

    async fn collect(&self) -> Result<Gauges, Box<dyn Error + Send + Sync>> {
        let mut sys = self
            .system
            .lock()
            .map_err(|_| "cpu system state lock poisoned")?;
        sys.refresh_cpu();

        Ok(sys
            .cpus()
            .iter()
            .enumerate()
            .map(|(i, cpu)| (format!("CPUutilization{}", i + 1), cpu.cpu_usage() as f64))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_gauge_per_core() {
        let gauges = CpuSource::new().collect().await.unwrap();
        assert!(!gauges.is_empty());
        for i in 1..=gauges.len() {
            assert!(gauges.contains_key(&format!("CPUutilization{}", i)));
        }
    }
}
