// Memory metric source
//
// Collects host memory usage including RAM and swap

use async_trait::async_trait;
use std::error::Error;
use std::sync::Mutex;
use sysinfo::System;
use tracing::debug;

use super::{Gauges, MetricsSource};

/// Host memory source
///
/// Reports byte values for `TotalMemory`, `FreeMemory` and `AvailableMemory`,
/// plus `UsedMemoryPercent` and `UsedSwapPercent`.
///
/// # Platform Support
/// - Linux: Full support via /proc/meminfo
/// - macOS: Full support via vm_stat
/// - Windows: Full support via GlobalMemoryStatusEx
pub struct MemorySource {
    /// System information provider
    system: Mutex<System>,
}

impl MemorySource {
    /// Creates a new MemorySource instance
    pub fn new() -> Self {
        MemorySource {
            system: Mutex::new(System::new()),
        }
    }

    /// Calculates percentage of memory used
    ///
    /// # Arguments
    /// * `used` - Used memory in bytes
    /// * `total` - Total memory in bytes
    ///
    /// # Returns
    /// Percentage (0.0 - 100.0)
    fn calculate_percentage(used: u64, total: u64) -> f64 {
        if total == 0 {
            0.0
        } else {
            (used as f64 / total as f64) * 100.0
        }
    }
}

#[async_trait]
impl MetricsSource for MemorySource {
    fn name(&self) -> &str {
        "Memory"
    }

    async fn collect(&self) -> Result<Gauges, Box<dyn Error + Send + Sync>> {
        let mut sys = self
            .system
            .lock()
            .map_err(|_| "memory system state lock poisoned")?;
        sys.refresh_memory();

        let total_memory = sys.total_memory();
        let free_memory = sys.free_memory();
        let used_percent = Self::calculate_percentage(sys.used_memory(), total_memory);
        let swap_used_percent = Self::calculate_percentage(sys.used_swap(), sys.total_swap());

        let mut gauges = Gauges::new();
        gauges.insert("TotalMemory".to_string(), total_memory as f64);
        gauges.insert("FreeMemory".to_string(), free_memory as f64);
        gauges.insert("AvailableMemory".to_string(), sys.available_memory() as f64);
        gauges.insert("UsedMemoryPercent".to_string(), used_percent);
        gauges.insert("UsedSwapPercent".to_string(), swap_used_percent);

        debug!(
            "Memory: {} B total, {} B free ({:.1}% used), swap {:.1}% used",
            total_memory, free_memory, used_percent, swap_used_percent
        );

        Ok(gauges)
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}
