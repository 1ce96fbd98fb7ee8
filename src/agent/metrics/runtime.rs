// Runtime metric source
//
// Describes the agent process itself: memory footprint, CPU share, uptime and
// disk I/O, plus the RandomValue gauge.

use async_trait::async_trait;
use std::error::Error;
use std::sync::Mutex;
use sysinfo::{Pid, System};
use tracing::debug;

use super::{Gauges, MetricsSource};

/// Process-level gauges of the running agent
///
/// # Gauges
/// - `ResidentMemory`, `VirtualMemory`: bytes
/// - `ProcessCPUUsage`: percent of one core since the previous poll
/// - `Uptime`: seconds since the process started
/// - `DiskReadBytes`, `DiskWrittenBytes`: totals since start
/// - `RandomValue`: uniform in [0, 1)
pub struct RuntimeSource {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl RuntimeSource {
    pub fn new() -> Self {
        RuntimeSource {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for RuntimeSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsSource for RuntimeSource {
    fn name(&self) -> &str {
        "Runtime"
    }

    async fn collect(&self) -> Result<Gauges, Box<dyn Error + Send + Sync>> {
        let mut gauges = Gauges::new();
        gauges.insert("RandomValue".to_string(), rand::random::<f64>());

        let Some(pid) = self.pid else {
            debug!("Current PID unavailable, reporting RandomValue only");
            return Ok(gauges);
        };

        let mut sys = self
            .system
            .lock()
            .map_err(|_| "runtime system state lock poisoned")?;
        sys.refresh_process(pid);

        let process = sys
            .process(pid)
            .ok_or("agent process not found in process table")?;
        let disk = process.disk_usage();

        gauges.insert("ResidentMemory".to_string(), process.memory() as f64);
        gauges.insert("VirtualMemory".to_string(), process.virtual_memory() as f64);
        gauges.insert("ProcessCPUUsage".to_string(), process.cpu_usage() as f64);
        gauges.insert("Uptime".to_string(), process.run_time() as f64);
        gauges.insert("DiskReadBytes".to_string(), disk.total_read_bytes as f64);
        gauges.insert("DiskWrittenBytes".to_string(), disk.total_written_bytes as f64);

        debug!(
            "Runtime: rss={} B, cpu={:.1}%, uptime={}s",
            process.memory(),
            process.cpu_usage(),
            process.run_time()
        );

        Ok(gauges)
    }
}
