//! Host and process resource readings.

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GB: f64 = BYTES_PER_MB * 1024.0;

/// Load at the moment of sampling.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemMetrics {
    /// Host-wide CPU usage, 0 until a second sample has been taken
    pub cpu_percent: f32,
    /// Resident memory of this process
    pub memory_usage_mb: f64,
    /// Resident memory as a share of total host memory
    pub process_memory_percent: f64,
}

/// Static description of the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemInfo {
    pub cpu_count: usize,
    pub memory_total_gb: f64,
}

/// Samples CPU and memory through one reused `sysinfo::System`.
///
/// CPU usage is measured between consecutive refreshes, so the monitor
/// keeps its `System` alive across samples.
pub struct ResourceMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("pid", &self.pid)
            .finish()
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!(error = e, "process id unavailable, memory readings disabled");
                None
            }
        };

        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
            pid,
        }
    }

    pub fn sample(&self) -> SystemMetrics {
        let mut system = self.system.lock();
        system.refresh_cpu();
        system.refresh_memory();

        let process_bytes = self.refresh_process_bytes(&mut system);
        let total_bytes = system.total_memory();
        let process_memory_percent = if total_bytes > 0 {
            process_bytes as f64 / total_bytes as f64 * 100.0
        } else {
            0.0
        };

        SystemMetrics {
            cpu_percent: system.global_cpu_info().cpu_usage(),
            memory_usage_mb: process_bytes as f64 / BYTES_PER_MB,
            process_memory_percent,
        }
    }

    /// Resident memory of this process in megabytes, 0 when unreadable.
    pub fn process_memory_mb(&self) -> f64 {
        let mut system = self.system.lock();
        self.refresh_process_bytes(&mut system) as f64 / BYTES_PER_MB
    }

    pub fn system_info(&self) -> SystemInfo {
        let mut system = self.system.lock();
        system.refresh_memory();
        let cpu_count = match system.cpus().len() {
            0 => std::thread::available_parallelism().map_or(1, usize::from),
            n => n,
        };
        SystemInfo {
            cpu_count,
            memory_total_gb: system.total_memory() as f64 / BYTES_PER_GB,
        }
    }

    fn refresh_process_bytes(&self, system: &mut System) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        if !system.refresh_process(pid) {
            return 0;
        }
        system.process(pid).map_or(0, |process| process.memory())
    }
}
