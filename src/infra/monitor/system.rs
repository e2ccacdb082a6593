//! Host monitor backed by `sysinfo`.

use std::thread;
use std::time::Duration;

use sysinfo::{System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::debug;

use crate::core::{ResourceMonitor, ResourceSnapshot};

/// Samples CPU, memory and swap of the local host.
///
/// CPU utilisation is averaged over a sampling window, so each
/// [`sample`](ResourceMonitor::sample) blocks for that long.
pub struct SystemMonitor {
    system: System,
    cores: usize,
    window: Duration,
}

impl std::fmt::Debug for SystemMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemMonitor")
            .field("cores", &self.cores)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl SystemMonitor {
    /// Monitor averaging CPU over `window` (at least sysinfo's minimum interval).
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            system: System::new(),
            cores: num_cpus::get(),
            window: window.max(MINIMUM_CPU_UPDATE_INTERVAL),
        }
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl ResourceMonitor for SystemMonitor {
    #[allow(clippy::cast_precision_loss)]
    fn sample(&mut self) -> ResourceSnapshot {
        self.system.refresh_cpu_usage();
        thread::sleep(self.window);
        self.system.refresh_cpu_usage();
        let cpu_busy_pct = f64::from(self.system.global_cpu_usage());

        self.system.refresh_memory();
        let total = self.system.total_memory();
        let available = self.system.available_memory();
        let mem_available_pct = if total == 0 {
            0.0
        } else {
            available as f64 * 100.0 / total as f64
        };
        let total_swap = self.system.total_swap();
        let swap_available_pct =
            (total_swap > 0).then(|| self.system.free_swap() as f64 * 100.0 / total_swap as f64);

        let snapshot = ResourceSnapshot {
            cpu_busy_pct,
            mem_available_pct,
            mem_available_bytes: available,
            swap_available_pct,
        };
        debug!(?snapshot, "resource sample");
        snapshot
    }

    fn cpu_cores(&self) -> usize {
        self.cores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_is_within_bounds() {
        let mut monitor = SystemMonitor::new(Duration::ZERO);
        let snapshot = monitor.sample();
        assert!((0.0..=100.0).contains(&snapshot.cpu_busy_pct));
        assert!((0.0..=100.0).contains(&snapshot.mem_available_pct));
        assert!(monitor.cpu_cores() >= 1);
    }
}
