//! Host resource sampling and capacity checks.

use serde::{Deserialize, Serialize};

/// Host CPU, memory and swap pressure captured at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    /// Average CPU utilisation across all cores, 0-100.
    pub cpu_busy_pct: f64,
    /// Available memory as a percentage of total memory.
    pub mem_available_pct: f64,
    /// Available memory in bytes.
    pub mem_available_bytes: u64,
    /// Free swap as a percentage of total swap, `None` when no swap is configured.
    pub swap_available_pct: Option<f64>,
}

impl ResourceSnapshot {
    /// Available memory in GiB.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mem_available_gb(&self) -> f64 {
        self.mem_available_bytes as f64 / BYTES_PER_GB
    }
}

/// Bytes in one GiB, the unit memory budgets are expressed in.
pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Minimum spare capacity required before another job may start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum idle CPU percentage.
    pub cpu_floor_pct: f64,
    /// Minimum available memory (and swap) percentage.
    pub mem_floor_pct: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_floor_pct: 20.0,
            mem_floor_pct: 20.0,
        }
    }
}

/// Source of resource snapshots.
///
/// `sample` may block for a short interval to average CPU utilisation.
pub trait ResourceMonitor: Send {
    /// Capture the current resource snapshot.
    fn sample(&mut self) -> ResourceSnapshot;

    /// Number of logical CPU cores on the host.
    fn cpu_cores(&self) -> usize;
}

/// True iff the snapshot leaves at least the requested headroom.
///
/// Idle CPU must reach `cpu_floor_pct`; available memory and swap must
/// exceed `mem_floor_pct`. A host without swap passes the swap check.
#[must_use]
pub fn has_capacity(snapshot: &ResourceSnapshot, thresholds: Thresholds) -> bool {
    let cpu_ok = 100.0 - snapshot.cpu_busy_pct >= thresholds.cpu_floor_pct;
    let mem_ok = snapshot.mem_available_pct > thresholds.mem_floor_pct;
    let swap_ok = snapshot
        .swap_available_pct
        .map_or(true, |pct| pct > thresholds.mem_floor_pct);
    cpu_ok && mem_ok && swap_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cpu: f64, mem: f64, swap: Option<f64>) -> ResourceSnapshot {
        ResourceSnapshot {
            cpu_busy_pct: cpu,
            mem_available_pct: mem,
            mem_available_bytes: 8 * 1024 * 1024 * 1024,
            swap_available_pct: swap,
        }
    }

    #[test]
    fn test_capacity_with_headroom() {
        assert!(has_capacity(&snapshot(50.0, 60.0, Some(90.0)), Thresholds::default()));
    }

    #[test]
    fn test_cpu_floor_is_inclusive() {
        assert!(has_capacity(&snapshot(80.0, 60.0, None), Thresholds::default()));
        assert!(!has_capacity(&snapshot(80.5, 60.0, None), Thresholds::default()));
    }

    #[test]
    fn test_memory_floor_is_exclusive() {
        assert!(!has_capacity(&snapshot(10.0, 20.0, None), Thresholds::default()));
    }

    #[test]
    fn test_swap_pressure_blocks() {
        assert!(!has_capacity(&snapshot(10.0, 60.0, Some(5.0)), Thresholds::default()));
    }

    #[test]
    fn test_missing_swap_is_ignored() {
        assert!(has_capacity(&snapshot(10.0, 60.0, None), Thresholds::default()));
    }

    #[test]
    fn test_mem_available_gb() {
        let snap = snapshot(0.0, 50.0, None);
        assert!((snap.mem_available_gb() - 8.0).abs() < f64::EPSILON);
    }
}
