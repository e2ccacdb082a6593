//! Deterministic monitor replaying scripted snapshots.

use std::collections::VecDeque;

use crate::core::{ResourceMonitor, ResourceSnapshot};

/// Replays a fixed sequence of snapshots; the last one repeats forever.
#[derive(Debug, Clone)]
pub struct FixedMonitor {
    script: VecDeque<ResourceSnapshot>,
    last: ResourceSnapshot,
    cores: usize,
    samples: usize,
}

impl FixedMonitor {
    /// Monitor that always reports `snapshot` on a host with `cores` cores.
    #[must_use]
    pub fn new(cores: usize, snapshot: ResourceSnapshot) -> Self {
        Self {
            script: VecDeque::new(),
            last: snapshot,
            cores,
            samples: 0,
        }
    }

    /// Idle host: no CPU load, the given free memory, no swap.
    #[must_use]
    pub fn idle(cores: usize, mem_available_bytes: u64) -> Self {
        Self::new(
            cores,
            ResourceSnapshot {
                cpu_busy_pct: 0.0,
                mem_available_pct: 80.0,
                mem_available_bytes,
                swap_available_pct: None,
            },
        )
    }

    /// Report `snapshots` in order before falling back to the steady snapshot.
    #[must_use]
    pub fn with_script(mut self, snapshots: impl IntoIterator<Item = ResourceSnapshot>) -> Self {
        self.script.extend(snapshots);
        self
    }

    /// Number of samples taken so far.
    #[must_use]
    pub const fn samples(&self) -> usize {
        self.samples
    }
}

impl ResourceMonitor for FixedMonitor {
    fn sample(&mut self) -> ResourceSnapshot {
        self.samples += 1;
        self.script.pop_front().unwrap_or(self.last)
    }

    fn cpu_cores(&self) -> usize {
        self.cores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_then_steady() {
        let busy = ResourceSnapshot {
            cpu_busy_pct: 95.0,
            mem_available_pct: 10.0,
            mem_available_bytes: 1,
            swap_available_pct: Some(5.0),
        };
        let mut monitor = FixedMonitor::idle(4, 1 << 30).with_script([busy]);
        assert_eq!(monitor.sample(), busy);
        assert!((monitor.sample().cpu_busy_pct).abs() < f64::EPSILON);
        assert!((monitor.sample().cpu_busy_pct).abs() < f64::EPSILON);
        assert_eq!(monitor.samples(), 3);
        assert_eq!(monitor.cpu_cores(), 4);
    }
}
