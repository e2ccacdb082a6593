//! Concurrency planning from a resource snapshot and a per-job footprint.

use serde::{Deserialize, Serialize};

use crate::core::monitor::{ResourceSnapshot, BYTES_PER_GB};

/// Default ratio between a job's peak memory and its input file size.
pub const DEFAULT_FOOTPRINT_MULTIPLIER: f64 = 3.0;

/// Concurrency decision for one scheduling run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityPlan {
    /// Jobs allowed to run at once. Always at least 1.
    pub max_concurrent_jobs: usize,
    /// CPU threads handed to each job. Always at least 1.
    pub threads_per_job: usize,
    /// CPU thread budget the plan was derived from.
    pub cpu_budget: usize,
    /// Job count the memory budget alone allows, before the CPU cap.
    pub memory_limited_jobs: usize,
}

/// Turns resource snapshots into [`CapacityPlan`]s.
#[derive(Debug, Clone, Copy)]
pub struct CapacityPlanner {
    footprint_multiplier: f64,
}

impl Default for CapacityPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_FOOTPRINT_MULTIPLIER)
    }
}

impl CapacityPlanner {
    /// Create a planner estimating each job at `footprint_multiplier` times its input size.
    #[must_use]
    pub const fn new(footprint_multiplier: f64) -> Self {
        Self {
            footprint_multiplier,
        }
    }

    /// Estimated peak memory of one job in bytes.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn estimated_job_bytes(&self, representative_file_bytes: u64) -> u64 {
        (representative_file_bytes as f64 * self.footprint_multiplier).ceil() as u64
    }

    /// Plan concurrency.
    ///
    /// `requested_cpu` and `requested_mem_gb` are caller budgets; `None` means
    /// auto-detect from the snapshot. A memory request larger than what is
    /// available is clamped to the available amount.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn plan(
        &self,
        cpu_cores: usize,
        snapshot: &ResourceSnapshot,
        representative_file_bytes: u64,
        requested_cpu: Option<usize>,
        requested_mem_gb: Option<f64>,
    ) -> CapacityPlan {
        let cpu_budget = match requested_cpu {
            Some(n) if n >= 1 => n,
            _ => {
                let idle = (100.0 - snapshot.cpu_busy_pct).clamp(0.0, 100.0);
                ((cpu_cores as f64 * idle / 100.0).floor() as usize).max(1)
            }
        };

        let available_gb = snapshot.mem_available_gb();
        let mem_budget_gb = match requested_mem_gb {
            Some(gb) if gb.is_finite() && gb > 0.0 => gb.min(available_gb),
            _ => available_gb,
        };

        let job_gb = self.estimated_job_bytes(representative_file_bytes) as f64 / BYTES_PER_GB;
        let memory_limited_jobs = if job_gb > 0.0 {
            ((mem_budget_gb / job_gb).floor() as usize).max(1)
        } else {
            cpu_budget
        };

        let max_concurrent_jobs = cpu_budget.min(memory_limited_jobs).max(1);
        let threads_per_job = (cpu_budget / max_concurrent_jobs).max(1);

        tracing::debug!(
            cpu_budget,
            mem_budget_gb,
            memory_limited_jobs,
            max_concurrent_jobs,
            threads_per_job,
            "capacity plan computed"
        );

        CapacityPlan {
            max_concurrent_jobs,
            threads_per_job,
            cpu_budget,
            memory_limited_jobs,
        }
    }
}
