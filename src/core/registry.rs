//! In-process record of every job in a batch.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::job::{DedupKey, Job, JobId, JobOutcome, JobRole, JobState};

/// Counts of jobs by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Waiting to be submitted.
    pub queued: usize,
    /// Currently running.
    pub running: usize,
    /// Finished successfully.
    pub succeeded: usize,
    /// Finished with an error.
    pub failed: usize,
    /// Never submitted because their artifact was missing.
    pub abandoned: usize,
}

/// Thread-safe job table shared between the executor and observers.
///
/// Cloning yields another handle to the same table.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<BTreeMap<JobId, Job>>>,
}

impl JobRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job (normally in `Queued` state).
    pub fn insert(&self, job: Job) {
        self.jobs.write().insert(job.id, job);
    }

    /// Copy of one job.
    #[must_use]
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().get(&id).cloned()
    }

    /// Replace a job's state. Returns the previous state.
    pub fn set_state(&self, id: JobId, state: JobState) -> Option<JobState> {
        self.jobs
            .write()
            .get_mut(&id)
            .map(|job| std::mem::replace(&mut job.state, state))
    }

    /// Number of jobs currently running.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|job| job.state.is_running())
            .count()
    }

    /// Ids of running jobs.
    #[must_use]
    pub fn running_ids(&self) -> Vec<JobId> {
        self.jobs
            .read()
            .values()
            .filter(|job| job.state.is_running())
            .map(|job| job.id)
            .collect()
    }

    /// Jobs that finished with anything other than success.
    #[must_use]
    pub fn unsuccessful(&self) -> Vec<Job> {
        self.jobs
            .read()
            .values()
            .filter(|job| matches!(&job.state, JobState::Finished(outcome) if !outcome.is_success()))
            .cloned()
            .collect()
    }

    /// Number of jobs with `role` that reached the running state or beyond.
    #[must_use]
    pub fn launched(&self, role: JobRole) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|job| job.role == role)
            .filter(|job| match &job.state {
                JobState::Running { .. } => true,
                JobState::Finished(outcome) => *outcome != JobOutcome::Abandoned,
                JobState::Queued => false,
            })
            .count()
    }

    /// Keys with at least one unsuccessful Primary, plus keys whose
    /// Secondaries were abandoned.
    #[must_use]
    pub fn failed_keys(&self) -> Vec<DedupKey> {
        let mut keys: Vec<DedupKey> = self
            .unsuccessful()
            .into_iter()
            .filter(|job| job.role == JobRole::Primary || job.state == JobState::Finished(JobOutcome::Abandoned))
            .map(|job| job.dedup_key)
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Counts by state.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let jobs = self.jobs.read();
        let mut stats = RegistryStats::default();
        for job in jobs.values() {
            match &job.state {
                JobState::Queued => stats.queued += 1,
                JobState::Running { .. } => stats.running += 1,
                JobState::Finished(JobOutcome::Success) => stats.succeeded += 1,
                JobState::Finished(JobOutcome::Error { .. }) => stats.failed += 1,
                JobState::Finished(JobOutcome::Abandoned) => stats.abandoned += 1,
            }
        }
        stats
    }

    /// Copy of every job, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Job> {
        self.jobs.read().values().cloned().collect()
    }
}
