//! Batch orchestration: plan, deduplicate, submit, wait, drain, collect.
//!
//! Primaries for every key are queued first. A key's Secondaries are
//! released only after its Primary finished and the artifact exists on
//! disk; if the artifact never appears they are abandoned without being
//! submitted. Job failures never abort the batch. They are collected into
//! the [`BatchReport`].

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::core::cancel::CancellationToken;
use crate::core::dedup::{Partition, WorkDeduplicator};
use crate::core::job::{DedupKey, JobId, JobOutcome, JobRole, JobState, WorkItem};
use crate::core::launcher::{JobCompletion, JobLauncher};
use crate::core::markers::{remove_if_present, JobFiles, MarkerState};
use crate::core::monitor::ResourceMonitor;
use crate::core::planner::{CapacityPlan, CapacityPlanner};
use crate::core::registry::{JobRegistry, RegistryStats};
use crate::core::tracker::CompletionTracker;
use crate::core::SchedulerError;

/// Moves finished outputs from the working directory into the canonical
/// output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputCollector {
    /// Directory jobs write their outputs into.
    pub staging_dir: PathBuf,
    /// File name suffix identifying outputs.
    pub suffix: String,
    /// Canonical output directory.
    pub dest_dir: PathBuf,
}

impl OutputCollector {
    /// Collector moving `*{suffix}` files from `staging_dir` to `dest_dir`.
    pub fn new(staging_dir: impl Into<PathBuf>, suffix: impl Into<String>, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            suffix: suffix.into(),
            dest_dir: dest_dir.into(),
        }
    }

    /// Move matching files into the destination. Returns how many moved.
    ///
    /// # Errors
    ///
    /// Fails if a directory cannot be read or a file cannot be renamed.
    pub fn collect(&self) -> io::Result<usize> {
        fs::create_dir_all(&self.dest_dir)?;
        let mut moved = 0;
        for entry in fs::read_dir(&self.staging_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name_str) = name.to_str() else { continue };
            if name_str.ends_with(&self.suffix) && entry.file_type()?.is_file() {
                fs::rename(entry.path(), self.dest_dir.join(&name))?;
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// Number of entries in the destination directory.
    #[must_use]
    pub fn count(&self) -> usize {
        fs::read_dir(&self.dest_dir).map_or(0, |entries| entries.filter_map(Result::ok).count())
    }
}

/// Everything one batch run needs from the caller.
#[derive(Debug, Clone)]
pub struct BatchInput {
    /// Work to deduplicate and run.
    pub items: Vec<WorkItem>,
    /// File whose size stands in for every job's input size.
    pub representative_file: PathBuf,
    /// CPU thread budget; `None` auto-detects.
    pub requested_cpu: Option<usize>,
    /// Memory budget in GiB; `None` auto-detects.
    pub requested_mem_gb: Option<f64>,
    /// Output collection step.
    pub outputs: OutputCollector,
}

/// Overall result of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every output was already present; nothing was launched.
    NothingToDo,
    /// Jobs were launched and drained.
    Completed,
}

/// A job that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    /// Job name.
    pub name: String,
    /// Artifact key.
    pub key: DedupKey,
    /// Primary or Secondary.
    pub role: JobRole,
    /// How it ended.
    pub outcome: JobOutcome,
}

/// Summary of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Identifier of this run.
    pub batch_id: Uuid,
    /// Overall status.
    pub status: BatchStatus,
    /// Plan used, absent when there was no work.
    pub plan: Option<CapacityPlan>,
    /// Primary jobs launched.
    pub primaries_launched: usize,
    /// Secondary jobs launched.
    pub secondaries_launched: usize,
    /// Items skipped because their output existed.
    pub skipped: usize,
    /// Jobs that failed or were abandoned.
    pub failed: Vec<FailedJob>,
    /// Keys whose artifact could not be produced.
    pub failed_keys: Vec<DedupKey>,
    /// Job counts by final state.
    pub stats: RegistryStats,
    /// Outputs moved into the output directory by this run.
    pub moved: usize,
    /// Entries in the output directory after the run.
    pub produced: usize,
    /// Canonical output directory.
    pub output_dir: PathBuf,
    /// Artifact directory.
    pub artifact_dir: PathBuf,
    /// Wall-clock duration in seconds.
    pub elapsed_secs: f64,
}

impl BatchReport {
    /// True when no job failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Observer and cancel handle for a batch running on another thread.
#[derive(Debug, Clone)]
pub struct BatchHandle {
    registry: JobRegistry,
    cancel: CancellationToken,
}

impl BatchHandle {
    /// Current job counts.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Ask the executor to stop. Running jobs are left alone.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Drives one batch of deduplicated jobs through a launcher.
pub struct ParallelExecutor<M, L> {
    monitor: M,
    launcher: L,
    tracker: CompletionTracker,
    planner: CapacityPlanner,
    dedup: WorkDeduplicator,
    registry: JobRegistry,
    cancel: CancellationToken,
    slot_timeout: Option<Duration>,
    files: BTreeMap<JobId, JobFiles>,
}

impl<M, L> ParallelExecutor<M, L>
where
    M: ResourceMonitor,
    L: JobLauncher,
{
    /// Assemble an executor from its parts.
    pub fn new(
        monitor: M,
        launcher: L,
        tracker: CompletionTracker,
        planner: CapacityPlanner,
        dedup: WorkDeduplicator,
    ) -> Self {
        Self {
            monitor,
            launcher,
            tracker,
            planner,
            dedup,
            registry: JobRegistry::new(),
            cancel: CancellationToken::new(),
            slot_timeout: None,
            files: BTreeMap::new(),
        }
    }

    /// Give up waiting for a slot after `timeout`.
    #[must_use]
    pub const fn with_slot_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.slot_timeout = timeout;
        self
    }

    /// Use an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle for observing or cancelling the batch from another thread.
    #[must_use]
    pub fn handle(&self) -> BatchHandle {
        BatchHandle {
            registry: self.registry.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Job registry of the current batch.
    #[must_use]
    pub const fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Launcher in use.
    #[must_use]
    pub const fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Run a batch to completion.
    ///
    /// # Errors
    ///
    /// Aborts on cancellation, slot timeout, or filesystem failures outside
    /// a single job. Individual job failures are reported, not raised.
    pub fn run(&mut self, input: BatchInput) -> Result<BatchReport, SchedulerError> {
        let batch_id = Uuid::new_v4();
        let span = info_span!("batch", %batch_id);
        let _enter = span.enter();
        let started = Instant::now();

        fs::create_dir_all(&self.dedup.artifacts().dir)?;
        fs::create_dir_all(&input.outputs.dest_dir)?;

        if input.items.is_empty() {
            info!("No work items supplied.");
            return Ok(self.report(batch_id, BatchStatus::NothingToDo, None, 0, 0, &input.outputs, started));
        }

        let representative_bytes = fs::metadata(&input.representative_file)?.len();
        let snapshot = self.monitor.sample();
        let plan = self.planner.plan(
            self.monitor.cpu_cores(),
            &snapshot,
            representative_bytes,
            input.requested_cpu,
            input.requested_mem_gb,
        );

        let partition = self.dedup.partition(input.items, plan.threads_per_job);
        let skipped = partition.skipped.len();
        if partition.is_empty() {
            info!("No images to correct. Correction is already done.");
            return Ok(self.report(batch_id, BatchStatus::NothingToDo, Some(plan), skipped, 0, &input.outputs, started));
        }

        info!(
            max_concurrent_jobs = plan.max_concurrent_jobs,
            threads_per_job = plan.threads_per_job,
            jobs = partition.job_count(),
            "Maximum numbers of parallel jobs: {}",
            plan.max_concurrent_jobs
        );

        let mut queues = self.enqueue(partition);
        self.schedule(plan.max_concurrent_jobs, &mut queues)?;

        let moved = input.outputs.collect()?;
        let report = self.report(batch_id, BatchStatus::Completed, Some(plan), skipped, moved, &input.outputs, started);
        info!(
            produced = report.produced,
            failed = report.failed.len(),
            elapsed_secs = report.elapsed_secs,
            "batch finished"
        );
        Ok(report)
    }

    fn enqueue(&self, partition: Partition) -> Queues {
        let mut queues = Queues::default();
        for job in partition.primaries {
            queues.ready.push_back(job.id);
            self.registry.insert(job);
        }
        for job in partition.secondaries {
            queues.waiting.entry(job.dedup_key.clone()).or_default().push(job.id);
            self.registry.insert(job);
        }

        // Keys without a Primary in this batch reuse an artifact from a
        // previous run and can start straight away.
        let primary_keys: Vec<DedupKey> = queues
            .ready
            .iter()
            .filter_map(|id| self.registry.get(*id))
            .map(|job| job.dedup_key)
            .collect();
        let orphaned: Vec<DedupKey> = queues
            .waiting
            .keys()
            .filter(|key| !primary_keys.contains(key))
            .cloned()
            .collect();
        for key in orphaned {
            if let Some(ids) = queues.waiting.remove(&key) {
                queues.ready.extend(ids);
            }
        }
        queues
    }

    fn schedule(&mut self, max_jobs: usize, queues: &mut Queues) -> Result<(), SchedulerError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }
            self.fill_slots(max_jobs, queues);
            if queues.ready.is_empty() && queues.waiting.is_empty() {
                break;
            }
            if self.registry.running_count() == 0 {
                if queues.ready.is_empty() {
                    // Nothing running can still release these keys.
                    let keys: Vec<DedupKey> = queues.waiting.keys().cloned().collect();
                    for key in keys {
                        self.abandon_key(&key, queues);
                    }
                    break;
                }
                continue;
            }
            let release = self.tracker.wait_for_slot(
                &self.registry,
                &mut self.monitor,
                self.slot_timeout,
                &self.cancel,
            )?;
            for completion in release.completions {
                self.complete(completion, queues);
            }
        }

        let remaining = self.tracker.drain(&self.registry, self.slot_timeout, &self.cancel)?;
        for completion in remaining {
            self.complete(completion, queues);
        }
        self.reconcile_markers();
        Ok(())
    }

    /// Surface `_error` markers of jobs the registry believes succeeded.
    fn reconcile_markers(&self) {
        for (id, files) in &self.files {
            if files.state() != MarkerState::Failed {
                continue;
            }
            if let Some(JobState::Finished(JobOutcome::Success)) = self.registry.get(*id).map(|job| job.state) {
                warn!(job = %files.basename(), "error marker found for a job reported successful");
                self.registry
                    .set_state(*id, JobState::Finished(JobOutcome::Error { exit_code: None }));
            }
        }
    }

    fn fill_slots(&mut self, max_jobs: usize, queues: &mut Queues) {
        while self.registry.running_count() < max_jobs {
            if self.cancel.is_cancelled() {
                return;
            }
            let Some(id) = queues.ready.pop_front() else {
                return;
            };
            let Some(job) = self.registry.get(id) else {
                continue;
            };

            if job.role == JobRole::Secondary && !job.artifact_path.is_file() {
                let err = SchedulerError::ArtifactMissing {
                    key: job.dedup_key.clone(),
                    path: job.artifact_path.clone(),
                };
                warn!(job = %job.name, error = %err, "not submitting secondary");
                self.registry.set_state(id, JobState::Finished(JobOutcome::Abandoned));
                continue;
            }

            match self.launcher.submit(&job) {
                Ok(handle) => {
                    self.registry.set_state(
                        id,
                        JobState::Running {
                            pid: handle.pid,
                            started_at_ms: handle.started_at_ms,
                        },
                    );
                    self.tracker.track(&handle);
                    self.files.insert(id, handle.files);
                }
                Err(e) => {
                    error!(job = %job.name, error = %e, "launch failed");
                    self.registry
                        .set_state(id, JobState::Finished(JobOutcome::Error { exit_code: None }));
                    if job.role == JobRole::Primary {
                        self.abandon_key(&job.dedup_key, queues);
                    }
                }
            }
        }
    }

    fn complete(&self, completion: JobCompletion, queues: &mut Queues) {
        let JobCompletion { job_id, outcome } = completion;
        self.registry.set_state(job_id, JobState::Finished(outcome.clone()));
        let Some(job) = self.registry.get(job_id) else {
            return;
        };
        match &outcome {
            JobOutcome::Success => info!(job = %job.name, "job finished"),
            other => warn!(job = %job.name, outcome = ?other, "job failed"),
        }
        if job.role != JobRole::Primary {
            return;
        }
        if !outcome.is_success() {
            // A failed Primary may leave a partial artifact behind.
            if let Err(e) = remove_if_present(&job.artifact_path) {
                warn!(path = %job.artifact_path.display(), error = %e, "could not remove artifact of failed primary");
            }
            self.abandon_key(&job.dedup_key, queues);
        } else if job.artifact_path.is_file() {
            if let Some(ids) = queues.waiting.remove(&job.dedup_key) {
                info!(key = %job.dedup_key, secondaries = ids.len(), "artifact ready, releasing secondaries");
                queues.ready.extend(ids);
            }
        } else {
            let err = SchedulerError::ArtifactMissing {
                key: job.dedup_key.clone(),
                path: job.artifact_path.clone(),
            };
            error!(job = %job.name, error = %err, "primary left no artifact");
            self.abandon_key(&job.dedup_key, queues);
        }
    }

    fn abandon_key(&self, key: &DedupKey, queues: &mut Queues) {
        if let Some(ids) = queues.waiting.remove(key) {
            warn!(key = %key, secondaries = ids.len(), "abandoning secondaries");
            for id in ids {
                self.registry.set_state(id, JobState::Finished(JobOutcome::Abandoned));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        batch_id: Uuid,
        status: BatchStatus,
        plan: Option<CapacityPlan>,
        skipped: usize,
        moved: usize,
        outputs: &OutputCollector,
        started: Instant,
    ) -> BatchReport {
        let failed = self
            .registry
            .unsuccessful()
            .into_iter()
            .map(|job| FailedJob {
                outcome: match job.state {
                    JobState::Finished(outcome) => outcome,
                    _ => JobOutcome::Error { exit_code: None },
                },
                name: job.name,
                key: job.dedup_key,
                role: job.role,
            })
            .collect();
        BatchReport {
            batch_id,
            status,
            plan,
            primaries_launched: self.registry.launched(JobRole::Primary),
            secondaries_launched: self.registry.launched(JobRole::Secondary),
            skipped,
            failed,
            failed_keys: self.registry.failed_keys(),
            stats: self.registry.stats(),
            moved,
            produced: outputs.count(),
            output_dir: outputs.dest_dir.clone(),
            artifact_dir: self.dedup.artifacts().dir.clone(),
            elapsed_secs: started.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Default)]
struct Queues {
    ready: VecDeque<JobId>,
    waiting: BTreeMap<DedupKey, Vec<JobId>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_moves_matching_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("pbcor_images");
        fs::write(tmp.path().join("a_pbcor.fits"), b"a").unwrap();
        fs::write(tmp.path().join("b_pbcor.fits"), b"b").unwrap();
        fs::write(tmp.path().join("c-image.fits"), b"c").unwrap();

        let collector = OutputCollector::new(tmp.path(), "pbcor.fits", &dest);
        assert_eq!(collector.collect().unwrap(), 2);
        assert_eq!(collector.count(), 2);
        assert!(dest.join("a_pbcor.fits").exists());
        assert!(tmp.path().join("c-image.fits").exists());
    }

    #[test]
    fn test_count_missing_dir_is_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let collector = OutputCollector::new(tmp.path(), "x", tmp.path().join("none"));
        assert_eq!(collector.count(), 0);
    }
}
