//! Completion tracking and slot gating.
//!
//! The tracker collects job completions from two sources: the completion
//! channel fed by supervised jobs, and marker files written by detached
//! jobs. A slot is released only when at least one completion not seen
//! before has arrived *and* the host has spare capacity.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use tracing::{debug, info, warn};

use crate::core::cancel::CancellationToken;
use crate::core::job::{JobId, JobOutcome};
use crate::core::launcher::{CompletionReceiver, CompletionSource, JobCompletion, RunningHandle};
use crate::core::markers::{scan_finished_markers, JobFiles};
use crate::core::monitor::{has_capacity, ResourceMonitor, Thresholds};
use crate::core::registry::JobRegistry;
use crate::core::SchedulerError;

/// Polling behaviour of a [`CompletionTracker`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerSettings {
    /// Delay before the first poll of each wait.
    pub initial_delay: Duration,
    /// Interval between polls.
    pub poll_interval: Duration,
    /// Extra attempts for a failed marker directory listing.
    pub marker_scan_retries: usize,
    /// Headroom required before a slot is released.
    pub thresholds: Thresholds,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            marker_scan_retries: 3,
            thresholds: Thresholds::default(),
        }
    }
}

/// Completions released by one [`CompletionTracker::wait_for_slot`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotRelease {
    /// Jobs that finished since the previous release.
    pub completions: Vec<JobCompletion>,
}

impl SlotRelease {
    /// Number of slots freed.
    #[must_use]
    pub fn freed_count(&self) -> usize {
        self.completions.len()
    }
}

/// Observes running jobs and decides when another one may start.
#[derive(Debug)]
pub struct CompletionTracker {
    settings: TrackerSettings,
    receiver: CompletionReceiver,
    watched: HashMap<JobId, JobFiles>,
    observed: HashSet<JobId>,
    pending: Vec<JobCompletion>,
}

impl CompletionTracker {
    /// Tracker reading supervised completions from `receiver`.
    #[must_use]
    pub fn new(receiver: CompletionReceiver, settings: TrackerSettings) -> Self {
        Self {
            settings,
            receiver,
            watched: HashMap::new(),
            observed: HashSet::new(),
            pending: Vec::new(),
        }
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// Start observing a launched job.
    pub fn track(&mut self, handle: &RunningHandle) {
        if handle.completion == CompletionSource::Markers {
            self.watched.insert(handle.job_id, handle.files.clone());
        }
    }

    /// Block until a slot frees up.
    ///
    /// Returns once new completions have been observed and the host has
    /// headroom above the configured floors. If nothing is running, returns
    /// an empty release as soon as the host has headroom.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::Cancelled`] when `cancel` fires
    /// - [`SchedulerError::Timeout`] when `timeout` elapses first
    /// - [`SchedulerError::Io`] when marker directories cannot be listed
    pub fn wait_for_slot(
        &mut self,
        registry: &JobRegistry,
        monitor: &mut dyn ResourceMonitor,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<SlotRelease, SchedulerError> {
        let started = Instant::now();
        self.pause(self.settings.initial_delay, cancel)?;
        let mut notified = false;

        loop {
            if cancel.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }
            self.collect()?;

            let nothing_running = self.outstanding(registry).is_empty();
            if !self.pending.is_empty() || nothing_running {
                let snapshot = monitor.sample();
                if has_capacity(&snapshot, self.settings.thresholds) {
                    let completions = std::mem::take(&mut self.pending);
                    debug!(freed = completions.len(), "slot released");
                    return Ok(SlotRelease { completions });
                }
                debug!(?snapshot, "host below capacity floors");
            }

            if !notified {
                info!("Waiting for free hardware resources ....");
                notified = true;
            }
            check_deadline(started, timeout)?;
            self.wait_for_event();
        }
    }

    /// Block until every running job has finished.
    ///
    /// Resource headroom is not required: nothing new will be submitted.
    ///
    /// # Errors
    ///
    /// Same as [`wait_for_slot`](Self::wait_for_slot).
    pub fn drain(
        &mut self,
        registry: &JobRegistry,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Vec<JobCompletion>, SchedulerError> {
        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }
            self.collect()?;
            let remaining = self.outstanding(registry);
            if remaining.is_empty() {
                return Ok(std::mem::take(&mut self.pending));
            }
            debug!(remaining = remaining.len(), "draining");
            check_deadline(started, timeout)?;
            self.wait_for_event();
        }
    }

    /// Running jobs whose completion has not been collected yet.
    fn outstanding(&self, registry: &JobRegistry) -> Vec<JobId> {
        let collected: HashSet<JobId> = self.pending.iter().map(|c| c.job_id).collect();
        registry
            .running_ids()
            .into_iter()
            .filter(|id| !collected.contains(id))
            .collect()
    }

    fn collect(&mut self) -> Result<(), SchedulerError> {
        while let Ok(completion) = self.receiver.try_recv() {
            self.record(completion);
        }
        self.scan_markers()
    }

    fn record(&mut self, completion: JobCompletion) {
        if self.observed.insert(completion.job_id) {
            self.watched.remove(&completion.job_id);
            self.pending.push(completion);
        }
    }

    fn scan_markers(&mut self) -> Result<(), SchedulerError> {
        if self.watched.is_empty() {
            return Ok(());
        }
        let mut by_dir: BTreeMap<PathBuf, Vec<JobId>> = BTreeMap::new();
        for (id, files) in &self.watched {
            by_dir.entry(files.basedir().to_path_buf()).or_default().push(*id);
        }

        let mut finished = Vec::new();
        for (dir, ids) in by_dir {
            let names = scan_finished_markers(&dir, self.settings.marker_scan_retries)?;
            for id in ids {
                let files = &self.watched[&id];
                let outcome = if names.contains(&files.error_name()) {
                    JobOutcome::Error { exit_code: None }
                } else if names.contains(&files.success_name()) {
                    JobOutcome::Success
                } else {
                    continue;
                };
                finished.push(JobCompletion { job_id: id, outcome });
            }
        }
        for completion in finished {
            debug!(job_id = completion.job_id, outcome = ?completion.outcome, "completion marker observed");
            self.record(completion);
        }
        Ok(())
    }

    fn wait_for_event(&mut self) {
        match self.receiver.recv_timeout(self.settings.poll_interval) {
            Ok(completion) => self.record(completion),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // No launcher left to report; fall back to plain polling.
                thread::sleep(self.settings.poll_interval);
            }
        }
    }

    fn pause(&self, delay: Duration, cancel: &CancellationToken) -> Result<(), SchedulerError> {
        let step = self.settings.poll_interval.max(Duration::from_millis(10));
        let until = Instant::now() + delay;
        loop {
            if cancel.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            thread::sleep(step.min(until - now));
        }
    }
}

fn check_deadline(started: Instant, timeout: Option<Duration>) -> Result<(), SchedulerError> {
    match timeout {
        Some(limit) if started.elapsed() >= limit => {
            warn!(?limit, "gave up waiting for a free slot");
            Err(SchedulerError::Timeout(limit))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::{DedupKey, Job, JobRole, JobState};
    use crate::core::launcher::completion_channel;
    use crate::core::monitor::ResourceSnapshot;
    use std::collections::VecDeque;

    struct ScriptedMonitor {
        snapshots: VecDeque<ResourceSnapshot>,
        last: ResourceSnapshot,
    }

    impl ScriptedMonitor {
        fn new(busy: &[f64]) -> Self {
            let snapshots: VecDeque<_> = busy.iter().map(|b| snap(*b)).collect();
            let last = *snapshots.back().unwrap();
            Self { snapshots, last }
        }
    }

    impl ResourceMonitor for ScriptedMonitor {
        fn sample(&mut self) -> ResourceSnapshot {
            self.snapshots.pop_front().unwrap_or(self.last)
        }
        fn cpu_cores(&self) -> usize {
            4
        }
    }

    fn snap(cpu_busy: f64) -> ResourceSnapshot {
        ResourceSnapshot {
            cpu_busy_pct: cpu_busy,
            mem_available_pct: 80.0,
            mem_available_bytes: 1 << 34,
            swap_available_pct: None,
        }
    }

    fn fast() -> TrackerSettings {
        TrackerSettings {
            initial_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(10),
            ..TrackerSettings::default()
        }
    }

    fn running_job(registry: &JobRegistry, id: JobId) {
        registry.insert(Job {
            id,
            name: format!("job{id}"),
            shell_command: "true".into(),
            dedup_key: DedupKey::new("k"),
            role: JobRole::Primary,
            artifact_path: PathBuf::new(),
            output_path: PathBuf::new(),
            state: JobState::Running {
                pid: None,
                started_at_ms: 0,
            },
        });
    }

    #[test]
    fn test_release_after_channel_completion() {
        let (tx, rx) = completion_channel();
        let mut tracker = CompletionTracker::new(rx, fast());
        let registry = JobRegistry::new();
        running_job(&registry, 1);
        running_job(&registry, 2);

        tx.send(JobCompletion { job_id: 1, outcome: JobOutcome::Success }).unwrap();
        let release = tracker
            .wait_for_slot(&registry, &mut ScriptedMonitor::new(&[0.0]), None, &CancellationToken::new())
            .unwrap();
        assert_eq!(release.freed_count(), 1);
        assert_eq!(release.completions[0].job_id, 1);
    }

    #[test]
    fn test_duplicate_completions_counted_once() {
        let (tx, rx) = completion_channel();
        let mut tracker = CompletionTracker::new(rx, fast());
        let registry = JobRegistry::new();
        running_job(&registry, 1);
        running_job(&registry, 2);

        tx.send(JobCompletion { job_id: 1, outcome: JobOutcome::Success }).unwrap();
        tx.send(JobCompletion { job_id: 1, outcome: JobOutcome::Success }).unwrap();
        let release = tracker
            .wait_for_slot(&registry, &mut ScriptedMonitor::new(&[0.0]), None, &CancellationToken::new())
            .unwrap();
        assert_eq!(release.freed_count(), 1);
    }

    #[test]
    fn test_waits_for_capacity_before_release() {
        let (tx, rx) = completion_channel();
        let mut tracker = CompletionTracker::new(rx, fast());
        let registry = JobRegistry::new();
        running_job(&registry, 1);
        tx.send(JobCompletion { job_id: 1, outcome: JobOutcome::Success }).unwrap();

        let mut monitor = ScriptedMonitor::new(&[99.0, 95.0, 10.0]);
        let release = tracker
            .wait_for_slot(&registry, &mut monitor, None, &CancellationToken::new())
            .unwrap();
        assert_eq!(release.freed_count(), 1);
        assert!(monitor.snapshots.is_empty());
    }

    #[test]
    fn test_marker_completion_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let (_tx, rx) = completion_channel();
        let mut tracker = CompletionTracker::new(rx, fast());
        let registry = JobRegistry::new();
        running_job(&registry, 5);
        let files = JobFiles::new(tmp.path(), "job5");
        tracker.track(&RunningHandle {
            job_id: 5,
            pid: None,
            files: files.clone(),
            started_at_ms: 0,
            completion: CompletionSource::Markers,
        });
        std::fs::write(files.error_marker(), b"").unwrap();

        let release = tracker
            .wait_for_slot(&registry, &mut ScriptedMonitor::new(&[0.0]), None, &CancellationToken::new())
            .unwrap();
        assert_eq!(
            release.completions,
            vec![JobCompletion { job_id: 5, outcome: JobOutcome::Error { exit_code: None } }]
        );
    }

    #[test]
    fn test_timeout() {
        let (_tx, rx) = completion_channel();
        let mut tracker = CompletionTracker::new(rx, fast());
        let registry = JobRegistry::new();
        running_job(&registry, 1);
        let err = tracker
            .wait_for_slot(
                &registry,
                &mut ScriptedMonitor::new(&[0.0]),
                Some(Duration::from_millis(50)),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Timeout(_)));
    }

    #[test]
    fn test_cancellation() {
        let (_tx, rx) = completion_channel();
        let mut tracker = CompletionTracker::new(rx, fast());
        let registry = JobRegistry::new();
        running_job(&registry, 1);
        let cancel = CancellationToken::new();
        let remote = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });
        let err = tracker
            .wait_for_slot(&registry, &mut ScriptedMonitor::new(&[0.0]), None, &cancel)
            .unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, SchedulerError::Cancelled));
    }

    #[test]
    fn test_drain_collects_all() {
        let (tx, rx) = completion_channel();
        let mut tracker = CompletionTracker::new(rx, fast());
        let registry = JobRegistry::new();
        running_job(&registry, 1);
        running_job(&registry, 2);
        let sender = thread::spawn(move || {
            tx.send(JobCompletion { job_id: 2, outcome: JobOutcome::Success }).unwrap();
            thread::sleep(Duration::from_millis(30));
            tx.send(JobCompletion { job_id: 1, outcome: JobOutcome::Error { exit_code: Some(1) } })
                .unwrap();
        });
        let done = tracker.drain(&registry, Some(Duration::from_secs(10)), &CancellationToken::new()).unwrap();
        sender.join().unwrap();
        assert_eq!(done.len(), 2);
    }
}
