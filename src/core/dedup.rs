//! Work deduplication by artifact key.
//!
//! The first item seen for a key becomes a Primary job that computes the
//! shared artifact; every later item with that key becomes a Secondary that
//! reuses it. Items are visited in name order so repeated runs over the same
//! inputs elect the same Primaries.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::job::{DedupKey, Job, JobRole, JobState, WorkItem};

/// Where per-key artifacts live on disk: `{dir}/{prefix}{key}.{extension}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLayout {
    /// Artifact directory.
    pub dir: PathBuf,
    /// File name prefix.
    pub prefix: String,
    /// File extension, without the dot.
    pub extension: String,
}

impl ArtifactLayout {
    /// Layout with the given directory, prefix and extension.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            extension: extension.into(),
        }
    }

    /// Artifact path for a key.
    #[must_use]
    pub fn path(&self, key: &DedupKey) -> PathBuf {
        self.dir
            .join(format!("{}{}.{}", self.prefix, key, self.extension))
    }

    /// True when the artifact for `key` is on disk.
    #[must_use]
    pub fn exists(&self, key: &DedupKey) -> bool {
        self.path(key).is_file()
    }
}

/// Why an item produced no job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Its output already exists.
    OutputExists,
}

/// An item left out of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    /// Item name.
    pub name: String,
    /// Reason it was skipped.
    pub reason: SkipReason,
}

/// Result of [`WorkDeduplicator::partition`].
#[derive(Debug, Clone, Default)]
pub struct Partition {
    /// Jobs that compute and cache their key's artifact.
    pub primaries: Vec<Job>,
    /// Jobs that reuse an artifact.
    pub secondaries: Vec<Job>,
    /// Items with nothing left to do.
    pub skipped: Vec<SkippedItem>,
}

impl Partition {
    /// True when no job needs to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primaries.is_empty() && self.secondaries.is_empty()
    }

    /// Total jobs to run.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.primaries.len() + self.secondaries.len()
    }
}

/// Splits work items into Primary and Secondary jobs.
#[derive(Debug, Clone)]
pub struct WorkDeduplicator {
    artifacts: ArtifactLayout,
}

impl WorkDeduplicator {
    /// Deduplicator writing artifacts according to `artifacts`.
    #[must_use]
    pub const fn new(artifacts: ArtifactLayout) -> Self {
        Self { artifacts }
    }

    /// Artifact layout in use.
    #[must_use]
    pub const fn artifacts(&self) -> &ArtifactLayout {
        &self.artifacts
    }

    /// Partition `items` into jobs, rendering commands with `threads_per_job`.
    ///
    /// Items whose output exists are skipped whether or not their key's
    /// artifact is still on disk, since the artifact is only needed to produce
    /// outputs. A key whose artifact is already on disk gets no Primary: all of
    /// its remaining items reuse the artifact.
    #[must_use]
    pub fn partition(&self, mut items: Vec<WorkItem>, threads_per_job: usize) -> Partition {
        items.sort_by(|a, b| a.name.cmp(&b.name));

        let mut partition = Partition::default();
        let mut elected: BTreeSet<DedupKey> = BTreeSet::new();
        let mut next_id = 0;

        for item in items {
            if item.output_path.exists() {
                tracing::debug!(item = %item.name, "output exists, skipping");
                partition.skipped.push(SkippedItem {
                    name: item.name,
                    reason: SkipReason::OutputExists,
                });
                continue;
            }

            let artifact = self.artifacts.path(&item.dedup_key);
            let role = if elected.contains(&item.dedup_key) || artifact.is_file() {
                JobRole::Secondary
            } else {
                elected.insert(item.dedup_key.clone());
                JobRole::Primary
            };

            let job = build_job(next_id, item, role, artifact, threads_per_job);
            next_id += 1;
            match role {
                JobRole::Primary => partition.primaries.push(job),
                JobRole::Secondary => partition.secondaries.push(job),
            }
        }

        tracing::info!(
            primaries = partition.primaries.len(),
            secondaries = partition.secondaries.len(),
            skipped = partition.skipped.len(),
            "work partitioned"
        );
        partition
    }
}

fn build_job(id: u64, item: WorkItem, role: JobRole, artifact: PathBuf, threads: usize) -> Job {
    let shell_command = item.command.render(threads, role, &artifact);
    Job {
        id,
        name: item.name,
        shell_command,
        dedup_key: item.dedup_key,
        role,
        artifact_path: artifact,
        output_path: item.output_path,
        state: JobState::Queued,
    }
}
