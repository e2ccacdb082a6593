//! Work items, jobs and their lifecycle states.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Unique job identifier within one batch.
pub type JobId = u64;

/// Groups work items that share one expensive artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    /// Wrap a key value.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a job computes the shared artifact or reuses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRole {
    /// First job for its key: performs the work and writes the artifact.
    Primary,
    /// Reuses the artifact written by the Primary with the same key.
    Secondary,
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Command exited with status 0.
    Success,
    /// Command exited non-zero (or was killed); `exit_code` is `None` when unknown.
    Error {
        /// Exit status, if one was reported.
        exit_code: Option<i32>,
    },
    /// Never submitted because its key's artifact does not exist.
    Abandoned,
}

impl JobOutcome {
    /// True for [`JobOutcome::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a slot (or for its key's artifact).
    Queued,
    /// Process started.
    Running {
        /// OS process id, when known.
        pid: Option<u32>,
        /// Start time in milliseconds since epoch.
        started_at_ms: u128,
    },
    /// Terminal state.
    Finished(JobOutcome),
}

impl JobState {
    /// True while the job occupies a concurrency slot.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// Shell command with a `{threads}` placeholder and the flags used to
/// write or reuse the shared artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    /// Command line; every `{threads}` is replaced by the planned thread count.
    pub line: String,
    /// Flag that tells the command where to save the artifact (Primary).
    pub save_flag: String,
    /// Flag that tells the command which artifact to load (Secondary).
    pub reuse_flag: String,
    /// Pass the artifact path without its extension to `save_flag`.
    pub save_to_stem: bool,
}

/// Placeholder substituted with the planned per-job thread count.
pub const THREADS_PLACEHOLDER: &str = "{threads}";

impl CommandTemplate {
    /// Template without artifact flags.
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            save_flag: "--save_pb".into(),
            reuse_flag: "--pb_jones_file".into(),
            save_to_stem: true,
        }
    }

    /// Override the artifact flags.
    #[must_use]
    pub fn with_flags(mut self, save_flag: impl Into<String>, reuse_flag: impl Into<String>) -> Self {
        self.save_flag = save_flag.into();
        self.reuse_flag = reuse_flag.into();
        self
    }

    /// Choose whether the save flag receives the artifact stem or full path.
    #[must_use]
    pub const fn with_save_to_stem(mut self, save_to_stem: bool) -> Self {
        self.save_to_stem = save_to_stem;
        self
    }

    /// Render the final shell command for a role.
    #[must_use]
    pub fn render(&self, threads: usize, role: JobRole, artifact: &Path) -> String {
        let base = self.line.replace(THREADS_PLACEHOLDER, &threads.to_string());
        match role {
            JobRole::Primary => {
                let target = if self.save_to_stem {
                    artifact.with_extension("")
                } else {
                    artifact.to_path_buf()
                };
                format!("{base} {} {}", self.save_flag, target.display())
            }
            JobRole::Secondary => format!("{base} {} {}", self.reuse_flag, artifact.display()),
        }
    }
}

/// One unit of work before deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Job name; also the basename of its marker, script and log files.
    pub name: String,
    /// Command to run.
    pub command: CommandTemplate,
    /// Key of the artifact this item shares.
    pub dedup_key: DedupKey,
    /// Canonical output location; the item is skipped when it exists.
    pub output_path: PathBuf,
}

impl WorkItem {
    /// Create a work item.
    pub fn new(
        name: impl Into<String>,
        command: CommandTemplate,
        dedup_key: DedupKey,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            command,
            dedup_key,
            output_path: output_path.into(),
        }
    }
}

/// A deduplicated, rendered job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Identifier within the batch.
    pub id: JobId,
    /// Basename used for markers, scripts and logs.
    pub name: String,
    /// Shell command to run.
    pub shell_command: String,
    /// Artifact key.
    pub dedup_key: DedupKey,
    /// Primary or Secondary.
    pub role: JobRole,
    /// Artifact written (Primary) or read (Secondary).
    pub artifact_path: PathBuf,
    /// Canonical output location.
    pub output_path: PathBuf,
    /// Current lifecycle state.
    pub state: JobState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_primary_saves_to_stem() {
        let tpl = CommandTemplate::new("run --num_threads {threads}");
        let cmd = tpl.render(4, JobRole::Primary, Path::new("/data/pbs/pbfile_121.npy"));
        assert_eq!(cmd, "run --num_threads 4 --save_pb /data/pbs/pbfile_121");
    }

    #[test]
    fn test_render_secondary_reuses_full_path() {
        let tpl = CommandTemplate::new("run --num_threads {threads}");
        let cmd = tpl.render(2, JobRole::Secondary, Path::new("/data/pbs/pbfile_121.npy"));
        assert_eq!(cmd, "run --num_threads 2 --pb_jones_file /data/pbs/pbfile_121.npy");
    }

    #[test]
    fn test_render_custom_flags() {
        let tpl = CommandTemplate::new("make")
            .with_flags("--out", "--in")
            .with_save_to_stem(false);
        let cmd = tpl.render(1, JobRole::Primary, Path::new("a/b.bin"));
        assert_eq!(cmd, "make --out a/b.bin");
    }

    #[test]
    fn test_state_running() {
        assert!(JobState::Running { pid: Some(1), started_at_ms: 0 }.is_running());
        assert!(!JobState::Queued.is_running());
        assert!(!JobState::Finished(JobOutcome::Success).is_running());
    }
}
