//! Job launch: materialize scripts, start the process, record its pid.
//!
//! Two launch modes are supported:
//!
//! - **Supervised**: the command script runs as a direct child. A supervisor
//!   thread owns the process handle, waits for exit and reports the outcome on
//!   the completion channel.
//! - **Detached**: a launcher script starts the command script under `nohup`
//!   so it outlives the scheduler. Completion is learned from marker files.
//!
//! Both modes write the same markers, logs and pid list.

use std::fs::{self, File};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::job::{Job, JobId, JobOutcome};
use crate::core::markers::{append_pid, remove_if_present, JobFiles};
use crate::core::SchedulerError;
use crate::util::clock::now_ms;

/// How job processes are started and observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Child process with an owned handle; exit status reported on a channel.
    #[default]
    Supervised,
    /// `nohup` launcher script; completion observed through marker files.
    Detached,
}

/// How the tracker learns that a running job finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSource {
    /// A [`JobCompletion`] arrives on the completion channel.
    Channel,
    /// A completion marker appears on disk.
    Markers,
}

/// Terminal report for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCompletion {
    /// Finished job.
    pub job_id: JobId,
    /// How it ended.
    pub outcome: JobOutcome,
}

/// Sending half of the completion channel.
pub type CompletionSender = Sender<JobCompletion>;
/// Receiving half of the completion channel.
pub type CompletionReceiver = Receiver<JobCompletion>;

/// Create a completion channel.
#[must_use]
pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    unbounded()
}

/// Handle to a started job.
#[derive(Debug, Clone)]
pub struct RunningHandle {
    /// Job identifier.
    pub job_id: JobId,
    /// OS process id of the command script, when known at submit time.
    pub pid: Option<u32>,
    /// Job's on-disk files.
    pub files: JobFiles,
    /// Start time in milliseconds since epoch.
    pub started_at_ms: u128,
    /// Where completion will be reported.
    pub completion: CompletionSource,
}

/// Starts jobs without waiting for them to finish.
pub trait JobLauncher {
    /// Start `job` and return as soon as its process has been started.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Launch`] if scripts cannot be written or the
    /// process cannot be started.
    fn submit(&mut self, job: &Job) -> Result<RunningHandle, SchedulerError>;
}

/// Launches jobs through generated `sh` scripts in a base directory.
#[derive(Debug, Clone)]
pub struct ShellLauncher {
    basedir: PathBuf,
    mode: LaunchMode,
    completions: CompletionSender,
    settle_secs: u64,
}

impl ShellLauncher {
    /// Launcher writing job files under `basedir`.
    pub fn new(basedir: impl Into<PathBuf>, mode: LaunchMode, completions: CompletionSender) -> Self {
        Self {
            basedir: basedir.into(),
            mode,
            completions,
            settle_secs: 2,
        }
    }

    /// Seconds the detached launcher waits before deleting its scripts.
    #[must_use]
    pub const fn with_settle_secs(mut self, settle_secs: u64) -> Self {
        self.settle_secs = settle_secs;
        self
    }

    /// Base directory for scripts, markers and logs.
    #[must_use]
    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    /// Launch mode in use.
    #[must_use]
    pub const fn mode(&self) -> LaunchMode {
        self.mode
    }

    fn prepare(&self, job: &Job) -> std::io::Result<JobFiles> {
        let files = JobFiles::new(&self.basedir, &job.name);
        fs::create_dir_all(files.log_dir())?;
        files.clear_stale()?;
        fs::write(files.command_script(), files.command_script_body(&job.shell_command))?;
        Ok(files)
    }

    fn start_supervised(&self, job: &Job, files: &JobFiles) -> std::io::Result<u32> {
        let log = File::create(files.log_file())?;
        let child = Command::new("sh")
            .arg(files.command_script())
            .current_dir(&self.basedir)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .spawn()?;
        let pid = child.id();
        append_pid(&files.pid_file(), pid)?;

        let job_id = job.id;
        let name = job.name.clone();
        let script = files.command_script();
        let tx = self.completions.clone();
        thread::Builder::new()
            .name(format!("pbcor-job-{job_id}"))
            .spawn(move || supervise(child, job_id, &name, &script, &tx))?;
        Ok(pid)
    }

    fn start_detached(&self, job: &Job, files: &JobFiles) -> std::io::Result<()> {
        fs::write(files.launcher_script(), files.launcher_script_body(self.settle_secs))?;
        let mut launcher = Command::new("sh")
            .arg(files.launcher_script())
            .current_dir(&self.basedir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        // The launcher exits after its settle delay; reap it off-thread.
        let name = job.name.clone();
        thread::Builder::new()
            .name(format!("pbcor-launch-{}", job.id))
            .spawn(move || {
                if let Err(e) = launcher.wait() {
                    warn!(job = %name, error = %e, "failed to reap launcher script");
                }
            })?;
        Ok(())
    }
}

impl JobLauncher for ShellLauncher {
    fn submit(&mut self, job: &Job) -> Result<RunningHandle, SchedulerError> {
        let launch_err = |source| SchedulerError::Launch {
            job: job.name.clone(),
            source,
        };
        let files = self.prepare(job).map_err(launch_err)?;

        let (pid, completion) = match self.mode {
            LaunchMode::Supervised => (
                Some(self.start_supervised(job, &files).map_err(launch_err)?),
                CompletionSource::Channel,
            ),
            LaunchMode::Detached => {
                self.start_detached(job, &files).map_err(launch_err)?;
                (None, CompletionSource::Markers)
            }
        };

        info!(job = %job.name, key = %job.dedup_key, role = ?job.role, pid = ?pid, "job launched");
        Ok(RunningHandle {
            job_id: job.id,
            pid,
            files,
            started_at_ms: now_ms(),
            completion,
        })
    }
}

fn supervise(mut child: Child, job_id: JobId, name: &str, script: &Path, tx: &CompletionSender) {
    let outcome = match child.wait() {
        Ok(status) => outcome_from_status(status),
        Err(e) => {
            warn!(job = %name, error = %e, "failed to wait for job process");
            JobOutcome::Error { exit_code: None }
        }
    };
    if let Err(e) = remove_if_present(script) {
        debug!(job = %name, error = %e, "could not remove command script");
    }
    debug!(job = %name, ?outcome, "job process exited");
    // The tracker may already be gone if the batch was cancelled.
    let _ = tx.send(JobCompletion { job_id, outcome });
}

fn outcome_from_status(status: ExitStatus) -> JobOutcome {
    if status.success() {
        JobOutcome::Success
    } else {
        JobOutcome::Error {
            exit_code: status.code(),
        }
    }
}
