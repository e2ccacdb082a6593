//! On-disk job conventions: scripts, logs, pid list and completion markers.
//!
//! For a job named `{basename}` in `{basedir}`:
//!
//! - `{basedir}/logs/{basename}.log` captures stdout and stderr
//! - `{basedir}/pids.txt` lists spawned process ids, one per line
//! - `{basedir}/.Running_{basename}` exists while the command executes
//! - `{basedir}/.Finished_{basename}_0` marks success
//! - `{basedir}/.Finished_{basename}_error` marks failure
//! - `{basedir}/{basename}.batch` and `{basedir}/{basename}_cmd.batch` are
//!   the transient launcher and command scripts

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Prefix of every completion marker file name.
pub const FINISHED_PREFIX: &str = ".Finished_";
/// Prefix of every running marker file name.
pub const RUNNING_PREFIX: &str = ".Running_";
/// Suffix of a success marker.
pub const SUCCESS_SUFFIX: &str = "_0";
/// Suffix of a failure marker.
pub const ERROR_SUFFIX: &str = "_error";
/// Shared pid list file name.
pub const PID_FILE: &str = "pids.txt";
/// Log directory name.
pub const LOG_DIR: &str = "logs";

/// Completion state read back from a job's markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    /// No marker present.
    Pending,
    /// Only the running marker is present.
    Running,
    /// Success marker present.
    Succeeded,
    /// Error marker present.
    Failed,
}

/// Paths for one job's files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFiles {
    basedir: PathBuf,
    basename: String,
}

impl JobFiles {
    /// File set for `basename` under `basedir`.
    pub fn new(basedir: impl Into<PathBuf>, basename: impl Into<String>) -> Self {
        Self {
            basedir: basedir.into(),
            basename: basename.into(),
        }
    }

    /// Job basename.
    #[must_use]
    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// Base directory.
    #[must_use]
    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    /// Log directory.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.basedir.join(LOG_DIR)
    }

    /// Captured output of the job.
    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.log_dir().join(format!("{}.log", self.basename))
    }

    /// Shared pid list.
    #[must_use]
    pub fn pid_file(&self) -> PathBuf {
        self.basedir.join(PID_FILE)
    }

    /// Marker present while the command executes.
    #[must_use]
    pub fn running_marker(&self) -> PathBuf {
        self.basedir.join(format!("{RUNNING_PREFIX}{}", self.basename))
    }

    /// Success marker.
    #[must_use]
    pub fn success_marker(&self) -> PathBuf {
        self.basedir.join(self.success_name())
    }

    /// Failure marker.
    #[must_use]
    pub fn error_marker(&self) -> PathBuf {
        self.basedir.join(self.error_name())
    }

    /// File name of the success marker.
    #[must_use]
    pub fn success_name(&self) -> String {
        self.finished_name(SUCCESS_SUFFIX)
    }

    /// File name of the failure marker.
    #[must_use]
    pub fn error_name(&self) -> String {
        self.finished_name(ERROR_SUFFIX)
    }

    fn finished_name(&self, suffix: &str) -> String {
        format!("{FINISHED_PREFIX}{}{suffix}", self.basename)
    }

    /// Outer launcher script.
    #[must_use]
    pub fn launcher_script(&self) -> PathBuf {
        self.basedir.join(format!("{}.batch", self.basename))
    }

    /// Inner command script.
    #[must_use]
    pub fn command_script(&self) -> PathBuf {
        self.basedir.join(format!("{}_cmd.batch", self.basename))
    }

    /// Remove stale markers and scripts from a previous run of this job.
    ///
    /// # Errors
    ///
    /// Returns the first removal failure other than "not found".
    pub fn clear_stale(&self) -> io::Result<()> {
        for path in [
            self.success_marker(),
            self.error_marker(),
            self.running_marker(),
            self.launcher_script(),
            self.command_script(),
        ] {
            remove_if_present(&path)?;
        }
        Ok(())
    }

    /// Read the job's marker state from disk.
    #[must_use]
    pub fn state(&self) -> MarkerState {
        if self.error_marker().exists() {
            MarkerState::Failed
        } else if self.success_marker().exists() {
            MarkerState::Succeeded
        } else if self.running_marker().exists() {
            MarkerState::Running
        } else {
            MarkerState::Pending
        }
    }

    /// Body of the inner command script.
    ///
    /// The command runs in a subshell so `exit` or `exec` inside it cannot
    /// skip the marker writes. Its status is captured immediately after, so
    /// exactly one completion marker is written.
    #[must_use]
    pub fn command_script_body(&self, command: &str) -> String {
        let running = self.running_marker();
        format!(
            "touch {running}\n\
             (\n\
             {command}\n\
             )\n\
             exit_code=$?\n\
             rm -f {running}\n\
             if [ $exit_code -ne 0 ]\n\
             then touch {error}\n\
             else touch {success}\n\
             fi\n\
             exit $exit_code\n",
            running = running.display(),
            error = self.error_marker().display(),
            success = self.success_marker().display(),
        )
    }

    /// Body of the outer launcher script.
    ///
    /// Starts the command script under `nohup`, records its pid, then
    /// deletes both scripts once the child has had `settle_secs` to open its
    /// script.
    #[must_use]
    pub fn launcher_script_body(&self, settle_secs: u64) -> String {
        format!(
            "export PYTHONUNBUFFERED=1\n\
             nohup sh {cmd} > {log} 2>&1 &\n\
             echo $! >> {pids}\n\
             sleep {settle_secs}\n\
             rm -f {batch}\n\
             rm -f {cmd}\n",
            cmd = self.command_script().display(),
            log = self.log_file().display(),
            pids = self.pid_file().display(),
            batch = self.launcher_script().display(),
        )
    }
}

/// Append one pid line to the shared pid list.
///
/// # Errors
///
/// Fails if the pid file cannot be opened or written.
pub fn append_pid(pid_file: &Path, pid: u32) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(pid_file)?;
    writeln!(file, "{pid}")
}

/// List completion marker names in `dir`.
///
/// A directory listing can fail part-way while other processes create or
/// remove files, so failed listings are retried up to `retries` more times.
///
/// # Errors
///
/// Returns the last listing error once retries are exhausted.
pub fn scan_finished_markers(dir: &Path, retries: usize) -> io::Result<HashSet<String>> {
    let mut attempt = 0;
    loop {
        match list_finished(dir) {
            Ok(names) => return Ok(names),
            Err(e) if attempt < retries => {
                attempt += 1;
                tracing::debug!(error = %e, attempt, "marker scan failed, retrying");
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(e),
        }
    }
}

fn list_finished(dir: &Path) -> io::Result<HashSet<String>> {
    let mut names = HashSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with(FINISHED_PREFIX) {
                names.insert(name.to_string());
            }
        }
    }
    Ok(names)
}

/// Remove a file, treating "not found" as success.
///
/// # Errors
///
/// Any other removal failure.
pub fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_follow_conventions() {
        let files = JobFiles::new("/img", "chan-0001-image");
        assert_eq!(files.log_file(), PathBuf::from("/img/logs/chan-0001-image.log"));
        assert_eq!(files.pid_file(), PathBuf::from("/img/pids.txt"));
        assert_eq!(files.running_marker(), PathBuf::from("/img/.Running_chan-0001-image"));
        assert_eq!(files.success_marker(), PathBuf::from("/img/.Finished_chan-0001-image_0"));
        assert_eq!(files.error_marker(), PathBuf::from("/img/.Finished_chan-0001-image_error"));
        assert_eq!(files.launcher_script(), PathBuf::from("/img/chan-0001-image.batch"));
        assert_eq!(files.command_script(), PathBuf::from("/img/chan-0001-image_cmd.batch"));
    }

    #[test]
    fn test_command_script_captures_status_before_cleanup() {
        let body = JobFiles::new("/d", "j").command_script_body("false");
        let cmd = body.find("false\n").unwrap();
        let capture = body.find("exit_code=$?").unwrap();
        let rm = body.find("rm -f /d/.Running_j").unwrap();
        assert!(cmd < capture && capture < rm);
        assert!(body.contains("[ $exit_code -ne 0 ]"));
    }

    #[test]
    fn test_exiting_command_still_writes_error_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let files = JobFiles::new(tmp.path(), "quits");
        fs::write(files.command_script(), files.command_script_body("exit 3")).unwrap();
        let status = std::process::Command::new("sh")
            .arg(files.command_script())
            .status()
            .unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(files.state(), MarkerState::Failed);
        assert!(!files.running_marker().exists());
        assert!(!files.success_marker().exists());
    }

    #[test]
    fn test_exec_command_still_writes_success_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let files = JobFiles::new(tmp.path(), "execs");
        fs::write(files.command_script(), files.command_script_body("exec true")).unwrap();
        let status = std::process::Command::new("sh")
            .arg(files.command_script())
            .status()
            .unwrap();
        assert!(status.success());
        assert_eq!(files.state(), MarkerState::Succeeded);
        assert!(!files.running_marker().exists());
    }

    #[test]
    fn test_clear_stale_removes_markers() {
        let tmp = tempfile::tempdir().unwrap();
        let files = JobFiles::new(tmp.path(), "job");
        fs::write(files.success_marker(), b"").unwrap();
        fs::write(files.error_marker(), b"").unwrap();
        files.clear_stale().unwrap();
        assert_eq!(files.state(), MarkerState::Pending);
        files.clear_stale().unwrap();
    }

    #[test]
    fn test_state_reads_markers() {
        let tmp = tempfile::tempdir().unwrap();
        let files = JobFiles::new(tmp.path(), "job");
        fs::write(files.running_marker(), b"").unwrap();
        assert_eq!(files.state(), MarkerState::Running);
        fs::write(files.success_marker(), b"").unwrap();
        assert_eq!(files.state(), MarkerState::Succeeded);
    }

    #[test]
    fn test_append_pid_accumulates_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let pids = tmp.path().join(PID_FILE);
        append_pid(&pids, 41).unwrap();
        append_pid(&pids, 42).unwrap();
        assert_eq!(fs::read_to_string(&pids).unwrap(), "41\n42\n");
    }

    #[test]
    fn test_scan_only_returns_finished_markers() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(".Finished_a_0"), b"").unwrap();
        fs::write(tmp.path().join(".Finished_b_error"), b"").unwrap();
        fs::write(tmp.path().join(".Running_c"), b"").unwrap();
        fs::write(tmp.path().join("other"), b"").unwrap();
        let names = scan_finished_markers(tmp.path(), 0).unwrap();
        assert_eq!(names.len(), 2);
        assert!(names.contains(".Finished_a_0"));
        assert!(names.contains(".Finished_b_error"));
    }

    #[test]
    fn test_scan_missing_dir_errors_after_retries() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(scan_finished_markers(&tmp.path().join("nope"), 1).is_err());
    }
}
