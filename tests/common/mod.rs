//! Shared fixtures: a fake beam tool, image files and fast scheduler settings.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use pbcor_batch::config::{BeamConfig, SchedulerConfig};
use pbcor_batch::core::ResourceSnapshot;
use pbcor_batch::infra::FixedMonitor;

/// One MiB.
pub const MIB: u64 = 1024 * 1024;

/// Stand-in for the correction script.
///
/// Writes `<outfile>.fits` into the working directory, saves the artifact
/// for `--save_pb`, refuses to run if a `--pb_jones_file` artifact is
/// missing and fails for images whose name contains `FAIL`. Images whose
/// name contains `CRASH` fail after the artifact is saved. Every
/// invocation is appended to `invocations.log` as `<role> <image>`.
const FAKE_TOOL: &str = r#"outfile=""
save=""
reuse=""
image=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outfile) outfile="$2"; shift 2 ;;
    --save_pb) save="$2"; shift 2 ;;
    --pb_jones_file) reuse="$2"; shift 2 ;;
    --imagename) image="$2"; shift 2 ;;
    *) shift ;;
  esac
done
if [ -n "$save" ]; then role=primary; else role=secondary; fi
echo "$role $(basename "$image")" >> invocations.log
case "$image" in
  *FAIL*) echo "simulated failure" >&2; exit 3 ;;
esac
if [ -n "$reuse" ] && [ ! -f "$reuse" ]; then
  echo "missing artifact $reuse" >&2
  exit 4
fi
sleep 0.1
if [ -n "$save" ]; then : > "$save.npy"; fi
case "$image" in
  *CRASH*) echo "simulated crash after saving" >&2; exit 7 ;;
esac
: > "$outfile.fits"
"#;

/// Write the fake tool into `dir` and return a beam config that runs it.
pub fn fake_beam(dir: &Path) -> BeamConfig {
    let script = dir.join("fake_mwapb.sh");
    fs::write(&script, FAKE_TOOL).unwrap();
    BeamConfig {
        python: "sh".into(),
        script: script.display().to_string(),
        ..BeamConfig::default()
    }
}

/// Scheduler settings with millisecond polling.
pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        initial_delay_ms: 10,
        poll_interval_ms: 20,
        slot_timeout_secs: Some(60),
        ..SchedulerConfig::default()
    }
}

/// Idle 8-core host with `mem_bytes` available.
pub fn idle_host(mem_bytes: u64) -> FixedMonitor {
    FixedMonitor::idle(8, mem_bytes)
}

/// Busy snapshot that fails every capacity check.
pub fn busy_snapshot() -> ResourceSnapshot {
    ResourceSnapshot {
        cpu_busy_pct: 99.0,
        mem_available_pct: 5.0,
        mem_available_bytes: MIB,
        swap_available_pct: None,
    }
}

/// Create `<dir>/<name>` holding `bytes` zero bytes.
pub fn write_image(dir: &Path, name: &str, bytes: u64) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, vec![0u8; usize::try_from(bytes).unwrap()]).unwrap();
    path
}

/// Image names for `per_channel` images in each of `channels`.
pub fn image_names(channels: &[u32], per_channel: &[usize]) -> Vec<String> {
    channels
        .iter()
        .zip(per_channel)
        .flat_map(|(ch, n)| (1..=*n).map(move |i| format!("obs-coch-{ch}-t{i:04}-image.fits")))
        .collect()
}

/// Lines of `invocations.log`, in invocation order.
pub fn invocations(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("invocations.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}

/// Number of entries in `dir`.
pub fn count_entries(dir: &Path) -> usize {
    fs::read_dir(dir).map_or(0, |entries| entries.count())
}
