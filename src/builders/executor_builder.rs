//! Wire a [`ParallelExecutor`] from [`SchedulerConfig`].

use std::path::Path;

use crate::config::SchedulerConfig;
use crate::core::{
    completion_channel, ArtifactLayout, CapacityPlanner, CompletionTracker, ParallelExecutor,
    ResourceMonitor, SchedulerError, ShellLauncher, WorkDeduplicator,
};

/// Executor launching jobs through `sh` scripts.
pub type ShellExecutor<M> = ParallelExecutor<M, ShellLauncher>;

/// Build an executor that writes job files under `basedir` and shares
/// artifacts according to `artifacts`.
///
/// # Errors
///
/// [`SchedulerError::Configuration`] if `cfg` does not validate.
pub fn build_executor<M>(
    cfg: &SchedulerConfig,
    monitor: M,
    basedir: &Path,
    artifacts: ArtifactLayout,
) -> Result<ShellExecutor<M>, SchedulerError>
where
    M: ResourceMonitor,
{
    cfg.validate()
        .map_err(|e| SchedulerError::Configuration(format!("config invalid: {e}")))?;

    let (tx, rx) = completion_channel();
    let launcher = ShellLauncher::new(basedir, cfg.launch_mode, tx);
    let tracker = CompletionTracker::new(rx, cfg.tracker_settings());
    let planner = CapacityPlanner::new(cfg.footprint_multiplier);
    let dedup = WorkDeduplicator::new(artifacts);

    Ok(ParallelExecutor::new(monitor, launcher, tracker, planner, dedup).with_slot_timeout(cfg.slot_timeout()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LaunchMode;
    use crate::infra::FixedMonitor;

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = SchedulerConfig {
            poll_interval_ms: 0,
            ..SchedulerConfig::default()
        };
        let result = build_executor(
            &cfg,
            FixedMonitor::idle(2, 1 << 30),
            Path::new("/tmp"),
            ArtifactLayout::new("/tmp/pbs", "pbfile_", "npy"),
        );
        assert!(matches!(result, Err(SchedulerError::Configuration(_))));
    }

    #[test]
    fn test_launcher_follows_config() {
        let cfg = SchedulerConfig {
            launch_mode: LaunchMode::Detached,
            ..SchedulerConfig::default()
        };
        let executor = build_executor(
            &cfg,
            FixedMonitor::idle(2, 1 << 30),
            Path::new("/data/img"),
            ArtifactLayout::new("/data/img/pbs", "pbfile_", "npy"),
        )
        .unwrap();
        assert_eq!(executor.launcher().mode(), LaunchMode::Detached);
        assert_eq!(executor.launcher().basedir(), Path::new("/data/img"));
    }
}
