//! Request model and entry points used by the binary and embedders.

use std::path::PathBuf;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::builders::build_executor;
use crate::config::{BeamConfig, SchedulerConfig};
use crate::core::{AppResult, BatchReport, CancellationToken, ResourceMonitor};
use crate::infra::SystemMonitor;
use crate::pbcor::PbcorBatch;

/// Sentinel meaning "detect automatically" for `ncpu` and `mem`.
pub const AUTO: i64 = -1;

/// One correction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PbcorRequest {
    /// Image directory.
    pub imagedir: PathBuf,
    /// Observation metadata file.
    pub metafits: PathBuf,
    /// Spatially interpolate the beam.
    #[serde(default = "default_interpolate")]
    pub interpolate: bool,
    /// CPU threads to use; `-1` detects from idle cores.
    #[serde(default = "default_auto")]
    pub ncpu: i64,
    /// Memory budget in GiB; `-1` uses available memory.
    #[serde(default = "default_auto_f64")]
    pub mem: f64,
}

const fn default_interpolate() -> bool {
    true
}

const fn default_auto() -> i64 {
    AUTO
}

fn default_auto_f64() -> f64 {
    -1.0
}

impl PbcorRequest {
    /// Request with automatic CPU and memory budgets and interpolation on.
    pub fn new(imagedir: impl Into<PathBuf>, metafits: impl Into<PathBuf>) -> Self {
        Self {
            imagedir: imagedir.into(),
            metafits: metafits.into(),
            interpolate: true,
            ncpu: AUTO,
            mem: default_auto_f64(),
        }
    }

    /// Requested thread budget, `None` for automatic.
    #[must_use]
    pub fn requested_cpu(&self) -> Option<usize> {
        usize::try_from(self.ncpu).ok().filter(|n| *n > 0)
    }

    /// Requested memory budget, `None` for automatic.
    #[must_use]
    pub fn requested_mem_gb(&self) -> Option<f64> {
        (self.mem.is_finite() && self.mem > 0.0).then_some(self.mem)
    }

    /// Validate that both paths were supplied.
    ///
    /// # Errors
    ///
    /// Names the missing input.
    pub fn validate(&self) -> Result<(), String> {
        if self.imagedir.as_os_str().is_empty() {
            return Err("imagedir is required".into());
        }
        if self.metafits.as_os_str().is_empty() {
            return Err("metafits is required".into());
        }
        Ok(())
    }
}

/// Run a request against the local host.
///
/// # Errors
///
/// Invalid input or configuration, or a batch-level failure. Failed jobs
/// are reported in the returned [`BatchReport`].
pub fn run_request(request: &PbcorRequest, cfg: &SchedulerConfig, beam: &BeamConfig) -> AppResult<BatchReport> {
    let monitor = SystemMonitor::new(cfg.cpu_sample_window());
    run_request_with(request, cfg, beam, monitor, &CancellationToken::new())
}

/// Run a request with a caller-supplied monitor and cancellation token.
///
/// # Errors
///
/// See [`run_request`].
pub fn run_request_with<M>(
    request: &PbcorRequest,
    cfg: &SchedulerConfig,
    beam: &BeamConfig,
    monitor: M,
    cancel: &CancellationToken,
) -> AppResult<BatchReport>
where
    M: ResourceMonitor,
{
    if let Err(e) = request.validate() {
        bail!("invalid request: {e}");
    }
    if let Err(e) = beam.validate() {
        bail!("invalid beam configuration: {e}");
    }

    let batch = PbcorBatch::new(&request.imagedir, &request.metafits, request.interpolate, beam.clone());
    let input = batch
        .prepare(request.requested_cpu(), request.requested_mem_gb())
        .with_context(|| format!("preparing batch in {}", request.imagedir.display()))?;
    let mut executor = build_executor(cfg, monitor, batch.imagedir(), batch.artifact_layout())?
        .with_cancellation(cancel.clone());

    let report = executor.run(input).context("batch run failed")?;
    info!(status = ?report.status, produced = report.produced, "{}", summary_line(&report));
    Ok(report)
}

/// Human-readable summary printed at the end of a run.
#[must_use]
pub fn summary_line(report: &BatchReport) -> String {
    format!(
        "Total primary beam corrected images are made: {} and saved in: {}",
        report.produced,
        report.output_dir.display()
    )
}

/// Parse a `True`/`False` style flag value.
///
/// # Errors
///
/// Anything other than true/false, yes/no or 1/0 (case-insensitive).
pub fn parse_bool_flag(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(format!("expected True or False, got `{other}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_budgets() {
        let mut req = PbcorRequest::new("/img", "/m.metafits");
        assert_eq!(req.requested_cpu(), None);
        assert_eq!(req.requested_mem_gb(), None);
        req.ncpu = 8;
        req.mem = 2.5;
        assert_eq!(req.requested_cpu(), Some(8));
        assert_eq!(req.requested_mem_gb(), Some(2.5));
        req.ncpu = 0;
        assert_eq!(req.requested_cpu(), None);
    }

    #[test]
    fn test_request_json_defaults() {
        let req: PbcorRequest = serde_json::from_str(r#"{"imagedir": "/img", "metafits": "/m"}"#).unwrap();
        assert!(req.interpolate);
        assert_eq!(req.ncpu, AUTO);
        assert_eq!(req.requested_mem_gb(), None);
    }

    #[test]
    fn test_validate_requires_paths() {
        assert!(PbcorRequest::new("", "/m").validate().is_err());
        assert!(PbcorRequest::new("/img", "").validate().is_err());
        assert!(PbcorRequest::new("/img", "/m").validate().is_ok());
    }

    #[test]
    fn test_parse_bool_flag() {
        assert_eq!(parse_bool_flag("True"), Ok(true));
        assert_eq!(parse_bool_flag("false"), Ok(false));
        assert!(parse_bool_flag("maybe").is_err());
    }
}
