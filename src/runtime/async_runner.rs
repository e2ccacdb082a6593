//! Run a batch from async code without blocking the runtime.

use anyhow::Context;

use crate::config::{BeamConfig, SchedulerConfig};
use crate::core::{AppResult, BatchReport, CancellationToken};
use crate::infra::SystemMonitor;
use crate::runtime::api::{run_request_with, PbcorRequest};

/// Run `request` on tokio's blocking pool.
///
/// Cancelling `cancel` stops the scheduler from launching or waiting for
/// further jobs; processes already running are left alone.
///
/// # Errors
///
/// Same as [`run_request_with`], plus a join failure of the blocking task.
pub async fn run_request_async(
    request: PbcorRequest,
    cfg: SchedulerConfig,
    beam: BeamConfig,
    cancel: CancellationToken,
) -> AppResult<BatchReport> {
    tokio::task::spawn_blocking(move || {
        let monitor = SystemMonitor::new(cfg.cpu_sample_window());
        run_request_with(&request, &cfg, &beam, monitor, &cancel)
    })
    .await
    .context("batch task panicked")?
}
