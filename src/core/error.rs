//! Error types for scheduler operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::DedupKey;

/// Errors produced by scheduler components.
///
/// A job that exits non-zero is not an error here: it is recorded as a
/// failed outcome and reported at drain time.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Required inputs or configuration values are missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The launcher could not start a job.
    #[error("failed to launch job {job}: {source}")]
    Launch {
        /// Job name.
        job: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A Secondary job's shared artifact was never produced.
    #[error("artifact missing for key {key}: {}", path.display())]
    ArtifactMissing {
        /// Dedup key whose Primary failed.
        key: DedupKey,
        /// Expected artifact location.
        path: PathBuf,
    },
    /// No slot freed within the configured timeout.
    #[error("timed out after {0:?} waiting for a free slot")]
    Timeout(Duration),
    /// The batch was cancelled through its cancellation token.
    #[error("batch cancelled")]
    Cancelled,
    /// Filesystem failure outside a single job's scope.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
