//! Core scheduling abstractions: capacity planning, deduplication, launch
//! and completion tracking.

pub mod cancel;
pub mod dedup;
pub mod error;
pub mod executor;
pub mod job;
pub mod launcher;
pub mod markers;
pub mod monitor;
pub mod planner;
pub mod registry;
pub mod tracker;

pub use cancel::CancellationToken;
pub use dedup::{ArtifactLayout, Partition, SkipReason, SkippedItem, WorkDeduplicator};
pub use error::{AppResult, SchedulerError};
pub use executor::{
    BatchHandle, BatchInput, BatchReport, BatchStatus, FailedJob, OutputCollector, ParallelExecutor,
};
pub use job::{CommandTemplate, DedupKey, Job, JobId, JobOutcome, JobRole, JobState, WorkItem};
pub use launcher::{
    completion_channel, CompletionReceiver, CompletionSender, CompletionSource, JobCompletion,
    JobLauncher, LaunchMode, RunningHandle, ShellLauncher,
};
pub use markers::{JobFiles, MarkerState};
pub use monitor::{has_capacity, ResourceMonitor, ResourceSnapshot, Thresholds};
pub use planner::{CapacityPlan, CapacityPlanner};
pub use registry::{JobRegistry, RegistryStats};
pub use tracker::{CompletionTracker, SlotRelease, TrackerSettings};
