//! # pbcor_batch
//!
//! Resource-aware local batch scheduler for primary-beam correction of
//! radio-astronomy images.
//!
//! A batch is a list of per-image correction commands. Several images share
//! one coarse frequency channel, and every image of a channel can reuse the
//! same expensive beam-response artifact. The scheduler:
//!
//! - **Plans capacity** from CPU cores, available memory and the input size
//!   ([`core::CapacityPlanner`]).
//! - **Deduplicates work** so exactly one job per channel computes the beam
//!   artifact and the rest reuse it ([`core::WorkDeduplicator`]).
//! - **Launches jobs** as tracked OS processes with logs, pid records and
//!   completion markers ([`core::ShellLauncher`]).
//! - **Waits for resources** before releasing another slot
//!   ([`core::CompletionTracker`]).
//!
//! ```rust,ignore
//! use pbcor_batch::config::{BeamConfig, SchedulerConfig};
//! use pbcor_batch::runtime::{run_request, PbcorRequest};
//!
//! let request = PbcorRequest::new("/data/images", "/data/obs.metafits");
//! let report = run_request(&request, &SchedulerConfig::default(), &BeamConfig::default())?;
//! println!("{}", report.produced);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions and capacity accounting.
pub mod core;
/// Configuration models for the scheduler and the beam tool.
pub mod config;
/// Builders to construct executors from configuration.
pub mod builders;
/// Infrastructure adapters for host resource monitoring.
pub mod infra;
/// Primary-beam correction batch: image discovery and job construction.
pub mod pbcor;
/// Request surface and async adapter.
pub mod runtime;
/// Shared utilities.
pub mod util;
