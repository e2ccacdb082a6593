//! Infrastructure adapters for host resource monitoring.

pub mod monitor;

pub use monitor::{FixedMonitor, SystemMonitor};
