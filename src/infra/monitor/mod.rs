//! Resource monitor backends.

pub mod fixed;
pub mod system;

pub use fixed::FixedMonitor;
pub use system::SystemMonitor;
