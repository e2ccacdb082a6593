//! Configuration models for the scheduler and the beam tool.

pub mod app;
pub mod beam;
pub mod scheduler;

pub use app::AppConfig;
pub use beam::BeamConfig;
pub use scheduler::SchedulerConfig;
