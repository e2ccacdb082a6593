//! Request surface and async adapter.

pub mod api;
#[cfg(feature = "tokio-runtime")]
pub mod async_runner;

pub use api::{parse_bool_flag, run_request, run_request_with, summary_line, PbcorRequest};
#[cfg(feature = "tokio-runtime")]
pub use async_runner::run_request_async;
