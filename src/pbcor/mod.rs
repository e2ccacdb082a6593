//! Primary-beam correction batch: image discovery and job construction.

pub mod batch;
pub mod images;

pub use batch::{PbcorBatch, ARTIFACT_DIR, OUTPUT_DIR, OUTPUT_SUFFIX};
pub use images::{coarse_channel_for_freq, coarse_channel_from_name, discover_images};
