//! Event pipeline — the per-batch integration point that sequences scoring,
//! segmentation, flow triggering, webhook notification, and activity
//! logging, producing one self-contained result per ingested event.

pub mod orchestrator;
pub mod result;

pub use orchestrator::EventPipeline;
pub use result::{PipelineResult, StageError};
