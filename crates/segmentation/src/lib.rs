//! Dynamic audience segmentation — a boolean filter grammar over entity
//! snapshots plus a batch evaluator that reports membership deltas.

pub mod evaluator;
pub mod filters;
pub mod segments;

pub use evaluator::{evaluate, SegmentEvaluation};
pub use filters::{rule_matches, FilterOperator, FilterRule, SegmentLogic};
pub use segments::{MemorySegmentStore, Segment, SegmentStore};
