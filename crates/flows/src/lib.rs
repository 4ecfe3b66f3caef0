//! Flow execution — a graph-defined automation interpreter that advances
//! entity enrollments node by node until a delay, exit, or error, plus the
//! time-driven scheduler that resumes waiting enrollments.

pub mod engine;
pub mod scheduler;
pub mod store;
pub mod triggers;
pub mod types;

pub use engine::{FlowEngine, TriggerOutcome};
pub use scheduler::{Scheduler, SchedulerRun, SchedulerStats};
pub use store::{FlowStore, MemoryFlowStore};
pub use triggers::{trigger_matches, TriggerContext};
pub use types::{
    AdvanceOutcome, AdvanceReport, Enrollment, EnrollmentStatus, FlowDefinition, FlowStatus,
    NodeKind, TriggerConfig,
};
