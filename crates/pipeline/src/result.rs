//! The stable per-event result shape returned to ingestion callers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lifecycle_core::types::{LifecycleState, UsageEvent};
use lifecycle_scoring::RiskTier;

/// One processed event's outcome across every pipeline stage. The field set
/// is a stable wire contract; aborted stages leave their section at its
/// default and record an entry in `errors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub message_id: Uuid,
    pub entity_id: String,
    /// Event was already processed under this message id; no side effects.
    pub duplicate: bool,
    pub lifecycle: LifecycleOutcome,
    pub churn: ChurnOutcome,
    pub expansion: ExpansionOutcome,
    pub segments: SegmentsOutcome,
    pub flows: FlowsOutcome,
    pub webhooks: WebhooksOutcome,
    pub errors: Vec<StageError>,
}

impl PipelineResult {
    pub fn new(event: &UsageEvent) -> Self {
        Self {
            message_id: event.message_id,
            entity_id: event.entity_id.clone(),
            duplicate: false,
            lifecycle: LifecycleOutcome::default(),
            churn: ChurnOutcome::default(),
            expansion: ExpansionOutcome::default(),
            segments: SegmentsOutcome::default(),
            flows: FlowsOutcome::default(),
            webhooks: WebhooksOutcome::default(),
            errors: Vec::new(),
        }
    }

    pub fn push_error(&mut self, stage: &str, message: impl Into<String>) {
        self.errors.push(StageError {
            stage: stage.to_string(),
            message: message.into(),
        });
    }

    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleOutcome {
    pub transitioned: bool,
    pub from_state: Option<LifecycleState>,
    pub to_state: Option<LifecycleState>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChurnOutcome {
    pub score: u8,
    pub tier: Option<RiskTier>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpansionOutcome {
    pub score: u8,
    pub signals_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentsOutcome {
    pub entered: Vec<String>,
    pub exited: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowsOutcome {
    pub enrollments_created: u32,
    pub enrollments_advanced: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhooksOutcome {
    pub events_dispatched: u32,
}

/// Error taxonomy surface: the stage label tells callers whether a human
/// needs to fix configuration or the noise is transient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageError {
    pub stage: String,
    pub message: String,
}
