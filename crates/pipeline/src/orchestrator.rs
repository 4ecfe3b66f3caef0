use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use lifecycle_core::activity::{make_activity, ActivitySink};
use lifecycle_core::config::ScoringConfig;
use lifecycle_core::events::event_types;
use lifecycle_core::store::SnapshotStore;
use lifecycle_core::types::{ProposedUpdate, UsageEvent};
use lifecycle_flows::{FlowEngine, TriggerContext};
use lifecycle_scoring::{
    classify_lifecycle, detect_expansion, expansion_score, score_churn,
};
use lifecycle_segmentation::{evaluate, SegmentStore};
use lifecycle_webhooks::WebhookDispatcher;

use crate::result::PipelineResult;

/// Snapshot property holding the last published churn score, used to gate
/// risk-changed notifications on a significant delta.
const CHURN_SCORE_PROPERTY: &str = "churn_risk_score";

/// The per-batch orchestrator. Events are processed sequentially so each
/// result is self-contained; a failure in one event never aborts the batch.
pub struct EventPipeline {
    snapshots: Arc<dyn SnapshotStore>,
    segments: Arc<dyn SegmentStore>,
    flow_engine: Arc<FlowEngine>,
    dispatcher: Arc<WebhookDispatcher>,
    activity: Arc<dyn ActivitySink>,
    scoring: ScoringConfig,
}

impl EventPipeline {
    pub fn new(
        snapshots: Arc<dyn SnapshotStore>,
        segments: Arc<dyn SegmentStore>,
        flow_engine: Arc<FlowEngine>,
        dispatcher: Arc<WebhookDispatcher>,
        activity: Arc<dyn ActivitySink>,
        scoring: ScoringConfig,
    ) -> Self {
        Self {
            snapshots,
            segments,
            flow_engine,
            dispatcher,
            activity,
            scoring,
        }
    }

    /// Processes a batch, returning one result per input event in order.
    pub fn process_batch(&self, events: &[UsageEvent]) -> Vec<PipelineResult> {
        info!(batch_size = events.len(), "Processing event batch");
        metrics::counter!("pipeline.events").increment(events.len() as u64);
        events.iter().map(|event| self.process_event(event)).collect()
    }

    fn process_event(&self, event: &UsageEvent) -> PipelineResult {
        let mut result = PipelineResult::new(event);

        // Redelivered messages are acknowledged without side effects.
        if !self.snapshots.mark_seen(&event.message_id) {
            debug!(message_id = %event.message_id, "Duplicate event, skipping");
            result.duplicate = true;
            return result;
        }

        let Some(mut snapshot) = self.snapshots.get(&event.entity_id) else {
            result.push_error("input", format!("unknown entity {}", event.entity_id));
            return result;
        };

        // --- Lifecycle reclassification -------------------------------
        let previous_state = snapshot.lifecycle_state;
        let classification = classify_lifecycle(&snapshot);
        let transitioned = classification.state != previous_state;
        result.lifecycle.transitioned = transitioned;
        result.lifecycle.to_state = Some(classification.state);
        if transitioned {
            result.lifecycle.from_state = Some(previous_state);
            if let Err(e) = self.snapshots.apply(&ProposedUpdate::SetLifecycleState {
                entity_id: event.entity_id.clone(),
                state: classification.state,
            }) {
                result.push_error(e.kind(), e.to_string());
                return result;
            }
            snapshot.lifecycle_state = classification.state;
            self.activity.append(make_activity(
                &event.entity_id,
                "lifecycle",
                format!(
                    "{} -> {}",
                    previous_state.display_name(),
                    classification.state.display_name()
                ),
            ));
            self.emit(
                &mut result,
                event_types::LIFECYCLE_CHANGED,
                serde_json::json!({
                    "entity_id": event.entity_id,
                    "from_state": previous_state,
                    "to_state": classification.state,
                    "confidence": classification.confidence,
                    "signals": classification.signals,
                }),
            );
        }

        // --- Churn / expansion rescoring ------------------------------
        let churn = score_churn(&snapshot);
        result.churn.score = churn.risk_score;
        result.churn.tier = Some(churn.risk_tier);

        let account_snapshot = snapshot
            .account_id
            .as_deref()
            .and_then(|id| self.snapshots.get(id));
        let signals = detect_expansion(&snapshot, account_snapshot.as_ref());
        result.expansion.score = expansion_score(&signals);
        result.expansion.signals_count = signals.len() as u32;

        let previous_score = snapshot
            .properties
            .get(CHURN_SCORE_PROPERTY)
            .and_then(|v| v.as_u64())
            .map(|v| v.min(100) as u8);
        let significant = match previous_score {
            Some(previous) => {
                churn.risk_score.abs_diff(previous) >= self.scoring.significant_risk_delta
            }
            // First score on record is always worth publishing.
            None => true,
        };
        if significant {
            if let Err(e) = self.snapshots.apply(&ProposedUpdate::SetProperty {
                entity_id: event.entity_id.clone(),
                key: CHURN_SCORE_PROPERTY.to_string(),
                value: serde_json::json!(churn.risk_score),
            }) {
                result.push_error(e.kind(), e.to_string());
                return result;
            }
            self.emit(
                &mut result,
                event_types::RISK_CHANGED,
                serde_json::json!({
                    "entity_id": event.entity_id,
                    "score": churn.risk_score,
                    "previous_score": previous_score,
                    "tier": churn.risk_tier,
                    "estimated_mrr_at_risk": churn.estimated_mrr_at_risk,
                }),
            );
        }

        // --- Segment re-evaluation ------------------------------------
        let mut entered_segments: Vec<Uuid> = Vec::new();
        let all_snapshots = self.snapshots.list();
        for segment in self.segments.list() {
            let evaluation = evaluate(
                &segment.filters,
                segment.logic,
                &all_snapshots,
                &segment.member_ids,
            );
            let matched: HashSet<String> = evaluation.matched.iter().cloned().collect();
            if let Err(e) = self.segments.replace_membership(&segment.id, matched) {
                result.push_error(e.kind(), e.to_string());
                return result;
            }

            if evaluation.entered.iter().any(|id| id == &event.entity_id) {
                entered_segments.push(segment.id);
                result.segments.entered.push(segment.name.clone());
                self.activity.append(make_activity(
                    &event.entity_id,
                    "segments",
                    format!("entered segment '{}'", segment.name),
                ));
                self.emit(
                    &mut result,
                    event_types::SEGMENT_ENTERED,
                    serde_json::json!({
                        "entity_id": event.entity_id,
                        "segment_id": segment.id,
                        "segment_name": segment.name,
                    }),
                );
            }
            if evaluation.exited.iter().any(|id| id == &event.entity_id) {
                result.segments.exited.push(segment.name.clone());
                self.activity.append(make_activity(
                    &event.entity_id,
                    "segments",
                    format!("exited segment '{}'", segment.name),
                ));
                self.emit(
                    &mut result,
                    event_types::SEGMENT_EXITED,
                    serde_json::json!({
                        "entity_id": event.entity_id,
                        "segment_id": segment.id,
                        "segment_name": segment.name,
                    }),
                );
            }
        }

        // --- Flow trigger evaluation ----------------------------------
        let ctx = TriggerContext {
            entity_id: event.entity_id.clone(),
            event_name: Some(event.event_name.clone()),
            transitioned,
            from_state: transitioned.then_some(previous_state),
            to_state: classification.state,
            entered_segments,
        };
        let flow_outcome = self.flow_engine.handle_trigger_event(&ctx, Utc::now());
        result.flows.enrollments_created = flow_outcome.enrollments_created;
        result.flows.enrollments_advanced = flow_outcome.enrollments_advanced;

        // --- Activity log ---------------------------------------------
        self.activity.append(make_activity(
            &event.entity_id,
            "pipeline",
            format!("processed event '{}'", event.event_name),
        ));

        result
    }

    /// Webhook emission is fire-and-forget: the dispatcher owns retries and
    /// its own timers, and can never fail the pipeline.
    fn emit(&self, result: &mut PipelineResult, event_type: &str, payload: serde_json::Value) {
        let enqueued = self.dispatcher.dispatch(event_type, payload);
        if enqueued == 0 {
            debug!(event_type, "No active subscription for event");
        }
        result.webhooks.events_dispatched += 1;
    }
}
