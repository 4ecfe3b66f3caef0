use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use lifecycle_core::activity::{make_activity, noop_activity, ActivitySink};
use lifecycle_core::config::FlowsConfig;
use lifecycle_core::events::{noop_events, EventSink};
use lifecycle_core::store::SnapshotStore;
use lifecycle_core::transport::{NotificationTransport, OutboundMessage, SendReceipt};
use lifecycle_core::types::{EntitySnapshot, ProposedUpdate};
use lifecycle_segmentation::{rule_matches, SegmentLogic};

use crate::store::FlowStore;
use crate::triggers::{trigger_matches, TriggerContext};
use crate::types::{
    ActionConfig, AdvanceOutcome, AdvanceReport, ConditionConfig, Enrollment, EnrollmentStatus,
    ExecutionLogEntry, FlowDefinition, FlowStatus, NodeKind,
};

/// Counts returned from evaluating one trigger context against all active
/// flows.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerOutcome {
    pub enrollments_created: u32,
    pub enrollments_advanced: u32,
    pub actions_executed: u32,
}

/// The workflow interpreter — enrolls entities on trigger matches and
/// advances enrollments to their next blocking point.
pub struct FlowEngine {
    store: Arc<dyn FlowStore>,
    snapshots: Arc<dyn SnapshotStore>,
    transport: Option<Arc<dyn NotificationTransport>>,
    events: Arc<dyn EventSink>,
    activity: Arc<dyn ActivitySink>,
    config: FlowsConfig,
}

impl FlowEngine {
    pub fn new(
        store: Arc<dyn FlowStore>,
        snapshots: Arc<dyn SnapshotStore>,
        config: FlowsConfig,
    ) -> Self {
        Self {
            store,
            snapshots,
            transport: None,
            events: noop_events(),
            activity: noop_activity(),
            config,
        }
    }

    /// Attach the channel used by send-message action nodes.
    pub fn with_transport(mut self, transport: Arc<dyn NotificationTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Attach a sink for webhook-bound events emitted by action nodes.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_activity(mut self, activity: Arc<dyn ActivitySink>) -> Self {
        self.activity = activity;
        self
    }

    pub fn store(&self) -> &Arc<dyn FlowStore> {
        &self.store
    }

    /// Evaluates every active flow's trigger nodes against the context and
    /// creates enrollments for the matches. A fresh enrollment is advanced
    /// immediately so first-touch actions fire within the pipeline, without
    /// waiting for a scheduler tick.
    pub fn handle_trigger_event(
        &self,
        ctx: &TriggerContext,
        now: DateTime<Utc>,
    ) -> TriggerOutcome {
        let mut outcome = TriggerOutcome::default();
        let Some(snapshot) = self.snapshots.get(&ctx.entity_id) else {
            debug!(entity_id = %ctx.entity_id, "No snapshot for trigger evaluation");
            return outcome;
        };

        for flow in self.store.active_flows() {
            let matched_node = flow
                .trigger_nodes()
                .find(|(_, config)| trigger_matches(config, ctx))
                .map(|(node, _)| node.id);
            let Some(trigger_node_id) = matched_node else {
                continue;
            };

            let Some(mut enrollment) = self.try_enroll(&flow, trigger_node_id, ctx, now) else {
                continue;
            };
            outcome.enrollments_created += 1;

            let report = self.advance_one(&mut enrollment, &flow, &snapshot, now);
            outcome.enrollments_advanced += 1;
            outcome.actions_executed += report.actions_executed;
            if let Err(e) = self.store.save_enrollment(enrollment) {
                warn!(flow_id = %flow.id, error = %e, "Enrollment write failed");
            }
        }
        outcome
    }

    /// Creates an enrollment if every guard passes: active flow, enrollment
    /// and concurrency caps, single-active-enrollment rule, and the re-entry
    /// cooldown. Returns `None` when a guard rejects; that is a skip, not
    /// an error.
    pub fn try_enroll(
        &self,
        flow: &FlowDefinition,
        trigger_node_id: Uuid,
        ctx: &TriggerContext,
        now: DateTime<Utc>,
    ) -> Option<Enrollment> {
        if flow.status != FlowStatus::Active {
            return None;
        }

        if self
            .store
            .active_enrollment(&flow.id, &ctx.entity_id)
            .is_some()
        {
            debug!(flow_id = %flow.id, entity_id = %ctx.entity_id, "Already enrolled");
            return None;
        }

        if let Some(previous) = self
            .store
            .latest_terminal_enrollment(&flow.id, &ctx.entity_id)
        {
            if !flow.settings.allow_re_entry {
                debug!(flow_id = %flow.id, entity_id = %ctx.entity_id, "Re-entry not allowed");
                return None;
            }
            let cooldown = Duration::hours(flow.settings.re_entry_cooldown_hours as i64);
            if previous.updated_at + cooldown > now {
                debug!(flow_id = %flow.id, entity_id = %ctx.entity_id, "Re-entry cooldown active");
                return None;
            }
        }

        let counts = self.store.enrollment_counts(&flow.id);
        if let Some(cap) = flow.settings.enrollment_cap {
            if counts.total >= cap {
                debug!(flow_id = %flow.id, "Enrollment cap reached");
                return None;
            }
        }
        if let Some(max) = flow.settings.max_concurrent_enrollments {
            if counts.active >= max {
                debug!(flow_id = %flow.id, "Concurrency cap reached");
                return None;
            }
        }

        let enrollment = Enrollment::new(flow.id, ctx.entity_id.clone(), trigger_node_id);
        info!(
            enrollment_id = %enrollment.id,
            flow_id = %flow.id,
            entity_id = %ctx.entity_id,
            "Entity enrolled in flow"
        );
        metrics::counter!("flows.enrollments_created").increment(1);
        self.activity.append(make_activity(
            &ctx.entity_id,
            "flows",
            format!("enrolled in flow '{}'", flow.name),
        ));
        self.store.insert_enrollment(enrollment.clone());
        Some(enrollment)
    }

    /// Advances one enrollment to its next blocking point: a delay node, a
    /// terminal exit, or an error. Node traversal is bounded so a cyclic
    /// graph authored without a delay node terminates in an error outcome
    /// rather than looping forever.
    pub fn advance_one(
        &self,
        enrollment: &mut Enrollment,
        flow: &FlowDefinition,
        snapshot: &EntitySnapshot,
        now: DateTime<Utc>,
    ) -> AdvanceReport {
        let ceiling = self.config.max_nodes_per_advance.max(1);
        let mut traversed = 0u32;
        let mut actions = 0u32;

        loop {
            if traversed >= ceiling {
                let message =
                    format!("traversal ceiling of {ceiling} nodes exceeded; graph may be cyclic");
                return self.fail(enrollment, flow, message, traversed, actions, now);
            }

            let Some(node) = flow.node(&enrollment.current_node_id).cloned() else {
                let message = format!(
                    "node {} is not part of flow graph",
                    enrollment.current_node_id
                );
                return self.fail(enrollment, flow, message, traversed, actions, now);
            };
            traversed += 1;

            match &node.kind {
                NodeKind::Trigger(_) => {
                    self.log_node(enrollment, node.id, "trigger", "entry matched", now);
                    let Some(edge) = flow.default_edge(&node.id) else {
                        let message = "trigger node has no outgoing edge".to_string();
                        return self.fail(enrollment, flow, message, traversed, actions, now);
                    };
                    enrollment.current_node_id = edge.to;
                }
                NodeKind::Condition(config) => {
                    let label = if condition_holds(config, snapshot) {
                        "true"
                    } else {
                        "false"
                    };
                    self.log_node(
                        enrollment,
                        node.id,
                        "condition",
                        format!("evaluated to {label}"),
                        now,
                    );
                    let Some(edge) = flow.labeled_edge(&node.id, label) else {
                        let message = format!("condition node has no '{label}' edge");
                        return self.fail(enrollment, flow, message, traversed, actions, now);
                    };
                    enrollment.current_node_id = edge.to;
                }
                NodeKind::Delay(config) => {
                    let Some(edge) = flow.default_edge(&node.id) else {
                        let message = "delay node has no outgoing edge".to_string();
                        return self.fail(enrollment, flow, message, traversed, actions, now);
                    };
                    let until = now + Duration::seconds(config.duration_secs as i64);
                    self.log_node(
                        enrollment,
                        node.id,
                        "delay",
                        format!("waiting until {until}"),
                        now,
                    );
                    enrollment.current_node_id = edge.to;
                    enrollment.next_process_at = Some(until);
                    enrollment.updated_at = now;
                    return AdvanceReport {
                        outcome: AdvanceOutcome::Waiting { until },
                        nodes_traversed: traversed,
                        actions_executed: actions,
                    };
                }
                NodeKind::Action(config) => {
                    self.execute_action(enrollment, flow, &node.id, config, now);
                    actions += 1;
                    match flow.default_edge(&node.id) {
                        Some(edge) => enrollment.current_node_id = edge.to,
                        // A dangling action ends the flow gracefully.
                        None => {
                            return self.finish(
                                enrollment, flow, None, traversed, actions, now,
                            );
                        }
                    }
                }
                NodeKind::Exit(config) => {
                    self.log_node(
                        enrollment,
                        node.id,
                        "exit",
                        config.reason.clone().unwrap_or_else(|| "completed".into()),
                        now,
                    );
                    return self.finish(
                        enrollment,
                        flow,
                        config.reason.clone(),
                        traversed,
                        actions,
                        now,
                    );
                }
            }
        }
    }

    fn execute_action(
        &self,
        enrollment: &mut Enrollment,
        flow: &FlowDefinition,
        node_id: &Uuid,
        config: &ActionConfig,
        now: DateTime<Utc>,
    ) {
        let result = match config {
            ActionConfig::SendMessage { channel, template } => {
                let receipt = match &self.transport {
                    Some(transport) => transport.send(&OutboundMessage {
                        entity_id: enrollment.entity_id.clone(),
                        channel: *channel,
                        template: template.clone(),
                        context: serde_json::json!({
                            "flow_id": flow.id,
                            "enrollment_id": enrollment.id,
                        }),
                    }),
                    None => SendReceipt::failed("no notification transport configured"),
                };
                if receipt.success {
                    Ok(format!("sent '{template}' via {channel:?}"))
                } else {
                    Err(receipt
                        .error
                        .unwrap_or_else(|| "send failed without detail".into()))
                }
            }
            ActionConfig::SetProperty { key, value } => self
                .snapshots
                .apply(&ProposedUpdate::SetProperty {
                    entity_id: enrollment.entity_id.clone(),
                    key: key.clone(),
                    value: value.clone(),
                })
                .map(|()| format!("set property '{key}'"))
                .map_err(|e| e.to_string()),
            ActionConfig::EmitEvent { event_type } => {
                self.events.emit(
                    event_type,
                    serde_json::json!({
                        "entity_id": enrollment.entity_id,
                        "flow_id": flow.id,
                        "enrollment_id": enrollment.id,
                    }),
                );
                Ok(format!("emitted event '{event_type}'"))
            }
        };

        // A failed side-channel action must not block lifecycle progression:
        // count it, log it, and continue along the default edge.
        match result {
            Ok(detail) => self.log_node(enrollment, *node_id, "action", detail, now),
            Err(error) => {
                enrollment.error_count += 1;
                metrics::counter!("flows.action_failures").increment(1);
                warn!(
                    enrollment_id = %enrollment.id,
                    flow_id = %flow.id,
                    error = %error,
                    "Action node failed, continuing"
                );
                self.log_node(
                    enrollment,
                    *node_id,
                    "action",
                    format!("failed: {error}"),
                    now,
                );
            }
        }
    }

    fn finish(
        &self,
        enrollment: &mut Enrollment,
        flow: &FlowDefinition,
        reason: Option<String>,
        traversed: u32,
        actions: u32,
        now: DateTime<Utc>,
    ) -> AdvanceReport {
        enrollment.next_process_at = None;
        enrollment.updated_at = now;
        let outcome = match reason {
            None => {
                enrollment.status = EnrollmentStatus::Completed;
                AdvanceOutcome::Completed
            }
            Some(reason) => {
                enrollment.status = EnrollmentStatus::Exited;
                enrollment.exit_reason = Some(reason.clone());
                AdvanceOutcome::Exited { reason }
            }
        };
        info!(
            enrollment_id = %enrollment.id,
            flow_id = %flow.id,
            status = ?enrollment.status,
            "Enrollment reached terminal node"
        );
        metrics::counter!("flows.enrollments_finished").increment(1);
        self.events.emit(
            lifecycle_core::events::event_types::ENROLLMENT_COMPLETED,
            serde_json::json!({
                "entity_id": enrollment.entity_id,
                "flow_id": flow.id,
                "enrollment_id": enrollment.id,
                "status": enrollment.status,
            }),
        );
        self.activity.append(make_activity(
            &enrollment.entity_id,
            "flows",
            format!("finished flow '{}'", flow.name),
        ));
        AdvanceReport {
            outcome,
            nodes_traversed: traversed,
            actions_executed: actions,
        }
    }

    /// Configuration errors are terminal for the enrollment and never
    /// retried in the same pass; retrying a broken graph cannot succeed.
    fn fail(
        &self,
        enrollment: &mut Enrollment,
        flow: &FlowDefinition,
        message: String,
        traversed: u32,
        actions: u32,
        now: DateTime<Utc>,
    ) -> AdvanceReport {
        warn!(
            enrollment_id = %enrollment.id,
            flow_id = %flow.id,
            error = %message,
            "Enrollment errored"
        );
        metrics::counter!("flows.enrollments_errored").increment(1);
        enrollment.status = EnrollmentStatus::Errored;
        enrollment.error = Some(message.clone());
        enrollment.error_count += 1;
        enrollment.next_process_at = None;
        enrollment.updated_at = now;
        AdvanceReport {
            outcome: AdvanceOutcome::Errored { message },
            nodes_traversed: traversed,
            actions_executed: actions,
        }
    }

    fn log_node(
        &self,
        enrollment: &mut Enrollment,
        node_id: Uuid,
        node_kind: &str,
        detail: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        enrollment.execution_log.push(ExecutionLogEntry {
            node_id,
            node_kind: node_kind.to_string(),
            detail: detail.into(),
            at: now,
        });
    }
}

fn condition_holds(config: &ConditionConfig, snapshot: &EntitySnapshot) -> bool {
    match config.logic {
        SegmentLogic::All => config.filters.iter().all(|r| rule_matches(r, snapshot)),
        SegmentLogic::Any => config.filters.iter().any(|r| rule_matches(r, snapshot)),
    }
}
