//! End-to-end scenario: an inactivity event drives a lifecycle transition,
//! a winback flow enrollment with a synchronous first touch, webhook
//! notifications, and a later scheduler tick that completes the flow.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use lifecycle_core::activity::capture_activity;
use lifecycle_core::config::EngineConfig;
use lifecycle_core::store::{MemorySnapshotStore, SnapshotStore};
use lifecycle_core::transport::{memory_transport, MessageChannel};
use lifecycle_core::types::{EntitySnapshot, LifecycleState, PlanTier, UsageEvent};
use lifecycle_flows::types::{
    ActionConfig, DelayConfig, ExitConfig, FlowDefinition, FlowEdge, FlowNode, FlowSettings,
    NodeKind, TriggerConfig,
};
use lifecycle_flows::{
    FlowEngine, FlowStatus, FlowStore, MemoryFlowStore, Scheduler, SchedulerStats,
};
use lifecycle_pipeline::EventPipeline;
use lifecycle_segmentation::{
    FilterOperator, FilterRule, MemorySegmentStore, Segment, SegmentLogic, SegmentStore,
};
use lifecycle_webhooks::{
    MemoryWebhookStore, ScriptedTransport, WebhookDispatcher, WebhookStore, WebhookSubscription,
};

fn at_risk_snapshot(entity_id: &str) -> EntitySnapshot {
    EntitySnapshot {
        entity_id: entity_id.to_string(),
        account_id: None,
        lifecycle_state: LifecycleState::Activated,
        last_login_days_ago: Some(16),
        login_frequency_last_7_days: 0,
        feature_usage_last_30_days: vec!["reports".into()],
        session_depth: 1.0,
        mrr: 149.0,
        plan_tier: PlanTier::Growth,
        seats_used: 3,
        seat_limit: 10,
        properties: HashMap::new(),
        updated_at: Utc::now(),
    }
}

/// trigger(at_risk) -> email -> delay 1h -> email -> exit
fn winback_flow() -> FlowDefinition {
    let trigger = FlowNode {
        id: Uuid::new_v4(),
        kind: NodeKind::Trigger(TriggerConfig::LifecycleChange {
            to_state: Some(LifecycleState::AtRisk),
        }),
    };
    let first_touch = FlowNode {
        id: Uuid::new_v4(),
        kind: NodeKind::Action(ActionConfig::SendMessage {
            channel: MessageChannel::Email,
            template: "winback_day_0".into(),
        }),
    };
    let delay = FlowNode {
        id: Uuid::new_v4(),
        kind: NodeKind::Delay(DelayConfig {
            duration_secs: 3600,
        }),
    };
    let follow_up = FlowNode {
        id: Uuid::new_v4(),
        kind: NodeKind::Action(ActionConfig::SendMessage {
            channel: MessageChannel::Email,
            template: "winback_day_1".into(),
        }),
    };
    let exit = FlowNode {
        id: Uuid::new_v4(),
        kind: NodeKind::Exit(ExitConfig { reason: None }),
    };
    let now = Utc::now();
    let edges = vec![
        FlowEdge {
            from: trigger.id,
            to: first_touch.id,
            label: None,
        },
        FlowEdge {
            from: first_touch.id,
            to: delay.id,
            label: None,
        },
        FlowEdge {
            from: delay.id,
            to: follow_up.id,
            label: None,
        },
        FlowEdge {
            from: follow_up.id,
            to: exit.id,
            label: None,
        },
    ];
    FlowDefinition {
        id: Uuid::new_v4(),
        name: "At-Risk Winback".into(),
        description: "Two-touch winback sequence for newly at-risk accounts".into(),
        status: FlowStatus::Active,
        version: 1,
        nodes: vec![trigger, first_touch, delay, follow_up, exit],
        edges,
        settings: FlowSettings::default(),
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn test_full_pipeline_and_scheduler_cycle() {
    let config = EngineConfig::default();

    let snapshots = Arc::new(MemorySnapshotStore::new());
    let segments = Arc::new(MemorySegmentStore::new());
    let flow_store = Arc::new(MemoryFlowStore::new());
    let webhook_store = Arc::new(MemoryWebhookStore::new());
    let activity = capture_activity();
    let channel = memory_transport();

    snapshots.put(at_risk_snapshot("acct-42"));
    segments.upsert(Segment::new(
        "at-risk-paying",
        vec![
            FilterRule {
                field: "lifecycle_state".into(),
                operator: FilterOperator::Equals,
                value: serde_json::json!("at_risk"),
            },
            FilterRule {
                field: "mrr".into(),
                operator: FilterOperator::GreaterThan,
                value: serde_json::json!(100),
            },
        ],
        SegmentLogic::All,
    ));
    let flow = winback_flow();
    flow_store.upsert_flow(flow.clone());

    let subscription = WebhookSubscription::new("https://hooks.example.com/crm", vec!["*".into()]);
    let sub_id = subscription.id;
    webhook_store.upsert(subscription);

    let dispatcher = WebhookDispatcher::new(
        webhook_store.clone(),
        Arc::new(ScriptedTransport::new()),
        &config.webhooks,
    );
    let flow_engine = Arc::new(
        FlowEngine::new(flow_store.clone(), snapshots.clone(), config.flows.clone())
            .with_transport(channel.clone())
            .with_events(dispatcher.clone())
            .with_activity(activity.clone()),
    );
    let pipeline = EventPipeline::new(
        snapshots.clone(),
        segments.clone(),
        flow_engine.clone(),
        dispatcher,
        activity.clone(),
        config.scoring.clone(),
    );

    // --- Ingest: one event drives the whole pipeline ------------------
    let event = UsageEvent {
        message_id: Uuid::new_v4(),
        entity_id: "acct-42".into(),
        event_name: "session_closed".into(),
        properties: HashMap::new(),
        occurred_at: Utc::now(),
    };
    let results = pipeline.process_batch(&[event]);
    assert_eq!(results.len(), 1);
    let result = &results[0];

    assert!(result.ok(), "pipeline errors: {:?}", result.errors);
    assert!(result.lifecycle.transitioned);
    assert_eq!(result.lifecycle.to_state, Some(LifecycleState::AtRisk));
    assert!(result.churn.score >= 30, "score {}", result.churn.score);
    assert_eq!(result.segments.entered, vec!["at-risk-paying"]);
    assert_eq!(result.flows.enrollments_created, 1);
    // lifecycle.changed + risk baseline + segment.entered all dispatched.
    assert!(result.webhooks.events_dispatched >= 3);

    // First-touch email went out synchronously during the batch.
    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template, "winback_day_0");

    // --- Tick before the delay elapses: nothing due -------------------
    let scheduler = Scheduler::new(
        flow_engine,
        flow_store.clone(),
        snapshots.clone(),
        &config.scheduler,
    );
    let mut stats = SchedulerStats::default();
    let early = scheduler.process_due(Utc::now(), &mut stats);
    assert_eq!(early.processed, 0);

    // --- Tick after the delay: follow-up sends, flow completes --------
    let later = Utc::now() + Duration::hours(2);
    let run = scheduler.process_due(later, &mut stats);
    assert_eq!(run.processed, 1);
    assert_eq!(run.completed, 1);
    assert_eq!(run.errors, 0);
    assert_eq!(run.actions_dispatched, 1);

    let sent = channel.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].template, "winback_day_1");

    let enrollment = flow_store
        .due_enrollments(later + Duration::hours(24), 10)
        .into_iter()
        .next();
    assert!(enrollment.is_none(), "no enrollment should remain scheduled");

    // Webhook deliveries drained to the subscriber's log.
    for _ in 0..200 {
        if webhook_store.deliveries(&sub_id).len() >= 3 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(webhook_store.deliveries(&sub_id).len() >= 3);
    assert!(activity.count() >= 3);
    assert_eq!(stats.total_runs, 2);
}

#[tokio::test]
async fn test_batch_isolation_under_partial_failure() {
    let config = EngineConfig::default();
    let snapshots = Arc::new(MemorySnapshotStore::new());
    let segments = Arc::new(MemorySegmentStore::new());
    let flow_store = Arc::new(MemoryFlowStore::new());
    let webhook_store = Arc::new(MemoryWebhookStore::new());

    snapshots.put(at_risk_snapshot("good-1"));
    snapshots.put(at_risk_snapshot("good-2"));

    let dispatcher = WebhookDispatcher::new(
        webhook_store,
        Arc::new(ScriptedTransport::new()),
        &config.webhooks,
    );
    let flow_engine = Arc::new(FlowEngine::new(
        flow_store,
        snapshots.clone(),
        config.flows.clone(),
    ));
    let pipeline = EventPipeline::new(
        snapshots,
        segments,
        flow_engine,
        dispatcher,
        capture_activity(),
        config.scoring.clone(),
    );

    let make_event = |entity: &str| UsageEvent {
        message_id: Uuid::new_v4(),
        entity_id: entity.to_string(),
        event_name: "ping".into(),
        properties: HashMap::new(),
        occurred_at: Utc::now(),
    };

    let results = pipeline.process_batch(&[
        make_event("good-1"),
        make_event("missing"),
        make_event("good-2"),
    ]);

    assert!(results[0].ok());
    assert!(!results[1].ok());
    assert_eq!(results[1].errors[0].stage, "input");
    assert!(results[2].ok(), "batch must continue past a failed event");
}
