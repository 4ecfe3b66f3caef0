//! Lifecycle Automation Engine — demo driver.
//!
//! Wires the in-memory reference collaborators, seeds demo data, pushes a
//! batch of events through the pipeline, then runs scheduler ticks so the
//! full enroll -> wait -> resume cycle is observable from one process.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use clap::Parser;
use tracing::{info, warn};
use uuid::Uuid;

use lifecycle_core::activity::capture_activity;
use lifecycle_core::config::EngineConfig;
use lifecycle_core::store::{MemorySnapshotStore, SnapshotStore};
use lifecycle_core::transport::{memory_transport, MessageChannel};
use lifecycle_core::types::{EntitySnapshot, LifecycleState, PlanTier, UsageEvent};
use lifecycle_flows::types::{
    ActionConfig, ConditionConfig, DelayConfig, ExitConfig, FlowDefinition, FlowEdge, FlowNode,
    FlowSettings, NodeKind, TriggerConfig,
};
use lifecycle_flows::{FlowEngine, FlowStatus, FlowStore, MemoryFlowStore, Scheduler, SchedulerStats};
use lifecycle_pipeline::EventPipeline;
use lifecycle_segmentation::{
    FilterOperator, FilterRule, MemorySegmentStore, Segment, SegmentLogic, SegmentStore,
};
use lifecycle_webhooks::{
    MemoryWebhookStore, ScriptedTransport, WebhookDispatcher, WebhookStore, WebhookSubscription,
};

#[derive(Parser, Debug)]
#[command(name = "lifecycle-engine")]
#[command(about = "SaaS product-usage lifecycle automation engine")]
#[command(version)]
struct Cli {
    /// Number of demo entities to seed
    #[arg(long, default_value_t = 3)]
    entities: usize,

    /// Scheduler ticks to run after the batch
    #[arg(long, default_value_t = 2)]
    ticks: u32,

    /// Print per-event pipeline results as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lifecycle_engine=info,lifecycle_flows=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Lifecycle engine starting up");

    let config = EngineConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngineConfig::default()
    });

    // In-memory reference collaborators; production wires durable ones.
    let snapshots = Arc::new(MemorySnapshotStore::new());
    let segments = Arc::new(MemorySegmentStore::new());
    let flow_store = Arc::new(MemoryFlowStore::new());
    let webhook_store = Arc::new(MemoryWebhookStore::new());
    let activity = capture_activity();
    let channel = memory_transport();

    seed_entities(snapshots.as_ref(), cli.entities);
    seed_segments(segments.as_ref());
    seed_flows(flow_store.as_ref());
    let subscription =
        WebhookSubscription::new("https://hooks.example.com/lifecycle", vec!["*".into()]);
    let subscription_id = subscription.id;
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

    // One behavioral event per entity.
    let events: Vec<UsageEvent> = snapshots
        .list()
        .into_iter()
        .map(|s| UsageEvent {
            message_id: Uuid::new_v4(),
            entity_id: s.entity_id,
            event_name: "session_closed".into(),
            properties: HashMap::new(),
            occurred_at: Utc::now(),
        })
        .collect();

    let results = pipeline.process_batch(&events);
    for result in &results {
        if cli.json {
            println!("{}", serde_json::to_string_pretty(result)?);
        } else {
            info!(
                entity_id = %result.entity_id,
                transitioned = result.lifecycle.transitioned,
                churn_score = result.churn.score,
                expansion_score = result.expansion.score,
                entered = result.segments.entered.len(),
                enrollments = result.flows.enrollments_created,
                webhooks = result.webhooks.events_dispatched,
                errors = result.errors.len(),
                "Pipeline result"
            );
        }
    }

    // Drive waiting enrollments forward, pretending time passed.
    let scheduler = Scheduler::new(
        flow_engine,
        flow_store.clone(),
        snapshots.clone(),
        &config.scheduler,
    );
    let mut stats = SchedulerStats::default();
    for tick in 1..=cli.ticks {
        let now = Utc::now() + Duration::hours(tick as i64 * 26);
        let run = scheduler.process_due(now, &mut stats);
        info!(
            tick,
            processed = run.processed,
            advanced = run.advanced,
            completed = run.completed,
            skipped = run.skipped,
            errors = run.errors,
            "Tick finished"
        );
    }

    info!(
        total_runs = stats.total_runs,
        total_processed = stats.total_processed,
        total_completed = stats.total_completed,
        messages_sent = channel.sent_count(),
        deliveries = webhook_store.deliveries(&subscription_id).len(),
        activity_entries = activity.count(),
        "Demo run complete"
    );
    Ok(())
}

fn seed_entities(snapshots: &MemorySnapshotStore, count: usize) {
    let profiles = [
        // Healthy grower near its seat limit.
        (Some(1u32), 6u32, 9u32, 6.5, 149.0, PlanTier::Growth, 9u32, 10u32),
        // Drifting toward churn.
        (Some(18), 0, 1, 1.2, 49.0, PlanTier::Starter, 2, 5),
        // Fresh trial.
        (Some(0), 3, 2, 2.0, 0.0, PlanTier::Free, 1, 3),
    ];
    for i in 0..count {
        let p = profiles[i % profiles.len()];
        snapshots.put(EntitySnapshot {
            entity_id: format!("acct-{}", i + 1),
            account_id: None,
            lifecycle_state: LifecycleState::Activated,
            last_login_days_ago: p.0,
            login_frequency_last_7_days: p.1,
            feature_usage_last_30_days: (0..p.2).map(|n| format!("feature-{n}")).collect(),
            session_depth: p.3,
            mrr: p.4,
            plan_tier: p.5,
            seats_used: p.6,
            seat_limit: p.7,
            properties: HashMap::new(),
            updated_at: Utc::now(),
        });
    }
    info!(count, "Seeded demo entities");
}

fn seed_segments(segments: &MemorySegmentStore) {
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
                value: serde_json::json!(0),
            },
        ],
        SegmentLogic::All,
    ));
    segments.upsert(Segment::new(
        "expansion-candidates",
        vec![FilterRule {
            field: "seat_utilization".into(),
            operator: FilterOperator::GreaterOrEqual,
            value: serde_json::json!(0.8),
        }],
        SegmentLogic::All,
    ));
    info!("Seeded demo segments");
}

/// Two demo flows: a winback sequence with a condition branch and an
/// expansion nudge.
fn seed_flows(store: &MemoryFlowStore) {
    let now = Utc::now();

    // ---- 1. At-Risk Winback ----
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
    let wait = FlowNode {
        id: Uuid::new_v4(),
        kind: NodeKind::Delay(DelayConfig {
            duration_secs: 86_400,
        }),
    };
    let still_paying = FlowNode {
        id: Uuid::new_v4(),
        kind: NodeKind::Condition(ConditionConfig {
            filters: vec![FilterRule {
                field: "mrr".into(),
                operator: FilterOperator::GreaterThan,
                value: serde_json::json!(0),
            }],
            logic: SegmentLogic::All,
        }),
    };
    let follow_up = FlowNode {
        id: Uuid::new_v4(),
        kind: NodeKind::Action(ActionConfig::SendMessage {
            channel: MessageChannel::Email,
            template: "winback_day_1".into(),
        }),
    };
    let mark = FlowNode {
        id: Uuid::new_v4(),
        kind: NodeKind::Action(ActionConfig::SetProperty {
            key: "winback_completed".into(),
            value: serde_json::json!(true),
        }),
    };
    let done = FlowNode {
        id: Uuid::new_v4(),
        kind: NodeKind::Exit(ExitConfig { reason: None }),
    };
    let gone = FlowNode {
        id: Uuid::new_v4(),
        kind: NodeKind::Exit(ExitConfig {
            reason: Some("no active subscription".into()),
        }),
    };
    let edges = vec![
        FlowEdge { from: trigger.id, to: first_touch.id, label: None },
        FlowEdge { from: first_touch.id, to: wait.id, label: None },
        FlowEdge { from: wait.id, to: still_paying.id, label: None },
        FlowEdge { from: still_paying.id, to: follow_up.id, label: Some("true".into()) },
        FlowEdge { from: still_paying.id, to: gone.id, label: Some("false".into()) },
        FlowEdge { from: follow_up.id, to: mark.id, label: None },
        FlowEdge { from: mark.id, to: done.id, label: None },
    ];
    store.upsert_flow(FlowDefinition {
        id: Uuid::new_v4(),
        name: "At-Risk Winback".into(),
        description: "Two-touch winback with a payment check".into(),
        status: FlowStatus::Active,
        version: 1,
        nodes: vec![trigger, first_touch, wait, still_paying, follow_up, mark, done, gone],
        edges,
        settings: FlowSettings {
            auto_exit_after_days: Some(30),
            ..FlowSettings::default()
        },
        created_at: now,
        updated_at: now,
    });

    // ---- 2. Expansion Nudge ----
    let trigger = FlowNode {
        id: Uuid::new_v4(),
        kind: NodeKind::Trigger(TriggerConfig::LifecycleChange {
            to_state: Some(LifecycleState::ExpansionReady),
        }),
    };
    let nudge = FlowNode {
        id: Uuid::new_v4(),
        kind: NodeKind::Action(ActionConfig::SendMessage {
            channel: MessageChannel::InApp,
            template: "seat_upgrade_nudge".into(),
        }),
    };
    let notify = FlowNode {
        id: Uuid::new_v4(),
        kind: NodeKind::Action(ActionConfig::EmitEvent {
            event_type: "expansion.nudged".into(),
        }),
    };
    let finish = FlowNode {
        id: Uuid::new_v4(),
        kind: NodeKind::Exit(ExitConfig { reason: None }),
    };
    let edges = vec![
        FlowEdge { from: trigger.id, to: nudge.id, label: None },
        FlowEdge { from: nudge.id, to: notify.id, label: None },
        FlowEdge { from: notify.id, to: finish.id, label: None },
    ];
    store.upsert_flow(FlowDefinition {
        id: Uuid::new_v4(),
        name: "Expansion Nudge".into(),
        description: "In-app upsell when an account becomes expansion-ready".into(),
        status: FlowStatus::Active,
        version: 1,
        nodes: vec![trigger, nudge, notify, finish],
        edges,
        settings: FlowSettings {
            allow_re_entry: true,
            re_entry_cooldown_hours: 24 * 7,
            ..FlowSettings::default()
        },
        created_at: now,
        updated_at: now,
    });

    info!("Seeded 2 demo flows");
}
