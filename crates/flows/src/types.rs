use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lifecycle_core::transport::MessageChannel;
use lifecycle_core::types::LifecycleState;
use lifecycle_segmentation::{FilterRule, SegmentLogic};

/// A flow definition: a directed graph of typed nodes plus settings that
/// govern enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub status: FlowStatus,
    pub version: u32,
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
    pub settings: FlowSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlowDefinition {
    pub fn node(&self, id: &Uuid) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == *id)
    }

    pub fn trigger_nodes(&self) -> impl Iterator<Item = (&FlowNode, &TriggerConfig)> {
        self.nodes.iter().filter_map(|n| match &n.kind {
            NodeKind::Trigger(config) => Some((n, config)),
            _ => None,
        })
    }

    /// The unlabeled outgoing edge of a node, falling back to its sole edge.
    pub fn default_edge(&self, from: &Uuid) -> Option<&FlowEdge> {
        let mut outgoing = self.edges.iter().filter(|e| e.from == *from);
        let first = outgoing.next()?;
        if first.label.is_none() {
            return Some(first);
        }
        self.edges
            .iter()
            .find(|e| e.from == *from && e.label.is_none())
            .or(Some(first).filter(|_| outgoing.next().is_none()))
    }

    pub fn labeled_edge(&self, from: &Uuid, label: &str) -> Option<&FlowEdge> {
        self.edges
            .iter()
            .find(|e| e.from == *from && e.label.as_deref() == Some(label))
    }
}

/// Lifecycle status of a flow definition. Non-active flows accept no new
/// enrollments and are skipped, not errored, at tick time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Draft,
    Active,
    Paused,
    Archived,
    Error,
}

/// A single node in the flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: Uuid,
    pub kind: NodeKind,
}

/// Closed union over node kinds, each carrying only its own configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum NodeKind {
    Trigger(TriggerConfig),
    Condition(ConditionConfig),
    Delay(DelayConfig),
    Action(ActionConfig),
    Exit(ExitConfig),
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Trigger(_) => "trigger",
            NodeKind::Condition(_) => "condition",
            NodeKind::Delay(_) => "delay",
            NodeKind::Action(_) => "action",
            NodeKind::Exit(_) => "exit",
        }
    }
}

/// What enrolls an entity into a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TriggerConfig {
    /// A lifecycle transition, optionally narrowed to a target state.
    LifecycleChange { to_state: Option<LifecycleState> },
    SegmentEntered { segment_id: Uuid },
    EventNamed { event_name: String },
}

/// A condition node reuses the segment rule grammar against the current
/// snapshot and follows the `"true"` or `"false"` labeled edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub filters: Vec<FilterRule>,
    pub logic: SegmentLogic,
}

/// The sole pause point in flow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayConfig {
    pub duration_secs: u64,
}

/// Side effects executed synchronously during an advance pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ActionConfig {
    SendMessage {
        channel: MessageChannel,
        template: String,
    },
    SetProperty {
        key: String,
        value: serde_json::Value,
    },
    EmitEvent {
        event_type: String,
    },
}

/// Terminal node. Without a reason the enrollment completes; with one it
/// exits early.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    pub reason: Option<String>,
}

/// A directed edge between two nodes; condition outputs carry labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEdge {
    pub from: Uuid,
    pub to: Uuid,
    pub label: Option<String>,
}

/// Enrollment-governing settings for a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSettings {
    /// Lifetime cap on enrollments, across all statuses.
    pub enrollment_cap: Option<u64>,
    pub max_concurrent_enrollments: Option<u64>,
    /// Enrollments older than this are exited at tick time.
    pub auto_exit_after_days: Option<u32>,
    pub allow_re_entry: bool,
    pub re_entry_cooldown_hours: u32,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            enrollment_cap: None,
            max_concurrent_enrollments: None,
            auto_exit_after_days: None,
            allow_re_entry: false,
            re_entry_cooldown_hours: 24,
        }
    }
}

/// One entity's traversal of one flow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub entity_id: String,
    pub current_node_id: Uuid,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the scheduler should resume this enrollment; `None` once a
    /// terminal node is reached.
    pub next_process_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<String>,
    pub error: Option<String>,
    pub error_count: u32,
    /// Optimistic-claim counter; bumped on every claim so concurrent ticks
    /// cannot double-advance one enrollment.
    pub version: u64,
    pub execution_log: Vec<ExecutionLogEntry>,
}

impl Enrollment {
    pub fn new(flow_id: Uuid, entity_id: impl Into<String>, trigger_node_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            flow_id,
            entity_id: entity_id.into(),
            current_node_id: trigger_node_id,
            status: EnrollmentStatus::Active,
            enrolled_at: now,
            updated_at: now,
            next_process_at: None,
            exit_reason: None,
            error: None,
            error_count: 0,
            version: 0,
            execution_log: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != EnrollmentStatus::Active
    }
}

/// Runtime status of an enrollment. Enrollments are destroyed logically via
/// status transitions, never removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Exited,
    Errored,
}

/// Record of one node execution within an enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub node_id: Uuid,
    pub node_kind: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Where an advance pass stopped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AdvanceOutcome {
    /// Paused at a delay node until the given time.
    Waiting { until: DateTime<Utc> },
    Completed,
    Exited { reason: String },
    Errored { message: String },
}

/// Full result of one advance pass.
#[derive(Debug, Clone)]
pub struct AdvanceReport {
    pub outcome: AdvanceOutcome,
    pub nodes_traversed: u32,
    pub actions_executed: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_edge_resolution() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let now = Utc::now();
        let flow = FlowDefinition {
            id: Uuid::new_v4(),
            name: "t".into(),
            description: String::new(),
            status: FlowStatus::Active,
            version: 1,
            nodes: vec![],
            edges: vec![
                FlowEdge {
                    from: a,
                    to: b,
                    label: Some("true".into()),
                },
                FlowEdge {
                    from: a,
                    to: c,
                    label: None,
                },
            ],
            settings: FlowSettings::default(),
            created_at: now,
            updated_at: now,
        };

        assert_eq!(flow.default_edge(&a).unwrap().to, c);
        assert_eq!(flow.labeled_edge(&a, "true").unwrap().to, b);
        assert!(flow.labeled_edge(&a, "false").is_none());
        assert!(flow.default_edge(&b).is_none());
    }

    #[test]
    fn test_sole_labeled_edge_is_default() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let now = Utc::now();
        let flow = FlowDefinition {
            id: Uuid::new_v4(),
            name: "t".into(),
            description: String::new(),
            status: FlowStatus::Active,
            version: 1,
            nodes: vec![],
            edges: vec![FlowEdge {
                from: a,
                to: b,
                label: Some("true".into()),
            }],
            settings: FlowSettings::default(),
            created_at: now,
            updated_at: now,
        };
        assert_eq!(flow.default_edge(&a).unwrap().to, b);
    }

    #[test]
    fn test_node_kind_serde_tagging() {
        let node = FlowNode {
            id: Uuid::new_v4(),
            kind: NodeKind::Delay(DelayConfig { duration_secs: 60 }),
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"]["kind"], "delay");
        assert_eq!(json["kind"]["duration_secs"], 60);
    }
}
