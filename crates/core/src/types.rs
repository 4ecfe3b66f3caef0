use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Categorical stage of an entity's product engagement.
///
/// Classification is recomputed from scratch on every evaluation; the
/// previously persisted state only matters for detecting a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Lead,
    Trial,
    Activated,
    PowerUser,
    AtRisk,
    ExpansionReady,
    Churned,
    Reactivated,
}

impl LifecycleState {
    /// Human-readable display name for dashboards and logs.
    pub fn display_name(&self) -> &'static str {
        match self {
            LifecycleState::Lead => "Lead",
            LifecycleState::Trial => "Trial",
            LifecycleState::Activated => "Activated",
            LifecycleState::PowerUser => "Power User",
            LifecycleState::AtRisk => "At Risk",
            LifecycleState::ExpansionReady => "Expansion Ready",
            LifecycleState::Churned => "Churned",
            LifecycleState::Reactivated => "Reactivated",
        }
    }

    /// States in which the entity is actively using the product.
    pub fn is_engaged(&self) -> bool {
        matches!(
            self,
            LifecycleState::Activated
                | LifecycleState::PowerUser
                | LifecycleState::ExpansionReady
                | LifecycleState::Reactivated
        )
    }
}

/// Subscription plan tiers, ordered by price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Starter,
    Growth,
    Scale,
    Enterprise,
}

impl PlanTier {
    /// List price per month in USD.
    pub fn monthly_price(&self) -> f64 {
        match self {
            PlanTier::Free => 0.0,
            PlanTier::Starter => 49.0,
            PlanTier::Growth => 149.0,
            PlanTier::Scale => 449.0,
            PlanTier::Enterprise => 1299.0,
        }
    }

    /// The next tier up, if any.
    pub fn next_tier(&self) -> Option<PlanTier> {
        match self {
            PlanTier::Free => Some(PlanTier::Starter),
            PlanTier::Starter => Some(PlanTier::Growth),
            PlanTier::Growth => Some(PlanTier::Scale),
            PlanTier::Scale => Some(PlanTier::Enterprise),
            PlanTier::Enterprise => None,
        }
    }

    /// Distinct features included before the tier's ceiling is reached.
    pub fn feature_allowance(&self) -> u32 {
        match self {
            PlanTier::Free => 3,
            PlanTier::Starter => 6,
            PlanTier::Growth => 12,
            PlanTier::Scale => 25,
            PlanTier::Enterprise => u32::MAX,
        }
    }
}

impl Default for PlanTier {
    fn default() -> Self {
        PlanTier::Free
    }
}

/// Read-only view of a tracked user or account at evaluation time.
///
/// The engine never mutates a snapshot directly; it emits [`ProposedUpdate`]
/// values that the persistence collaborator applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: String,
    pub account_id: Option<String>,
    pub lifecycle_state: LifecycleState,
    /// Days since the entity last logged in. `None` when never observed.
    pub last_login_days_ago: Option<u32>,
    pub login_frequency_last_7_days: u32,
    /// Distinct feature keys used in the trailing 30 days.
    pub feature_usage_last_30_days: Vec<String>,
    /// Average pages/actions per session.
    pub session_depth: f64,
    pub mrr: f64,
    pub plan_tier: PlanTier,
    pub seats_used: u32,
    pub seat_limit: u32,
    pub properties: HashMap<String, serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl EntitySnapshot {
    /// Fraction of purchased seats in use, `None` when the plan has no limit.
    pub fn seat_utilization(&self) -> Option<f64> {
        if self.seat_limit == 0 {
            return None;
        }
        Some(self.seats_used as f64 / self.seat_limit as f64)
    }
}

/// A behavioral event ingested from the product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Deduplication key: a redelivered message id is processed once.
    pub message_id: Uuid,
    pub entity_id: String,
    pub event_name: String,
    pub properties: HashMap<String, serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

/// A mutation the engine asks the persistence collaborator to apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ProposedUpdate {
    SetLifecycleState {
        entity_id: String,
        state: LifecycleState,
    },
    SetProperty {
        entity_id: String,
        key: String,
        value: serde_json::Value,
    },
}

/// One append-only audit line describing something the engine did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub entity_id: String,
    pub stage: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}
