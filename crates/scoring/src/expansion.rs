//! Expansion opportunity detection — seat pressure, feature ceilings, and
//! usage depth mapped to upgrade suggestions with confidence weights.

use serde::{Deserialize, Serialize};

use lifecycle_core::types::{EntitySnapshot, PlanTier};

/// What kind of opportunity was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionSignalKind {
    SeatPressure,
    FeatureCeiling,
    UsageDepth,
}

impl ExpansionSignalKind {
    /// Score weight: how much a full-confidence signal of this kind is worth.
    fn weight(&self) -> f64 {
        match self {
            ExpansionSignalKind::SeatPressure => 50.0,
            ExpansionSignalKind::FeatureCeiling => 35.0,
            ExpansionSignalKind::UsageDepth => 25.0,
        }
    }
}

/// A detected expansion opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionSignal {
    pub kind: ExpansionSignalKind,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
    pub suggested_plan: PlanTier,
    /// Estimated MRR uplift if the suggested upgrade lands.
    pub uplift_mrr: f64,
    pub detail: String,
}

const SEAT_PRESSURE_THRESHOLD: f64 = 0.8;
const DEPTH_THRESHOLD: f64 = 6.0;

/// Detects expansion signals for an entity, optionally folding in its
/// account's snapshot for seat data the entity itself lacks. Pure and total.
pub fn detect_expansion(
    snapshot: &EntitySnapshot,
    account: Option<&EntitySnapshot>,
) -> Vec<ExpansionSignal> {
    let mut signals = Vec::new();

    let next_tier = match snapshot.plan_tier.next_tier() {
        Some(tier) => tier,
        // Top tier: nothing to upsell.
        None => return signals,
    };
    let uplift = next_tier.monthly_price() - snapshot.plan_tier.monthly_price();

    let utilization = snapshot
        .seat_utilization()
        .or_else(|| account.and_then(|a| a.seat_utilization()));
    if let Some(utilization) = utilization {
        if utilization >= SEAT_PRESSURE_THRESHOLD {
            // 80% -> 0.5 confidence, 100%+ -> 1.0.
            let confidence =
                (0.5 + 2.5 * (utilization.min(1.0) - SEAT_PRESSURE_THRESHOLD)).min(1.0);
            signals.push(ExpansionSignal {
                kind: ExpansionSignalKind::SeatPressure,
                confidence,
                suggested_plan: next_tier,
                uplift_mrr: uplift,
                detail: format!("{:.0}% of seats in use", utilization * 100.0),
            });
        }
    }

    let allowance = snapshot.plan_tier.feature_allowance();
    let used = snapshot.feature_usage_last_30_days.len() as u32;
    if allowance != u32::MAX && used >= allowance {
        let over = used - allowance;
        signals.push(ExpansionSignal {
            kind: ExpansionSignalKind::FeatureCeiling,
            confidence: (0.6 + 0.1 * over as f64).min(1.0),
            suggested_plan: next_tier,
            uplift_mrr: uplift,
            detail: format!("{used} features used against an allowance of {allowance}"),
        });
    }

    if snapshot.session_depth >= DEPTH_THRESHOLD && snapshot.login_frequency_last_7_days >= 4 {
        signals.push(ExpansionSignal {
            kind: ExpansionSignalKind::UsageDepth,
            confidence: 0.5,
            suggested_plan: next_tier,
            uplift_mrr: uplift,
            detail: format!(
                "session depth {:.1} across {} logins/week",
                snapshot.session_depth, snapshot.login_frequency_last_7_days
            ),
        });
    }

    signals
}

/// Aggregates signals into a 0-100 expansion score: the sum of
/// confidence-weighted signal weights, capped at 100. Deterministic.
pub fn expansion_score(signals: &[ExpansionSignal]) -> u8 {
    let total: f64 = signals
        .iter()
        .map(|s| s.confidence.clamp(0.0, 1.0) * s.kind.weight())
        .sum();
    total.round().min(100.0) as u8
}
