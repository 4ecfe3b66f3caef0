//! Lifecycle classification — recomputed from scratch on every evaluation.

use serde::{Deserialize, Serialize};

use lifecycle_core::types::{EntitySnapshot, LifecycleState};

/// Result of classifying a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleClassification {
    pub state: LifecycleState,
    /// Heuristic confidence in [0, 1].
    pub confidence: f64,
    /// Which signals drove the decision, for dashboards and activity logs.
    pub signals: Vec<String>,
}

// Inactivity boundaries, in days since last login.
const CHURN_INACTIVITY_DAYS: u32 = 30;
const AT_RISK_INACTIVITY_DAYS: u32 = 14;
const REACTIVATION_WINDOW_DAYS: u32 = 3;

/// Classifies a snapshot into a lifecycle state.
///
/// Stateless and idempotent: the same snapshot always produces the same
/// state and confidence. The snapshot's recorded `lifecycle_state` is read
/// only to recognize a return from `Churned` as `Reactivated`.
pub fn classify_lifecycle(snapshot: &EntitySnapshot) -> LifecycleClassification {
    let mut signals = Vec::new();

    let days_idle = snapshot.last_login_days_ago;
    let frequency = snapshot.login_frequency_last_7_days;
    let features = snapshot.feature_usage_last_30_days.len() as u32;
    let paying = snapshot.mrr > 0.0;

    // Inactivity dominates every other signal.
    if let Some(days) = days_idle {
        if days >= CHURN_INACTIVITY_DAYS && frequency == 0 {
            signals.push(format!("no login for {days} days"));
            return LifecycleClassification {
                state: LifecycleState::Churned,
                confidence: confidence_for_idle(days),
                signals,
            };
        }
        if days >= AT_RISK_INACTIVITY_DAYS || (days >= 7 && frequency == 0) {
            signals.push(format!("{days} days since last login"));
            if frequency == 0 {
                signals.push("no logins in the last 7 days".to_string());
            }
            return LifecycleClassification {
                state: LifecycleState::AtRisk,
                confidence: 0.75,
                signals,
            };
        }
    }

    // Recently active after a recorded churn.
    if snapshot.lifecycle_state == LifecycleState::Churned
        && days_idle.is_some_and(|d| d <= REACTIVATION_WINDOW_DAYS)
    {
        signals.push("activity after recorded churn".to_string());
        return LifecycleClassification {
            state: LifecycleState::Reactivated,
            confidence: 0.8,
            signals,
        };
    }

    // Monetary pressure outranks engagement depth.
    if paying {
        if let Some(utilization) = snapshot.seat_utilization() {
            if utilization >= 0.85 && snapshot.plan_tier.next_tier().is_some() {
                signals.push(format!("seat utilization {:.0}%", utilization * 100.0));
                return LifecycleClassification {
                    state: LifecycleState::ExpansionReady,
                    confidence: 0.7 + 0.25 * (utilization.min(1.0) - 0.85) / 0.15,
                    signals,
                };
            }
        }

        if frequency >= 5 && features >= 8 && snapshot.session_depth >= 5.0 {
            signals.push(format!("{frequency} logins/week, {features} features"));
            return LifecycleClassification {
                state: LifecycleState::PowerUser,
                confidence: 0.85,
                signals,
            };
        }

        if features >= 3 {
            signals.push(format!("{features} features adopted"));
            return LifecycleClassification {
                state: LifecycleState::Activated,
                confidence: 0.7,
                signals,
            };
        }

        // Paying but shallow usage: still activated, lower confidence.
        signals.push("paying with shallow adoption".to_string());
        return LifecycleClassification {
            state: LifecycleState::Activated,
            confidence: 0.55,
            signals,
        };
    }

    // Free plan: any observed usage is a trial, silence is a lead.
    if frequency > 0 || features > 0 {
        signals.push("free plan with product usage".to_string());
        LifecycleClassification {
            state: LifecycleState::Trial,
            confidence: 0.65,
            signals,
        }
    } else {
        signals.push("no observed usage".to_string());
        LifecycleClassification {
            state: LifecycleState::Lead,
            confidence: 0.6,
            signals,
        }
    }
}

fn confidence_for_idle(days: u32) -> f64 {
    // 30 idle days -> 0.7, saturating toward 0.95 at 90+.
    let extra = (days.saturating_sub(CHURN_INACTIVITY_DAYS)).min(60) as f64;
    0.7 + 0.25 * extra / 60.0
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;

    use super::*;
    use lifecycle_core::types::PlanTier;

    fn snapshot() -> EntitySnapshot {
        EntitySnapshot {
            entity_id: "e-1".into(),
            account_id: None,
            lifecycle_state: LifecycleState::Activated,
            last_login_days_ago: Some(1),
            login_frequency_last_7_days: 4,
            feature_usage_last_30_days: vec!["a".into(), "b".into(), "c".into()],
            session_depth: 3.0,
            mrr: 49.0,
            plan_tier: PlanTier::Starter,
            seats_used: 2,
            seat_limit: 10,
            properties: HashMap::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_idempotent() {
        let s = snapshot();
        let first = classify_lifecycle(&s);
        let second = classify_lifecycle(&s);
        assert_eq!(first.state, second.state);
        assert_eq!(first.confidence, second.confidence);
    }

    #[test]
    fn test_long_inactivity_is_churned() {
        let mut s = snapshot();
        s.last_login_days_ago = Some(45);
        s.login_frequency_last_7_days = 0;
        s.feature_usage_last_30_days.clear();

        let result = classify_lifecycle(&s);
        assert_eq!(result.state, LifecycleState::Churned);
        assert!(result.confidence >= 0.7);
    }

    #[test]
    fn test_moderate_inactivity_is_at_risk() {
        let mut s = snapshot();
        s.last_login_days_ago = Some(15);
        let result = classify_lifecycle(&s);
        assert_eq!(result.state, LifecycleState::AtRisk);
    }

    #[test]
    fn test_reactivated_after_churn() {
        let mut s = snapshot();
        s.lifecycle_state = LifecycleState::Churned;
        s.last_login_days_ago = Some(1);
        let result = classify_lifecycle(&s);
        assert_eq!(result.state, LifecycleState::Reactivated);
    }

    #[test]
    fn test_seat_pressure_is_expansion_ready() {
        let mut s = snapshot();
        s.seats_used = 9;
        s.seat_limit = 10;
        let result = classify_lifecycle(&s);
        assert_eq!(result.state, LifecycleState::ExpansionReady);
    }

    #[test]
    fn test_power_user() {
        let mut s = snapshot();
        s.login_frequency_last_7_days = 6;
        s.feature_usage_last_30_days =
            (0..9).map(|i| format!("feature-{i}")).collect();
        s.session_depth = 7.5;
        let result = classify_lifecycle(&s);
        assert_eq!(result.state, LifecycleState::PowerUser);
    }

    #[test]
    fn test_free_plan_states() {
        let mut s = snapshot();
        s.mrr = 0.0;
        s.plan_tier = PlanTier::Free;
        assert_eq!(classify_lifecycle(&s).state, LifecycleState::Trial);

        s.login_frequency_last_7_days = 0;
        s.feature_usage_last_30_days.clear();
        s.last_login_days_ago = None;
        assert_eq!(classify_lifecycle(&s).state, LifecycleState::Lead);
    }

    #[test]
    fn test_missing_login_recency_is_neutral() {
        let mut s = snapshot();
        s.last_login_days_ago = None;
        // Never classified churned purely from an absent signal.
        let result = classify_lifecycle(&s);
        assert_ne!(result.state, LifecycleState::Churned);
    }
}
