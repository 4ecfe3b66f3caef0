//! Churn risk scoring — weighted factor accumulation over usage signals.
//!
//! Every factor is a monotone non-decreasing function of its negative
//! signal, so worsening a signal can never lower the total score.

use serde::{Deserialize, Serialize};

use lifecycle_core::types::{EntitySnapshot, PlanTier};

/// Risk tier derived by thresholding the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=29 => RiskTier::Low,
            30..=59 => RiskTier::Medium,
            60..=79 => RiskTier::High,
            _ => RiskTier::Critical,
        }
    }
}

/// One weighted contribution to the risk score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    /// Points this factor contributed, out of its `max_points`.
    pub points: f64,
    pub max_points: f64,
    pub detail: String,
}

/// Full churn scoring result for one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChurnRiskResult {
    pub risk_score: u8,
    pub risk_tier: RiskTier,
    pub factors: Vec<RiskFactor>,
    /// MRR counted as at-risk when the score crosses the At-Risk boundary.
    pub estimated_mrr_at_risk: f64,
    pub recommendations: Vec<String>,
}

const RECENCY_MAX: f64 = 35.0;
const FREQUENCY_MAX: f64 = 25.0;
const ADOPTION_MAX: f64 = 20.0;
const DEPTH_MAX: f64 = 10.0;
const COMMITMENT_MAX: f64 = 10.0;

/// Neutral contribution when login recency was never observed.
const RECENCY_NEUTRAL: f64 = 12.0;

/// Score at which MRR counts as at-risk; matches the High tier boundary.
const AT_RISK_BOUNDARY: u8 = 60;

/// Scores churn risk for a snapshot. Pure and total: absent signals fall
/// back to a neutral contribution instead of failing.
pub fn score_churn(snapshot: &EntitySnapshot) -> ChurnRiskResult {
    let mut factors = Vec::with_capacity(5);

    let recency = match snapshot.last_login_days_ago {
        Some(days) => {
            let points = (days.min(45) as f64 / 45.0) * RECENCY_MAX;
            RiskFactor {
                name: "login_recency".into(),
                points,
                max_points: RECENCY_MAX,
                detail: format!("{days} days since last login"),
            }
        }
        None => RiskFactor {
            name: "login_recency".into(),
            points: RECENCY_NEUTRAL,
            max_points: RECENCY_MAX,
            detail: "login recency never observed".into(),
        },
    };
    factors.push(recency);

    let frequency = snapshot.login_frequency_last_7_days.min(7);
    factors.push(RiskFactor {
        name: "login_frequency".into(),
        points: ((7 - frequency) as f64 / 7.0) * FREQUENCY_MAX,
        max_points: FREQUENCY_MAX,
        detail: format!(
            "{} logins in the last 7 days",
            snapshot.login_frequency_last_7_days
        ),
    });

    let features = snapshot.feature_usage_last_30_days.len().min(10) as u32;
    factors.push(RiskFactor {
        name: "feature_adoption".into(),
        points: ((10 - features) as f64 / 10.0) * ADOPTION_MAX,
        max_points: ADOPTION_MAX,
        detail: format!(
            "{} features used in the last 30 days",
            snapshot.feature_usage_last_30_days.len()
        ),
    });

    let depth = snapshot.session_depth.clamp(0.0, 5.0);
    factors.push(RiskFactor {
        name: "session_depth".into(),
        points: ((5.0 - depth) / 5.0) * DEPTH_MAX,
        max_points: DEPTH_MAX,
        detail: format!("average session depth {:.1}", snapshot.session_depth),
    });

    if snapshot.plan_tier == PlanTier::Free {
        factors.push(RiskFactor {
            name: "plan_commitment".into(),
            points: COMMITMENT_MAX,
            max_points: COMMITMENT_MAX,
            detail: "free plan, no monetary commitment".into(),
        });
    }

    let total: f64 = factors.iter().map(|f| f.points).sum();
    let risk_score = total.round().clamp(0.0, 100.0) as u8;
    let risk_tier = RiskTier::from_score(risk_score);

    let estimated_mrr_at_risk = if risk_score >= AT_RISK_BOUNDARY {
        snapshot.mrr
    } else {
        0.0
    };

    ChurnRiskResult {
        risk_score,
        risk_tier,
        recommendations: recommendations_for(&factors, risk_tier),
        factors,
        estimated_mrr_at_risk,
    }
}

fn recommendations_for(factors: &[RiskFactor], tier: RiskTier) -> Vec<String> {
    let mut recommendations = Vec::new();
    if matches!(tier, RiskTier::Low) {
        return recommendations;
    }

    for factor in factors {
        // Only factors contributing over half their range drive outreach.
        if factor.points < factor.max_points * 0.5 {
            continue;
        }
        let suggestion = match factor.name.as_str() {
            "login_recency" => "Send a re-engagement message before the account goes cold",
            "login_frequency" => "Schedule a check-in; weekly usage has dropped off",
            "feature_adoption" => "Offer onboarding for unused features",
            "session_depth" => "Share workflow guides to deepen sessions",
            "plan_commitment" => "Pitch a paid plan to anchor commitment",
            _ => continue,
        };
        recommendations.push(suggestion.to_string());
    }
    recommendations
}
