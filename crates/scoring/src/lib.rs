//! Scoring library — stateless lifecycle classification, churn risk, and
//! expansion opportunity scoring over entity snapshots. Pure functions, no
//! I/O; identical inputs always yield identical outputs.

pub mod churn;
pub mod expansion;
pub mod lifecycle;

pub use churn::{score_churn, ChurnRiskResult, RiskFactor, RiskTier};
pub use expansion::{
    detect_expansion, expansion_score, ExpansionSignal, ExpansionSignalKind,
};
pub use lifecycle::{classify_lifecycle, LifecycleClassification};
