//! Batch membership evaluation — a pure transform from snapshots to the new
//! membership set plus entered/exited deltas. The caller applies the
//! replace-membership write.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use lifecycle_core::types::EntitySnapshot;

use crate::filters::{rule_matches, FilterRule, SegmentLogic};

/// Outcome of one full evaluation pass over a batch of snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentEvaluation {
    /// The complete new membership, in input order.
    pub matched: Vec<String>,
    /// Entities matched now but absent from the previous membership.
    pub entered: Vec<String>,
    /// Previous members no longer matched by this pass.
    pub exited: Vec<String>,
    /// Number of snapshots evaluated.
    pub total: usize,
}

/// Evaluates a filter tree against a batch of snapshots.
///
/// Empty rule lists are asymmetric by design: `All` logic matches every
/// snapshot, `Any` logic matches none.
pub fn evaluate(
    filters: &[FilterRule],
    logic: SegmentLogic,
    snapshots: &[EntitySnapshot],
    existing_member_ids: &HashSet<String>,
) -> SegmentEvaluation {
    let mut matched = Vec::new();
    let mut matched_set = HashSet::new();

    for snapshot in snapshots {
        let is_match = match logic {
            SegmentLogic::All => filters.iter().all(|r| rule_matches(r, snapshot)),
            SegmentLogic::Any => filters.iter().any(|r| rule_matches(r, snapshot)),
        };
        if is_match {
            matched.push(snapshot.entity_id.clone());
            matched_set.insert(snapshot.entity_id.clone());
        }
    }

    let entered = matched
        .iter()
        .filter(|id| !existing_member_ids.contains(*id))
        .cloned()
        .collect();
    let exited = existing_member_ids
        .iter()
        .filter(|id| !matched_set.contains(*id))
        .cloned()
        .collect();

    SegmentEvaluation {
        matched,
        entered,
        exited,
        total: snapshots.len(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;

    use super::*;
    use crate::filters::FilterOperator;
    use lifecycle_core::types::{LifecycleState, PlanTier};

    fn snapshot(entity_id: &str, mrr: f64) -> EntitySnapshot {
        EntitySnapshot {
            entity_id: entity_id.to_string(),
            account_id: None,
            lifecycle_state: LifecycleState::Activated,
            last_login_days_ago: Some(3),
            login_frequency_last_7_days: 2,
            feature_usage_last_30_days: vec![],
            session_depth: 1.0,
            mrr,
            plan_tier: PlanTier::Starter,
            seats_used: 1,
            seat_limit: 5,
            properties: HashMap::new(),
            updated_at: Utc::now(),
        }
    }

    fn mrr_rule(min: f64) -> FilterRule {
        FilterRule {
            field: "mrr".into(),
            operator: FilterOperator::GreaterOrEqual,
            value: serde_json::json!(min),
        }
    }

    #[test]
    fn test_empty_filters_all_logic_matches_everything() {
        let snapshots = vec![snapshot("a", 10.0), snapshot("b", 20.0)];
        let result = evaluate(&[], SegmentLogic::All, &snapshots, &HashSet::new());
        assert_eq!(result.matched, vec!["a", "b"]);
        assert_eq!(result.total, 2);
    }

    #[test]
    fn test_empty_filters_any_logic_matches_nothing() {
        let snapshots = vec![snapshot("a", 10.0), snapshot("b", 20.0)];
        let result = evaluate(&[], SegmentLogic::Any, &snapshots, &HashSet::new());
        assert!(result.matched.is_empty());
        assert_eq!(result.total, 2);
    }

    #[test]
    fn test_entered_and_exited_deltas() {
        let snapshots = vec![snapshot("a", 100.0), snapshot("b", 5.0), snapshot("c", 80.0)];
        let existing: HashSet<String> = ["a".to_string(), "b".to_string()].into();

        let result = evaluate(&[mrr_rule(50.0)], SegmentLogic::All, &snapshots, &existing);

        assert_eq!(result.matched, vec!["a", "c"]);
        assert_eq!(result.entered, vec!["c"]);
        assert_eq!(result.exited, vec!["b"]);
    }

    #[test]
    fn test_any_logic_composition() {
        let low_mrr = FilterRule {
            field: "mrr".into(),
            operator: FilterOperator::LessThan,
            value: serde_json::json!(10),
        };
        let snapshots = vec![snapshot("a", 100.0), snapshot("b", 5.0), snapshot("c", 30.0)];

        let result = evaluate(
            &[mrr_rule(50.0), low_mrr],
            SegmentLogic::Any,
            &snapshots,
            &HashSet::new(),
        );
        assert_eq!(result.matched, vec!["a", "b"]);
    }
}
