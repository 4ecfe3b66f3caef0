//! Filter rule grammar and evaluation against entity snapshots.
//!
//! The same grammar backs segment criteria and flow condition nodes.

use serde::{Deserialize, Serialize};

use lifecycle_core::types::EntitySnapshot;

/// A leaf predicate: compares one snapshot field against a literal value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRule {
    pub field: String,
    pub operator: FilterOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Contains,
    InSet,
    NotInSet,
}

/// How a segment's rules compose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentLogic {
    /// Every rule must match. An empty rule list matches everything.
    All,
    /// At least one rule must match. An empty rule list matches nothing.
    Any,
}

/// Evaluates one rule against a snapshot. A rule referencing a field the
/// snapshot doesn't carry is `false`, never an error.
pub fn rule_matches(rule: &FilterRule, snapshot: &EntitySnapshot) -> bool {
    match resolve_field(snapshot, &rule.field) {
        Some(actual) => compare_values(&actual, rule.operator, &rule.value),
        None => false,
    }
}

/// Resolves a field name to a JSON value: built-in snapshot fields first,
/// then free-form properties.
pub fn resolve_field(snapshot: &EntitySnapshot, field: &str) -> Option<serde_json::Value> {
    let value = match field {
        "entity_id" => serde_json::json!(snapshot.entity_id),
        "account_id" => serde_json::json!(snapshot.account_id.as_deref()?),
        "lifecycle_state" => serde_json::to_value(snapshot.lifecycle_state).ok()?,
        "last_login_days_ago" => serde_json::json!(snapshot.last_login_days_ago?),
        "login_frequency_last_7_days" => {
            serde_json::json!(snapshot.login_frequency_last_7_days)
        }
        "feature_usage_last_30_days" => {
            serde_json::json!(snapshot.feature_usage_last_30_days)
        }
        "feature_count" => serde_json::json!(snapshot.feature_usage_last_30_days.len()),
        "session_depth" => serde_json::json!(snapshot.session_depth),
        "mrr" => serde_json::json!(snapshot.mrr),
        "plan_tier" => serde_json::to_value(snapshot.plan_tier).ok()?,
        "seats_used" => serde_json::json!(snapshot.seats_used),
        "seat_limit" => serde_json::json!(snapshot.seat_limit),
        "seat_utilization" => serde_json::json!(snapshot.seat_utilization()?),
        other => snapshot.properties.get(other)?.clone(),
    };
    Some(value)
}

pub fn compare_values(
    actual: &serde_json::Value,
    operator: FilterOperator,
    expected: &serde_json::Value,
) -> bool {
    match operator {
        FilterOperator::Equals => actual == expected,
        FilterOperator::NotEquals => actual != expected,
        FilterOperator::GreaterThan => {
            numeric_cmp(actual, expected).is_some_and(|o| o == std::cmp::Ordering::Greater)
        }
        FilterOperator::GreaterOrEqual => {
            numeric_cmp(actual, expected).is_some_and(|o| o != std::cmp::Ordering::Less)
        }
        FilterOperator::LessThan => {
            numeric_cmp(actual, expected).is_some_and(|o| o == std::cmp::Ordering::Less)
        }
        FilterOperator::LessOrEqual => {
            numeric_cmp(actual, expected).is_some_and(|o| o != std::cmp::Ordering::Greater)
        }
        FilterOperator::Contains => match actual {
            serde_json::Value::String(s) => {
                expected.as_str().is_some_and(|e| s.contains(e))
            }
            serde_json::Value::Array(items) => items.contains(expected),
            _ => false,
        },
        FilterOperator::InSet => expected
            .as_array()
            .is_some_and(|set| set.contains(actual)),
        FilterOperator::NotInSet => expected
            .as_array()
            .is_some_and(|set| !set.contains(actual)),
    }
}

fn numeric_cmp(a: &serde_json::Value, b: &serde_json::Value) -> Option<std::cmp::Ordering> {
    let a_num = a.as_f64()?;
    let b_num = b.as_f64()?;
    a_num.partial_cmp(&b_num)
}
