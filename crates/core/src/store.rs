//! Snapshot persistence contract plus the in-memory reference store used by
//! tests and the demo binary.

use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::types::{EntitySnapshot, ProposedUpdate};

/// Read/write access to entity snapshots. The engine reads snapshots and
/// hands mutations back as [`ProposedUpdate`] values; it never writes fields
/// directly.
pub trait SnapshotStore: Send + Sync {
    fn get(&self, entity_id: &str) -> Option<EntitySnapshot>;

    fn put(&self, snapshot: EntitySnapshot);

    fn list(&self) -> Vec<EntitySnapshot>;

    fn apply(&self, update: &ProposedUpdate) -> EngineResult<()>;

    /// Records a message id as processed. Returns `false` when the id was
    /// already seen, in which case the event must be skipped.
    fn mark_seen(&self, message_id: &Uuid) -> bool;
}

/// Concurrent in-memory snapshot store.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: DashMap<String, EntitySnapshot>,
    seen_messages: DashSet<Uuid>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            snapshots: DashMap::new(),
            seen_messages: DashSet::new(),
        }
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, entity_id: &str) -> Option<EntitySnapshot> {
        self.snapshots.get(entity_id).map(|s| s.clone())
    }

    fn put(&self, snapshot: EntitySnapshot) {
        self.snapshots.insert(snapshot.entity_id.clone(), snapshot);
    }

    fn list(&self) -> Vec<EntitySnapshot> {
        self.snapshots.iter().map(|s| s.value().clone()).collect()
    }

    fn apply(&self, update: &ProposedUpdate) -> EngineResult<()> {
        match update {
            ProposedUpdate::SetLifecycleState { entity_id, state } => {
                let mut entry = self.snapshots.get_mut(entity_id).ok_or_else(|| {
                    EngineError::Persistence(format!("unknown entity {entity_id}"))
                })?;
                entry.lifecycle_state = *state;
            }
            ProposedUpdate::SetProperty {
                entity_id,
                key,
                value,
            } => {
                let mut entry = self.snapshots.get_mut(entity_id).ok_or_else(|| {
                    EngineError::Persistence(format!("unknown entity {entity_id}"))
                })?;
                entry.properties.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    fn mark_seen(&self, message_id: &Uuid) -> bool {
        self.seen_messages.insert(*message_id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;

    use super::*;
    use crate::types::{LifecycleState, PlanTier};

    fn sample_snapshot(entity_id: &str) -> EntitySnapshot {
        EntitySnapshot {
            entity_id: entity_id.to_string(),
            account_id: None,
            lifecycle_state: LifecycleState::Trial,
            last_login_days_ago: Some(2),
            login_frequency_last_7_days: 3,
            feature_usage_last_30_days: vec!["reports".into()],
            session_depth: 2.5,
            mrr: 0.0,
            plan_tier: PlanTier::Free,
            seats_used: 1,
            seat_limit: 3,
            properties: HashMap::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_apply_proposed_updates() {
        let store = MemorySnapshotStore::new();
        store.put(sample_snapshot("e-1"));

        store
            .apply(&ProposedUpdate::SetLifecycleState {
                entity_id: "e-1".into(),
                state: LifecycleState::Activated,
            })
            .unwrap();
        store
            .apply(&ProposedUpdate::SetProperty {
                entity_id: "e-1".into(),
                key: "onboarded".into(),
                value: serde_json::json!(true),
            })
            .unwrap();

        let snapshot = store.get("e-1").unwrap();
        assert_eq!(snapshot.lifecycle_state, LifecycleState::Activated);
        assert_eq!(snapshot.properties["onboarded"], serde_json::json!(true));
    }

    #[test]
    fn test_apply_unknown_entity_is_persistence_error() {
        let store = MemorySnapshotStore::new();
        let err = store
            .apply(&ProposedUpdate::SetLifecycleState {
                entity_id: "ghost".into(),
                state: LifecycleState::Churned,
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::Persistence(_)));
    }

    #[test]
    fn test_mark_seen_dedup() {
        let store = MemorySnapshotStore::new();
        let id = Uuid::new_v4();
        assert!(store.mark_seen(&id));
        assert!(!store.mark_seen(&id));
    }
}
