//! Flow and enrollment persistence contract, including the due-enrollment
//! index query and the optimistic claim the scheduler serializes on.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use lifecycle_core::error::{EngineError, EngineResult};

use crate::types::{Enrollment, EnrollmentStatus, FlowDefinition, FlowStatus};

/// Total and currently-active enrollment counts for one flow.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnrollmentCounts {
    pub total: u64,
    pub active: u64,
}

pub trait FlowStore: Send + Sync {
    fn get_flow(&self, id: &Uuid) -> Option<FlowDefinition>;

    fn list_flows(&self) -> Vec<FlowDefinition>;

    fn active_flows(&self) -> Vec<FlowDefinition>;

    fn upsert_flow(&self, flow: FlowDefinition);

    fn set_flow_status(&self, id: &Uuid, status: FlowStatus) -> EngineResult<()>;

    fn get_enrollment(&self, id: &Uuid) -> Option<Enrollment>;

    fn insert_enrollment(&self, enrollment: Enrollment);

    fn save_enrollment(&self, enrollment: Enrollment) -> EngineResult<()>;

    /// Active enrollments due at or before `now`, oldest due first, capped
    /// at `limit`.
    fn due_enrollments(&self, now: DateTime<Utc>, limit: usize) -> Vec<Enrollment>;

    fn active_enrollment(&self, flow_id: &Uuid, entity_id: &str) -> Option<Enrollment>;

    /// The most recently updated terminal enrollment for the pair, used for
    /// the re-entry cooldown check.
    fn latest_terminal_enrollment(&self, flow_id: &Uuid, entity_id: &str) -> Option<Enrollment>;

    fn enrollment_counts(&self, flow_id: &Uuid) -> EnrollmentCounts;

    /// Compare-and-swap claim: bumps the enrollment's version if it still
    /// equals `expected_version`. The loser of a race gets `false` and must
    /// skip the enrollment for this tick.
    fn claim(&self, id: &Uuid, expected_version: u64) -> bool;
}

/// Concurrent in-memory flow store.
#[derive(Default)]
pub struct MemoryFlowStore {
    flows: DashMap<Uuid, FlowDefinition>,
    enrollments: DashMap<Uuid, Enrollment>,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlowStore for MemoryFlowStore {
    fn get_flow(&self, id: &Uuid) -> Option<FlowDefinition> {
        self.flows.get(id).map(|f| f.clone())
    }

    fn list_flows(&self) -> Vec<FlowDefinition> {
        self.flows.iter().map(|f| f.value().clone()).collect()
    }

    fn active_flows(&self) -> Vec<FlowDefinition> {
        self.flows
            .iter()
            .filter(|f| f.value().status == FlowStatus::Active)
            .map(|f| f.value().clone())
            .collect()
    }

    fn upsert_flow(&self, flow: FlowDefinition) {
        self.flows.insert(flow.id, flow);
    }

    fn set_flow_status(&self, id: &Uuid, status: FlowStatus) -> EngineResult<()> {
        let mut entry = self
            .flows
            .get_mut(id)
            .ok_or_else(|| EngineError::Persistence(format!("unknown flow {id}")))?;
        entry.status = status;
        entry.updated_at = Utc::now();
        Ok(())
    }

    fn get_enrollment(&self, id: &Uuid) -> Option<Enrollment> {
        self.enrollments.get(id).map(|e| e.clone())
    }

    fn insert_enrollment(&self, enrollment: Enrollment) {
        self.enrollments.insert(enrollment.id, enrollment);
    }

    fn save_enrollment(&self, enrollment: Enrollment) -> EngineResult<()> {
        if !self.enrollments.contains_key(&enrollment.id) {
            return Err(EngineError::Persistence(format!(
                "unknown enrollment {}",
                enrollment.id
            )));
        }
        self.enrollments.insert(enrollment.id, enrollment);
        Ok(())
    }

    fn due_enrollments(&self, now: DateTime<Utc>, limit: usize) -> Vec<Enrollment> {
        let mut due: Vec<Enrollment> = self
            .enrollments
            .iter()
            .filter(|e| {
                e.value().status == EnrollmentStatus::Active
                    && e.value().next_process_at.is_some_and(|t| t <= now)
            })
            .map(|e| e.value().clone())
            .collect();
        due.sort_by_key(|e| e.next_process_at);
        due.truncate(limit);
        due
    }

    fn active_enrollment(&self, flow_id: &Uuid, entity_id: &str) -> Option<Enrollment> {
        self.enrollments
            .iter()
            .find(|e| {
                let e = e.value();
                e.flow_id == *flow_id
                    && e.entity_id == entity_id
                    && e.status == EnrollmentStatus::Active
            })
            .map(|e| e.value().clone())
    }

    fn latest_terminal_enrollment(&self, flow_id: &Uuid, entity_id: &str) -> Option<Enrollment> {
        self.enrollments
            .iter()
            .filter(|e| {
                let e = e.value();
                e.flow_id == *flow_id && e.entity_id == entity_id && e.is_terminal()
            })
            .map(|e| e.value().clone())
            .max_by_key(|e| e.updated_at)
    }

    fn enrollment_counts(&self, flow_id: &Uuid) -> EnrollmentCounts {
        let mut counts = EnrollmentCounts::default();
        for entry in self.enrollments.iter() {
            let e = entry.value();
            if e.flow_id != *flow_id {
                continue;
            }
            counts.total += 1;
            if e.status == EnrollmentStatus::Active {
                counts.active += 1;
            }
        }
        counts
    }

    fn claim(&self, id: &Uuid, expected_version: u64) -> bool {
        let Some(mut entry) = self.enrollments.get_mut(id) else {
            return false;
        };
        if entry.version != expected_version {
            debug!(enrollment_id = %id, "Claim lost, enrollment already taken");
            return false;
        }
        entry.version += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn enrollment(flow_id: Uuid, entity_id: &str) -> Enrollment {
        Enrollment::new(flow_id, entity_id, Uuid::new_v4())
    }

    #[test]
    fn test_due_query_filters_and_orders() {
        let store = MemoryFlowStore::new();
        let flow_id = Uuid::new_v4();
        let now = Utc::now();

        let mut due_late = enrollment(flow_id, "a");
        due_late.next_process_at = Some(now - Duration::minutes(1));
        let mut due_early = enrollment(flow_id, "b");
        due_early.next_process_at = Some(now - Duration::minutes(10));
        let mut future = enrollment(flow_id, "c");
        future.next_process_at = Some(now + Duration::minutes(5));
        let mut terminal = enrollment(flow_id, "d");
        terminal.next_process_at = Some(now - Duration::minutes(3));
        terminal.status = EnrollmentStatus::Completed;
        let unscheduled = enrollment(flow_id, "e");

        for e in [due_late, due_early, future, terminal, unscheduled] {
            store.insert_enrollment(e);
        }

        let due = store.due_enrollments(now, 10);
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].entity_id, "b");
        assert_eq!(due[1].entity_id, "a");

        assert_eq!(store.due_enrollments(now, 1).len(), 1);
    }

    #[test]
    fn test_claim_is_single_winner() {
        let store = MemoryFlowStore::new();
        let e = enrollment(Uuid::new_v4(), "a");
        let id = e.id;
        store.insert_enrollment(e);

        assert!(store.claim(&id, 0));
        // A second tick holding the same stale version loses.
        assert!(!store.claim(&id, 0));
        assert!(store.claim(&id, 1));
    }

    #[test]
    fn test_counts_and_lookups() {
        let store = MemoryFlowStore::new();
        let flow_id = Uuid::new_v4();

        let active = enrollment(flow_id, "a");
        let mut done = enrollment(flow_id, "a");
        done.status = EnrollmentStatus::Completed;
        store.insert_enrollment(active);
        store.insert_enrollment(done);

        let counts = store.enrollment_counts(&flow_id);
        assert_eq!(counts.total, 2);
        assert_eq!(counts.active, 1);

        assert!(store.active_enrollment(&flow_id, "a").is_some());
        assert!(store.latest_terminal_enrollment(&flow_id, "a").is_some());
        assert!(store.active_enrollment(&flow_id, "z").is_none());
    }
}
