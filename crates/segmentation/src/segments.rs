//! Segment definitions and the membership store contract.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use lifecycle_core::error::{EngineError, EngineResult};

use crate::filters::{FilterRule, SegmentLogic};

/// A named, filter-defined group of entities with materialized membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub filters: Vec<FilterRule>,
    pub logic: SegmentLogic,
    /// Exactly the set produced by the last full evaluation pass.
    pub member_ids: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    pub fn new(name: impl Into<String>, filters: Vec<FilterRule>, logic: SegmentLogic) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            filters,
            logic,
            member_ids: HashSet::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Segment persistence contract.
pub trait SegmentStore: Send + Sync {
    fn get(&self, id: &Uuid) -> Option<Segment>;

    fn list(&self) -> Vec<Segment>;

    fn upsert(&self, segment: Segment);

    /// Replaces the segment's membership with the given set. Membership is
    /// never patched incrementally.
    fn replace_membership(&self, id: &Uuid, member_ids: HashSet<String>) -> EngineResult<()>;
}

/// Concurrent in-memory segment store.
#[derive(Default)]
pub struct MemorySegmentStore {
    segments: DashMap<Uuid, Segment>,
}

impl MemorySegmentStore {
    pub fn new() -> Self {
        Self {
            segments: DashMap::new(),
        }
    }
}

impl SegmentStore for MemorySegmentStore {
    fn get(&self, id: &Uuid) -> Option<Segment> {
        self.segments.get(id).map(|s| s.clone())
    }

    fn list(&self) -> Vec<Segment> {
        self.segments.iter().map(|s| s.value().clone()).collect()
    }

    fn upsert(&self, segment: Segment) {
        self.segments.insert(segment.id, segment);
    }

    fn replace_membership(&self, id: &Uuid, member_ids: HashSet<String>) -> EngineResult<()> {
        let mut entry = self
            .segments
            .get_mut(id)
            .ok_or_else(|| EngineError::Persistence(format!("unknown segment {id}")))?;
        debug!(segment_id = %id, members = member_ids.len(), "Replacing segment membership");
        entry.member_ids = member_ids;
        entry.updated_at = Utc::now();
        Ok(())
    }
}
