//! Activity log contract — append-only audit trail of engine decisions.
//!
//! Modules accept an `Arc<dyn ActivitySink>` and append entries as they
//! classify, enroll, and notify; the persistence collaborator owns durable
//! storage.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use crate::types::ActivityEntry;

/// Trait for appending audit entries. Implementations write to the durable
/// activity log; the in-memory variants back tests and the demo binary.
pub trait ActivitySink: Send + Sync {
    fn append(&self, entry: ActivityEntry);
}

/// No-op sink for modules that don't need an audit trail.
pub struct NoopActivitySink;

impl ActivitySink for NoopActivitySink {
    fn append(&self, _entry: ActivityEntry) {}
}

/// In-memory log that captures entries for inspection.
#[derive(Default)]
pub struct MemoryActivityLog {
    entries: Mutex<Vec<ActivityEntry>>,
}

impl MemoryActivityLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.entries.lock().expect("activity log mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.entries.lock().expect("activity log mutex poisoned").len()
    }

    pub fn count_stage(&self, stage: &str) -> usize {
        self.entries
            .lock()
            .expect("activity log mutex poisoned")
            .iter()
            .filter(|e| e.stage == stage)
            .count()
    }
}

impl ActivitySink for MemoryActivityLog {
    fn append(&self, entry: ActivityEntry) {
        self.entries.lock().expect("activity log mutex poisoned").push(entry);
    }
}

/// Convenience builder for an [`ActivityEntry`] stamped now.
pub fn make_activity(
    entity_id: impl Into<String>,
    stage: impl Into<String>,
    description: impl Into<String>,
) -> ActivityEntry {
    ActivityEntry {
        id: Uuid::new_v4(),
        entity_id: entity_id.into(),
        stage: stage.into(),
        description: description.into(),
        timestamp: Utc::now(),
    }
}

/// Convenience: a no-op sink for modules that don't log activity.
pub fn noop_activity() -> Arc<dyn ActivitySink> {
    Arc::new(NoopActivitySink)
}

/// Convenience: a capturing log for tests.
pub fn capture_activity() -> Arc<MemoryActivityLog> {
    Arc::new(MemoryActivityLog::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_log() {
        let log = capture_activity();
        assert_eq!(log.count(), 0);

        log.append(make_activity("e-1", "classify", "Lead -> Trial"));
        log.append(make_activity("e-1", "segments", "entered segment power-users"));

        assert_eq!(log.count(), 2);
        assert_eq!(log.count_stage("classify"), 1);
        assert_eq!(log.entries()[0].entity_id, "e-1");
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_activity();
        // Should not panic
        sink.append(make_activity("e-1", "classify", "noop"));
    }
}
