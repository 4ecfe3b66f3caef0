//! Engine event contract — how flow actions and the pipeline hand
//! notification-worthy events to the webhook layer without depending on it.

use std::sync::{Arc, Mutex};

/// Event types the engine emits toward webhook subscribers.
pub mod event_types {
    pub const LIFECYCLE_CHANGED: &str = "lifecycle.changed";
    pub const RISK_CHANGED: &str = "risk.changed";
    pub const SEGMENT_ENTERED: &str = "segment.entered";
    pub const SEGMENT_EXITED: &str = "segment.exited";
    pub const ENROLLMENT_COMPLETED: &str = "enrollment.completed";
}

/// Trait for emitting outbound engine events. The webhook dispatcher is the
/// production implementation; emission must never block or fail the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, event_type: &str, payload: serde_json::Value);
}

/// No-op sink for modules that don't emit events.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event_type: &str, _payload: serde_json::Value) {}
}

/// In-memory sink that captures emitted events for testing.
#[derive(Default)]
pub struct CaptureEventSink {
    events: Mutex<Vec<(String, serde_json::Value)>>,
}

impl CaptureEventSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<(String, serde_json::Value)> {
        self.events.lock().expect("event sink mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event sink mutex poisoned").len()
    }

    pub fn count_type(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .expect("event sink mutex poisoned")
            .iter()
            .filter(|(t, _)| t == event_type)
            .count()
    }
}

impl EventSink for CaptureEventSink {
    fn emit(&self, event_type: &str, payload: serde_json::Value) {
        self.events
            .lock()
            .expect("event sink mutex poisoned")
            .push((event_type.to_string(), payload));
    }
}

/// Convenience: a no-op event sink.
pub fn noop_events() -> Arc<dyn EventSink> {
    Arc::new(NoopEventSink)
}

/// Convenience: a capturing event sink for tests.
pub fn capture_events() -> Arc<CaptureEventSink> {
    Arc::new(CaptureEventSink::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_events() {
        let sink = capture_events();
        sink.emit(
            event_types::LIFECYCLE_CHANGED,
            serde_json::json!({"entity_id": "e-1"}),
        );
        sink.emit(event_types::RISK_CHANGED, serde_json::json!({"score": 72}));

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_type(event_types::LIFECYCLE_CHANGED), 1);
    }
}
