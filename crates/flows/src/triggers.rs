//! Trigger matching — decides whether a pipeline evaluation enrolls an
//! entity into a flow.

use uuid::Uuid;

use lifecycle_core::types::LifecycleState;

use crate::types::TriggerConfig;

/// What happened to an entity during one pipeline evaluation, as seen by
/// flow triggers.
#[derive(Debug, Clone)]
pub struct TriggerContext {
    pub entity_id: String,
    pub event_name: Option<String>,
    pub transitioned: bool,
    pub from_state: Option<LifecycleState>,
    pub to_state: LifecycleState,
    pub entered_segments: Vec<Uuid>,
}

impl TriggerContext {
    /// A context carrying only a classification result, no deltas.
    pub fn quiet(entity_id: impl Into<String>, state: LifecycleState) -> Self {
        Self {
            entity_id: entity_id.into(),
            event_name: None,
            transitioned: false,
            from_state: None,
            to_state: state,
            entered_segments: Vec::new(),
        }
    }
}

/// Returns `true` when the trigger's configured condition matches the
/// context.
pub fn trigger_matches(config: &TriggerConfig, ctx: &TriggerContext) -> bool {
    match config {
        TriggerConfig::LifecycleChange { to_state } => {
            ctx.transitioned && to_state.map_or(true, |target| target == ctx.to_state)
        }
        TriggerConfig::SegmentEntered { segment_id } => {
            ctx.entered_segments.contains(segment_id)
        }
        TriggerConfig::EventNamed { event_name } => {
            ctx.event_name.as_deref() == Some(event_name.as_str())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_change_matching() {
        let mut ctx = TriggerContext::quiet("e-1", LifecycleState::AtRisk);
        let any_change = TriggerConfig::LifecycleChange { to_state: None };
        let to_at_risk = TriggerConfig::LifecycleChange {
            to_state: Some(LifecycleState::AtRisk),
        };
        let to_churned = TriggerConfig::LifecycleChange {
            to_state: Some(LifecycleState::Churned),
        };

        // No transition: nothing fires.
        assert!(!trigger_matches(&any_change, &ctx));

        ctx.transitioned = true;
        ctx.from_state = Some(LifecycleState::Activated);
        assert!(trigger_matches(&any_change, &ctx));
        assert!(trigger_matches(&to_at_risk, &ctx));
        assert!(!trigger_matches(&to_churned, &ctx));
    }

    #[test]
    fn test_segment_entry_matching() {
        let segment_id = Uuid::new_v4();
        let trigger = TriggerConfig::SegmentEntered { segment_id };
        let mut ctx = TriggerContext::quiet("e-1", LifecycleState::Activated);

        assert!(!trigger_matches(&trigger, &ctx));
        ctx.entered_segments.push(segment_id);
        assert!(trigger_matches(&trigger, &ctx));
    }

    #[test]
    fn test_named_event_matching() {
        let trigger = TriggerConfig::EventNamed {
            event_name: "trial_started".into(),
        };
        let mut ctx = TriggerContext::quiet("e-1", LifecycleState::Trial);
        ctx.event_name = Some("trial_started".into());
        assert!(trigger_matches(&trigger, &ctx));

        ctx.event_name = Some("other".into());
        assert!(!trigger_matches(&trigger, &ctx));
    }
}
