use serde::{Deserialize, Serialize};

use crate::timers::TimerToken;

/// Everything the orchestrator can be told. Producers deliver these through one ordered queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    TimerFired {
        token: TimerToken,
    },
    /// Host-driven idle window, for embedders that run their own idle detection.
    IdleWindowElapsed,
    /// Host-driven end of cooldown.
    CooldownDone,
    IntentInferred {
        action_version: u64,
        #[serde(default)]
        snapshot_path: Option<String>,
        text: String,
        #[serde(default)]
        partial: bool,
    },
    IntentInferFailed {
        action_version: u64,
        #[serde(default)]
        snapshot_path: Option<String>,
        error: String,
        #[serde(default)]
        retryable: Option<bool>,
        #[serde(default)]
        fatal: Option<bool>,
    },
    LabelsReady,
    Confirm,
    Reject,
    Deploy,
    CommitDone,
    UserInteraction,
    Disqualify,
    Reset,
    GenerationAcknowledged {
        action_version: u64,
        result_id: String,
    },
    GenerationResult {
        action_version: u64,
        #[serde(default)]
        snapshot_path: Option<String>,
        artifact_ref: String,
        #[serde(default)]
        result_id: Option<String>,
    },
    GenerationFailed {
        action_version: u64,
        error: String,
        #[serde(default)]
        retryable: Option<bool>,
        #[serde(default)]
        fatal: Option<bool>,
    },
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TimerFired { .. } => "timer_fired",
            Self::IdleWindowElapsed => "idle_window_elapsed",
            Self::CooldownDone => "cooldown_done",
            Self::IntentInferred { .. } => "intent_inferred",
            Self::IntentInferFailed { .. } => "intent_infer_failed",
            Self::LabelsReady => "labels_ready",
            Self::Confirm => "confirm",
            Self::Reject => "reject",
            Self::Deploy => "deploy",
            Self::CommitDone => "commit_done",
            Self::UserInteraction => "user_interaction",
            Self::Disqualify => "disqualify",
            Self::Reset => "reset",
            Self::GenerationAcknowledged { .. } => "generation_acknowledged",
            Self::GenerationResult { .. } => "generation_result",
            Self::GenerationFailed { .. } => "generation_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::InboundEvent;
    use crate::timers::TimerToken;

    #[test]
    fn wire_form_is_tagged_by_type() -> anyhow::Result<()> {
        let event: InboundEvent = serde_json::from_value(json!({
            "type": "generation_result",
            "action_version": 3,
            "artifact_ref": "artifact-3.png",
        }))?;
        assert_eq!(
            event,
            InboundEvent::GenerationResult {
                action_version: 3,
                snapshot_path: None,
                artifact_ref: "artifact-3.png".into(),
                result_id: None,
            }
        );
        assert_eq!(event.name(), "generation_result");

        let fired: InboundEvent = serde_json::from_value(json!({"type": "timer_fired", "token": 9}))?;
        assert_eq!(fired, InboundEvent::TimerFired { token: TimerToken(9) });

        let reset = serde_json::to_value(InboundEvent::Reset)?;
        assert_eq!(reset, json!({"type": "reset"}));
        Ok(())
    }

    #[test]
    fn unknown_event_types_are_rejected_at_the_boundary() {
        let parsed = serde_json::from_value::<InboundEvent>(json!({"type": "teleport"}));
        assert!(parsed.is_err());
    }
}
