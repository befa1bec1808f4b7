use std::sync::Arc;

use brood_contracts::intent::{select_mode, IntentDocument, ModeSelection, TransformationMode};
use serde_json::{json, Value};

use crate::config::MotherConfig;
use crate::correlator::{Channel, DispatchCorrelator};
use crate::diversifier::{RejectionMemory, Signatures};
use crate::phase::Phase;
use crate::recovery::RetryCounters;
use crate::timers::TimerScheduler;

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The last accepted proposal. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq)]
pub struct IntentSnapshot {
    pub document: IntentDocument,
    pub selection: ModeSelection,
    /// First mode of the selection that survived rejection memory.
    pub proposal_mode: TransformationMode,
    pub alternates: Vec<TransformationMode>,
    pub action_version: u64,
}

impl IntentSnapshot {
    pub fn accept(
        document: IntentDocument,
        default_mode: TransformationMode,
        rejections: &RejectionMemory,
        signature_keys: &[&str],
        action_version: u64,
    ) -> Self {
        let selection = select_mode(&document.mode_evidence(), default_mode);
        let ordered = rejections.diversify(&selection.ordered(), signature_keys);
        let (proposal_mode, alternates) = match ordered.split_first() {
            Some((first, rest)) => (*first, rest.to_vec()),
            None => (selection.primary, selection.alternates.clone()),
        };
        Self {
            document,
            selection,
            proposal_mode,
            alternates,
            action_version,
        }
    }
}

/// Owned exclusively by the orchestrator.
#[derive(Debug)]
pub(crate) struct Session {
    pub id: String,
    pub phase: Phase,
    pub intent: Option<Arc<IntentSnapshot>>,
    pub signatures: Option<Signatures>,
    pub inference: DispatchCorrelator,
    pub generation: DispatchCorrelator,
    pub inference_retries: RetryCounters,
    pub generation_retries: RetryCounters,
    pub rejections: RejectionMemory,
    pub timers: TimerScheduler,
    pub draft_artifact: Option<String>,
    /// Inference idle window elapsed before an intent was accepted.
    pub hypothesis_due: bool,
    /// Inference waits on missing labels.
    pub awaiting_labels: bool,
    pub follow_up_pending: bool,
    pub follow_up_cycle: bool,
    last_action_version: u64,
}

impl Session {
    pub fn new(id: impl Into<String>, config: &MotherConfig) -> Self {
        Self {
            id: id.into(),
            phase: Phase::Observing,
            intent: None,
            signatures: None,
            inference: DispatchCorrelator::new(
                Channel::Inference,
                config.ignored_id_limit,
                config.cancel_discard_grace(),
            ),
            generation: DispatchCorrelator::new(
                Channel::Generation,
                config.ignored_id_limit,
                config.cancel_discard_grace(),
            ),
            inference_retries: RetryCounters::new(config.max_transport_retries),
            generation_retries: RetryCounters::new(config.max_transport_retries),
            rejections: RejectionMemory::new(config.rejection_memory_per_key),
            timers: TimerScheduler::new(),
            draft_artifact: None,
            hypothesis_due: false,
            awaiting_labels: false,
            follow_up_pending: false,
            follow_up_cycle: false,
            last_action_version: 0,
        }
    }

    /// Shared across both channels so a version is never issued twice.
    pub fn next_action_version(&mut self) -> u64 {
        self.last_action_version += 1;
        self.last_action_version
    }

    pub fn correlator(&self, channel: Channel) -> &DispatchCorrelator {
        match channel {
            Channel::Inference => &self.inference,
            Channel::Generation => &self.generation,
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.id.clone(),
            phase: self.phase,
            realtime_visual: self.phase.shows_realtime_visual(),
            intent: self.intent.clone(),
            inference_version: self.inference.current().map(|record| record.action_version),
            generation_version: self.generation.current().map(|record| record.action_version),
            draft_artifact: self.draft_artifact.clone(),
            follow_up_pending: self.follow_up_pending,
        }
    }
}

/// Read-only copy of the session for display. Cloning never aliases live state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub session_id: String,
    pub phase: Phase,
    pub realtime_visual: bool,
    pub intent: Option<Arc<IntentSnapshot>>,
    pub inference_version: Option<u64>,
    pub generation_version: Option<u64>,
    pub draft_artifact: Option<String>,
    pub follow_up_pending: bool,
}

impl SessionView {
    pub fn proposal_mode(&self) -> Option<TransformationMode> {
        self.intent.as_ref().map(|intent| intent.proposal_mode)
    }

    pub fn alternates(&self) -> Vec<TransformationMode> {
        self.intent
            .as_ref()
            .map(|intent| intent.alternates.clone())
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "session_id": self.session_id,
            "phase": self.phase.as_str(),
            "realtime_visual": self.realtime_visual,
            "proposal_mode": self.proposal_mode().map(TransformationMode::as_str),
            "alternates": self
                .alternates()
                .into_iter()
                .map(TransformationMode::as_str)
                .collect::<Vec<&str>>(),
            "inference_version": self.inference_version,
            "generation_version": self.generation_version,
            "draft_artifact": self.draft_artifact,
            "follow_up_pending": self.follow_up_pending,
        })
    }
}
