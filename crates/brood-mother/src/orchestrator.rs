use std::sync::Arc;
use std::time::Duration;

use brood_contracts::events::EventWriter;
use brood_contracts::intent::{recover_intent_document, IntentDocument, ParseFailure};
use serde_json::{json, Value};

use crate::collaborators::{Collaborators, GenerationRequest, InferenceRequest};
use crate::config::MotherConfig;
use crate::correlator::{
    Channel, Correlation, DispatchCorrelator, DispatchRecord, ResultKey, TimeoutOutcome,
};
use crate::diversifier::{RejectionMemory, Signatures};
use crate::error::{error_chain_message, MotherError};
use crate::event::InboundEvent;
use crate::phase::{transition, Phase, Trigger};
use crate::placement::choose_placement;
use crate::prompt::PromptSpec;
use crate::recovery::{
    decide, decide_deferred, DeferWindow, RecoveryDecision, RetryCounters, TransportFailure,
};
use crate::session::{IntentSnapshot, Session, SessionView};
use crate::timers::{TimerTag, TimerToken};

/// What one inbound event did.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub before: Phase,
    pub after: Phase,
    /// Failure that was absorbed into a phase transition or a log line.
    pub absorbed: Option<MotherError>,
}

impl Step {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

/// Single-threaded proposal orchestrator. Owns the session; everything else talks to it
/// through [`Orchestrator::handle`].
pub struct Orchestrator {
    config: MotherConfig,
    collaborators: Collaborators,
    events: EventWriter,
    session: Session,
}

impl Orchestrator {
    pub fn new(config: MotherConfig, collaborators: Collaborators, events: EventWriter) -> Self {
        let session = Session::new(events.session_id(), &config);
        Self {
            config,
            collaborators,
            events,
            session,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    pub fn phase(&self) -> Phase {
        self.session.phase
    }

    pub fn config(&self) -> &MotherConfig {
        &self.config
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    /// Arms the first attract window.
    pub fn start(&mut self) {
        self.schedule(TimerTag::IdleAttract, self.config.attract_idle());
    }

    pub fn handle(&mut self, event: InboundEvent) -> Step {
        let before = self.session.phase;
        let absorbed = self.route(event);
        Step {
            before,
            after: self.session.phase,
            absorbed,
        }
    }

    pub fn view(&self) -> SessionView {
        self.session.view()
    }

    pub fn live_timers(&self) -> Vec<(TimerToken, TimerTag)> {
        self.session.timers.live()
    }

    pub fn current_dispatch(&self, channel: Channel) -> Option<DispatchRecord> {
        self.session.correlator(channel).current().cloned()
    }

    pub fn rejections(&self) -> &RejectionMemory {
        &self.session.rejections
    }

    pub fn signatures(&self) -> Option<&Signatures> {
        self.session.signatures.as_ref()
    }

    fn route(&mut self, event: InboundEvent) -> Option<MotherError> {
        match event {
            InboundEvent::UserInteraction => self.safety_valve(Trigger::UserInteraction),
            InboundEvent::Disqualify => self.safety_valve(Trigger::Disqualify),
            InboundEvent::Reset => self.safety_valve(Trigger::Reset),
            InboundEvent::TimerFired { token } => self.on_timer(token),
            InboundEvent::IdleWindowElapsed => self.on_idle_elapsed(),
            InboundEvent::CooldownDone => self.on_cooldown_done(),
            InboundEvent::IntentInferred {
                action_version,
                snapshot_path,
                text,
                partial,
            } => self.on_intent_inferred(action_version, snapshot_path.as_deref(), &text, partial),
            InboundEvent::IntentInferFailed {
                action_version,
                snapshot_path,
                error,
                retryable,
                fatal,
            } => {
                let failure = TransportFailure::new(error).with_flags(retryable, fatal);
                self.on_intent_failed(action_version, snapshot_path.as_deref(), failure)
            }
            InboundEvent::LabelsReady => self.on_labels_ready(),
            InboundEvent::Confirm => self.apply(Trigger::Confirm),
            InboundEvent::Reject => self.on_reject(),
            InboundEvent::Deploy => self.apply(Trigger::Deploy),
            InboundEvent::CommitDone => self.apply(Trigger::CommitDone),
            InboundEvent::GenerationAcknowledged {
                action_version,
                result_id,
            } => {
                let correlation = self
                    .session
                    .generation
                    .acknowledge(action_version, &result_id);
                self.ignore_result(Channel::Generation, action_version, correlation)
            }
            InboundEvent::GenerationResult {
                action_version,
                snapshot_path,
                artifact_ref,
                result_id,
            } => self.on_generation_result(
                action_version,
                snapshot_path.as_deref(),
                result_id.as_deref(),
                artifact_ref,
            ),
            InboundEvent::GenerationFailed {
                action_version,
                error,
                retryable,
                fatal,
            } => {
                let failure = TransportFailure::new(error).with_flags(retryable, fatal);
                self.on_generation_failed(action_version, failure)
            }
        }
    }

    // Phase plumbing

    fn apply(&mut self, trigger: Trigger) -> Option<MotherError> {
        let from = self.session.phase;
        let to = transition(from, trigger);
        if to == from {
            return None;
        }
        self.session.timers.cancel_where(TimerTag::is_phase_scoped);
        self.session.phase = to;
        self.emit_phase(from, to, trigger);
        match to {
            Phase::Observing => self.enter_observing(),
            Phase::Watching => self.enter_watching(),
            Phase::Hypothesizing => None,
            Phase::Drafting => self.dispatch_generation(true),
            Phase::Offering => {
                if let Some(artifact_ref) = self.session.draft_artifact.as_deref() {
                    self.collaborators.canvas.show_draft(artifact_ref);
                }
                None
            }
            Phase::Committing => self.commit(),
            Phase::Cooldown => self.enter_cooldown(from, trigger),
        }
    }

    /// Checked before everything else: drop whatever is in flight and start observing again.
    fn safety_valve(&mut self, trigger: Trigger) -> Option<MotherError> {
        let from = self.session.phase;
        let now = self.now();
        self.session.timers.cancel_all();
        let inference = self.session.inference.cancel(now);
        let generation = self.session.generation.cancel(now);
        let draft = self.session.draft_artifact.take();
        if matches!(from, Phase::Drafting | Phase::Offering) {
            if let Some(artifact_ref) = draft.as_deref() {
                self.collaborators.canvas.discard_artifact(artifact_ref);
            }
            self.collaborators.canvas.clear_draft();
        }
        self.session.intent = None;
        self.session.signatures = None;
        self.session.hypothesis_due = false;
        self.session.awaiting_labels = false;
        self.session.follow_up_pending = false;
        self.session.follow_up_cycle = false;

        let to = transition(from, trigger);
        self.session.phase = to;
        self.emit(
            "mother_phase",
            [
                ("from", json!(from.as_str())),
                ("to", json!(to.as_str())),
                ("trigger", json!(trigger.as_str())),
                ("cancelled_inference", json!(inference)),
                ("cancelled_generation", json!(generation)),
            ],
        );
        self.schedule(TimerTag::IdleAttract, self.config.attract_idle());
        None
    }

    fn enter_observing(&mut self) -> Option<MotherError> {
        if self.session.follow_up_pending {
            self.session.follow_up_pending = false;
            self.session.follow_up_cycle = true;
            return self.apply(Trigger::IdleElapsed);
        }
        self.session.follow_up_cycle = false;
        self.schedule(TimerTag::IdleAttract, self.config.attract_idle());
        None
    }

    fn enter_watching(&mut self) -> Option<MotherError> {
        self.session.intent = None;
        self.session.hypothesis_due = false;
        self.session.inference_retries.reset();
        self.schedule(TimerTag::IdleInference, self.config.inference_idle());
        self.request_inference()
    }

    fn enter_cooldown(&mut self, from: Phase, trigger: Trigger) -> Option<MotherError> {
        let now = self.now();
        self.session.inference.cancel(now);
        self.session.generation.cancel(now);
        self.session
            .timers
            .cancel_where(|tag| tag.is_inference() || tag.is_generation());
        let draft = self.session.draft_artifact.take();
        if trigger != Trigger::CommitDone {
            if let Some(artifact_ref) = draft.as_deref() {
                self.collaborators.canvas.discard_artifact(artifact_ref);
            }
            if matches!(from, Phase::Drafting | Phase::Offering | Phase::Committing) {
                self.collaborators.canvas.clear_draft();
            }
        }
        self.session.hypothesis_due = false;
        self.session.awaiting_labels = false;
        let cooldown = if trigger == Trigger::CommitDone {
            self.config.commit_cooldown()
        } else {
            self.config.reject_cooldown()
        };
        self.schedule(TimerTag::Cooldown, cooldown);
        None
    }

    /// Synthesized reject-equivalent. The cycle ends with "no proposal", never a raw error.
    fn fail_cycle(&mut self, err: MotherError) -> Option<MotherError> {
        self.apply(Trigger::Abort);
        Some(err)
    }

    // Timers

    fn on_timer(&mut self, token: TimerToken) -> Option<MotherError> {
        let Some(tag) = self.session.timers.take(token) else {
            self.emit("mother_timer_ignored", [("token", json!(token))]);
            return None;
        };
        match tag {
            TimerTag::IdleAttract | TimerTag::IdleInference => self.on_idle_elapsed(),
            TimerTag::Cooldown => self.on_cooldown_done(),
            TimerTag::InferenceDeadline(version) => self.on_deadline(Channel::Inference, version),
            TimerTag::GenerationDeadline(version) => {
                self.on_deadline(Channel::Generation, version)
            }
            TimerTag::InferenceRetry(version) => {
                if self.is_current(Channel::Inference, version) {
                    return self.request_inference();
                }
                self.emit_timer_ignored(token, tag);
                None
            }
            TimerTag::LabelWait => self.on_label_wait_elapsed(),
            TimerTag::GenerationRetry(version) => {
                if self.is_current(Channel::Generation, version)
                    && self.session.phase == Phase::Drafting
                {
                    return self.dispatch_generation(false);
                }
                self.emit_timer_ignored(token, tag);
                None
            }
        }
    }

    fn on_idle_elapsed(&mut self) -> Option<MotherError> {
        match self.session.phase {
            Phase::Observing => {
                self.session
                    .timers
                    .cancel_where(|tag| *tag == TimerTag::IdleAttract);
                self.apply(Trigger::IdleElapsed)
            }
            Phase::Watching => {
                self.session
                    .timers
                    .cancel_where(|tag| *tag == TimerTag::IdleInference);
                if self.session.intent.is_some() {
                    return self.apply(Trigger::IdleElapsed);
                }
                self.session.hypothesis_due = true;
                None
            }
            _ => None,
        }
    }

    fn on_cooldown_done(&mut self) -> Option<MotherError> {
        if self.session.phase != Phase::Cooldown {
            return None;
        }
        self.session
            .timers
            .cancel_where(|tag| *tag == TimerTag::Cooldown);
        self.apply(Trigger::CooldownDone)
    }

    fn on_deadline(&mut self, channel: Channel, version: u64) -> Option<MotherError> {
        let now = self.now();
        match self.correlator_mut(channel).on_timeout(version, now) {
            TimeoutOutcome::Extended(extra) => {
                self.emit(
                    "mother_timeout",
                    [
                        ("channel", json!(channel.as_str())),
                        ("action_version", json!(version)),
                        ("outcome", json!("extended")),
                        ("extension_ms", json!(duration_ms(extra))),
                    ],
                );
                self.schedule(deadline_tag(channel, version), extra);
                None
            }
            TimeoutOutcome::Expired => {
                self.emit(
                    "mother_timeout",
                    [
                        ("channel", json!(channel.as_str())),
                        ("action_version", json!(version)),
                        ("outcome", json!("expired")),
                    ],
                );
                self.cancel_channel_timers(channel);
                self.fail_cycle(MotherError::TimeoutExceeded { channel })
            }
            TimeoutOutcome::NotCurrent => {
                self.emit(
                    "mother_timer_ignored",
                    [
                        ("kind", json!(deadline_tag(channel, version).kind())),
                        ("action_version", json!(version)),
                        ("reason", json!("not_current")),
                    ],
                );
                None
            }
        }
    }

    // Inference

    fn request_inference(&mut self) -> Option<MotherError> {
        let images = self.collaborators.canvas.images();
        let missing: Vec<String> = images
            .iter()
            .filter(|image| !image.is_labeled())
            .map(|image| image.id.clone())
            .collect();
        if images.is_empty() || !missing.is_empty() {
            self.session.awaiting_labels = true;
            let label_error = if missing.is_empty() {
                None
            } else {
                self.collaborators
                    .canvas
                    .request_labels(&missing)
                    .err()
                    .map(|err| error_chain_message(&err))
            };
            self.emit(
                "mother_intent_deferred",
                [
                    ("image_count", json!(images.len())),
                    ("missing_labels", json!(missing)),
                    ("label_error", json!(label_error)),
                ],
            );
            if !self.session.timers.is_live(&TimerTag::LabelWait) {
                self.schedule(TimerTag::LabelWait, self.config.inference_timeout());
            }
            return None;
        }
        self.session.awaiting_labels = false;

        let version = self.session.next_action_version();
        let snapshot_name = format!("mother-intent-a{version}.png");
        let snapshot_path = match self.collaborators.canvas.capture_snapshot(&snapshot_name) {
            Ok(path) => path,
            Err(err) => {
                let failure = TransportFailure::from_error(&err).with_flags(None, Some(true));
                let decision = decide(&failure, &self.session.inference_retries);
                return self.recover(Channel::Inference, version, &failure, decision);
            }
        };

        self.session.signatures = Some(Signatures::from_images(&images));
        let now = self.now();
        self.session
            .inference
            .bind(version, Some(snapshot_path.clone()), now);
        self.session.inference.arm_timeout(
            self.config.inference_timeout(),
            Some(self.config.inference_extension()),
            now,
        );
        self.cancel_channel_timers(Channel::Inference);
        self.schedule(
            TimerTag::InferenceDeadline(version),
            self.config.inference_timeout(),
        );

        let image_ids: Vec<String> = images.iter().map(|image| image.id.clone()).collect();
        self.emit(
            "mother_intent_requested",
            [
                ("action_version", json!(version)),
                ("snapshot_path", json!(snapshot_path)),
                ("image_ids", json!(image_ids)),
                ("retry_count", json!(self.session.inference_retries.retry_count)),
            ],
        );
        let request = InferenceRequest {
            action_version: version,
            image_ids,
            snapshot_path,
        };
        if let Err(err) = self.collaborators.inference.request_intent(request) {
            return self.on_inference_failure(version, TransportFailure::from_error(&err), false);
        }
        None
    }

    /// Labels never showed up (or there is nothing on the canvas): give up on this cycle.
    fn on_label_wait_elapsed(&mut self) -> Option<MotherError> {
        if self.session.phase != Phase::Watching || !self.session.awaiting_labels {
            return None;
        }
        let image_count = self.collaborators.canvas.images().len();
        self.emit(
            "mother_intent_abandoned",
            [
                ("reason", json!("labels_unavailable")),
                ("image_count", json!(image_count)),
            ],
        );
        self.fail_cycle(MotherError::TimeoutExceeded {
            channel: Channel::Inference,
        })
    }

    fn on_labels_ready(&mut self) -> Option<MotherError> {
        if self.session.phase != Phase::Watching || !self.session.awaiting_labels {
            return None;
        }
        self.request_inference()
    }

    fn on_intent_inferred(
        &mut self,
        version: u64,
        snapshot_path: Option<&str>,
        text: &str,
        partial: bool,
    ) -> Option<MotherError> {
        let now = self.now();
        let key = ResultKey::version(version).with_path(snapshot_path);
        match self.session.inference.peek(key, now) {
            Correlation::Accepted => {}
            Correlation::DiscardAfterCancel => {
                if !partial {
                    self.session.inference.observe(key, now);
                    self.emit_discarded(Channel::Inference, version, None);
                }
                return None;
            }
            // Deltas of a request that is no longer current are expected noise.
            _ if partial => return None,
            correlation => return self.ignore_result(Channel::Inference, version, correlation),
        }

        match recover_intent_document(text) {
            Ok(document) => {
                self.session.inference.observe(key, now);
                self.cancel_channel_timers(Channel::Inference);
                self.accept_intent(document, version, partial)
            }
            Err(_) if partial => None,
            Err(err) => {
                self.emit(
                    "mother_intent_payload_invalid",
                    [
                        ("action_version", json!(version)),
                        ("reason", json!(err.reason.as_str())),
                        ("first_error", json!(err.first_error)),
                    ],
                );
                let absorbed = MotherError::ParseFailure(err.reason);
                if err.reason == ParseFailure::TruncatedJson {
                    let failure = TransportFailure::new("truncated model output")
                        .with_flags(Some(true), None);
                    return self
                        .on_inference_failure(version, failure, false)
                        .or(Some(absorbed));
                }
                self.session.inference.abandon();
                self.cancel_channel_timers(Channel::Inference);
                self.fail_cycle(absorbed)
            }
        }
    }

    fn on_intent_failed(
        &mut self,
        version: u64,
        snapshot_path: Option<&str>,
        failure: TransportFailure,
    ) -> Option<MotherError> {
        let now = self.now();
        let key = ResultKey::version(version).with_path(snapshot_path);
        match self.session.inference.peek(key, now) {
            Correlation::Accepted => self.on_inference_failure(version, failure, true),
            Correlation::DiscardAfterCancel => {
                self.session.inference.observe(key, now);
                None
            }
            correlation => self.ignore_result(Channel::Inference, version, correlation),
        }
    }

    fn on_inference_failure(
        &mut self,
        version: u64,
        failure: TransportFailure,
        worker_may_recover: bool,
    ) -> Option<MotherError> {
        let counters = self.session.inference_retries;
        if !worker_may_recover {
            return self.recover(Channel::Inference, version, &failure, decide(&failure, &counters));
        }
        let now = self.now();
        let dispatched_at = self
            .session
            .inference
            .current()
            .map(|record| record.dispatched_at_ms)
            .unwrap_or(now);
        let window = DeferWindow {
            elapsed: Duration::from_millis(now.saturating_sub(dispatched_at)),
            worker_timeout_floor: self.config.worker_timeout_floor(),
            grace: self.config.worker_grace(),
        };
        let decision = decide_deferred(&failure, &counters, window);
        if let RecoveryDecision::DeferRetry(extra) = decision {
            if self.session.inference.extend(version, extra, now) {
                self.session
                    .timers
                    .cancel_where(|tag| *tag == TimerTag::InferenceDeadline(version));
                self.schedule(TimerTag::InferenceDeadline(version), extra);
                self.emit_recovery(Channel::Inference, version, &decision, &failure);
                return None;
            }
            // Extension already spent on this request.
            return self.recover(Channel::Inference, version, &failure, RecoveryDecision::Retry);
        }
        self.recover(Channel::Inference, version, &failure, decision)
    }

    fn accept_intent(
        &mut self,
        document: IntentDocument,
        version: u64,
        partial: bool,
    ) -> Option<MotherError> {
        let keys: Vec<&str> = self
            .session
            .signatures
            .as_ref()
            .map(Signatures::keys)
            .unwrap_or_default();
        let snapshot = IntentSnapshot::accept(
            document,
            self.config.default_mode,
            &self.session.rejections,
            &keys,
            version,
        );
        self.emit(
            "mother_intent_accepted",
            [
                ("action_version", json!(version)),
                ("mode", json!(snapshot.proposal_mode.as_str())),
                ("selected", json!(snapshot.selection.primary.as_str())),
                (
                    "alternates",
                    json!(snapshot
                        .alternates
                        .iter()
                        .map(|mode| mode.as_str())
                        .collect::<Vec<&str>>()),
                ),
                ("partial", json!(partial)),
            ],
        );
        self.session.intent = Some(Arc::new(snapshot));
        if self.session.hypothesis_due && self.session.phase == Phase::Watching {
            self.session.hypothesis_due = false;
            return self.apply(Trigger::IdleElapsed);
        }
        None
    }

    // Generation

    fn dispatch_generation(&mut self, fresh: bool) -> Option<MotherError> {
        let Some(intent) = self.session.intent.clone() else {
            return self.unarmed("no accepted intent".to_string());
        };
        if fresh {
            self.session.generation_retries.reset();
            self.collaborators
                .canvas
                .prime_draft(intent.proposal_mode.as_str());
        }
        if let Err(err) = self.collaborators.generation.prepare() {
            return self.unarmed(format!(
                "generation runtime unavailable: {}",
                error_chain_message(&err)
            ));
        }

        let version = self.session.next_action_version();
        let snapshot_name = format!("mother-draft-a{version}.png");
        let snapshot_path = match self.collaborators.canvas.capture_snapshot(&snapshot_name) {
            Ok(path) => path,
            Err(err) => {
                return self.unarmed(format!(
                    "draft snapshot failed: {}",
                    error_chain_message(&err)
                ))
            }
        };
        let images = self.collaborators.canvas.images();
        let keys: Vec<&str> = self
            .session
            .signatures
            .as_ref()
            .map(Signatures::keys)
            .unwrap_or_default();
        let avoid = self.session.rejections.rejected_union(&keys);
        let prompt = PromptSpec::compose(&intent, &images, avoid);

        let now = self.now();
        self.session
            .generation
            .bind(version, Some(snapshot_path.clone()), now);
        self.session.generation.arm_timeout(
            self.config.generation_timeout(),
            Some(self.config.generation_extension()),
            now,
        );
        self.cancel_channel_timers(Channel::Generation);
        self.schedule(
            TimerTag::GenerationDeadline(version),
            self.config.generation_timeout(),
        );

        let mode = prompt.mode;
        let request = GenerationRequest {
            action_version: version,
            snapshot_path: snapshot_path.clone(),
            prompt,
        };
        if let Err(err) = self.collaborators.generation.request_generation(request) {
            self.session.generation.abandon();
            self.cancel_channel_timers(Channel::Generation);
            return self.unarmed(format!(
                "generation request failed: {}",
                error_chain_message(&err)
            ));
        }
        self.emit(
            "mother_dispatch",
            [
                ("action_version", json!(version)),
                ("mode", json!(mode.as_str())),
                ("snapshot_path", json!(snapshot_path)),
                (
                    "retry_count",
                    json!(self.session.generation_retries.retry_count),
                ),
            ],
        );
        None
    }

    /// Drafting could not be armed: undo the optimistic priming and end the cycle now.
    fn unarmed(&mut self, reason: String) -> Option<MotherError> {
        self.emit("mother_dispatch_unarmed", [("reason", json!(reason))]);
        self.collaborators.canvas.clear_draft();
        self.fail_cycle(MotherError::DispatchUnarmed(reason))
    }

    fn on_generation_result(
        &mut self,
        version: u64,
        snapshot_path: Option<&str>,
        result_id: Option<&str>,
        artifact_ref: String,
    ) -> Option<MotherError> {
        let now = self.now();
        let key = ResultKey::version(version)
            .with_path(snapshot_path)
            .with_result_id(result_id);
        match self.session.generation.observe(key, now) {
            Correlation::Accepted => {
                self.cancel_channel_timers(Channel::Generation);
                self.session.draft_artifact = Some(artifact_ref);
                self.apply(Trigger::DraftReady)
            }
            Correlation::DiscardAfterCancel => {
                self.collaborators.canvas.discard_artifact(&artifact_ref);
                self.emit_discarded(Channel::Generation, version, Some(&artifact_ref));
                None
            }
            correlation => self.ignore_result(Channel::Generation, version, correlation),
        }
    }

    fn on_generation_failed(
        &mut self,
        version: u64,
        failure: TransportFailure,
    ) -> Option<MotherError> {
        let now = self.now();
        let key = ResultKey::version(version);
        match self.session.generation.peek(key, now) {
            Correlation::Accepted => {
                let decision = decide(&failure, &self.session.generation_retries);
                self.recover(Channel::Generation, version, &failure, decision)
            }
            Correlation::DiscardAfterCancel => {
                self.session.generation.observe(key, now);
                None
            }
            correlation => self.ignore_result(Channel::Generation, version, correlation),
        }
    }

    fn commit(&mut self) -> Option<MotherError> {
        let Some(artifact_ref) = self.session.draft_artifact.clone() else {
            return self.fail_cycle(MotherError::CommitFailed("no draft artifact".to_string()));
        };
        let images = self.collaborators.canvas.images();
        let placement = choose_placement(&images, self.collaborators.canvas.canvas_bounds());
        self.emit(
            "mother_commit",
            [
                ("artifact_ref", json!(artifact_ref)),
                ("policy", json!(placement.policy())),
                (
                    "placement",
                    serde_json::to_value(&placement).unwrap_or(Value::Null),
                ),
            ],
        );
        if let Err(err) = self.collaborators.canvas.commit(&artifact_ref, &placement) {
            return self.fail_cycle(MotherError::CommitFailed(error_chain_message(&err)));
        }
        None
    }

    // Rejection

    fn on_reject(&mut self) -> Option<MotherError> {
        let phase = self.session.phase;
        if !matches!(
            phase,
            Phase::Hypothesizing | Phase::Drafting | Phase::Offering
        ) {
            return None;
        }
        if matches!(phase, Phase::Hypothesizing | Phase::Offering) {
            let recorded = match (
                self.session.intent.as_ref(),
                self.session.signatures.as_ref(),
            ) {
                (Some(intent), Some(signatures)) => Some((
                    intent.proposal_mode,
                    self.session
                        .rejections
                        .remember(signatures, intent.proposal_mode),
                )),
                _ => None,
            };
            if let Some((mode, keys)) = recorded {
                self.emit(
                    "mother_rejection_recorded",
                    [
                        ("mode", json!(mode.as_str())),
                        ("signatures", json!(keys)),
                        ("phase", json!(phase.as_str())),
                    ],
                );
            }
            if self.config.follow_up_after_reject
                && !self.session.follow_up_cycle
                && !self.session.follow_up_pending
            {
                self.session.follow_up_pending = true;
                self.emit("mother_follow_up_queued", [("phase", json!(phase.as_str()))]);
            }
        }
        self.apply(Trigger::Reject)
    }

    // Recovery

    fn recover(
        &mut self,
        channel: Channel,
        version: u64,
        failure: &TransportFailure,
        decision: RecoveryDecision,
    ) -> Option<MotherError> {
        match decision {
            RecoveryDecision::Retry | RecoveryDecision::DeferRetry(_) => {
                let counters = self.counters_mut(channel);
                counters.record_retry();
                let attempt = counters.retry_count;
                self.emit_recovery(channel, version, &RecoveryDecision::Retry, failure);
                self.cancel_channel_timers(channel);
                self.schedule(retry_tag(channel, version), self.config.retry_backoff(attempt));
                None
            }
            RecoveryDecision::Fail(reason) => {
                self.emit_recovery(channel, version, &decision, failure);
                self.correlator_mut(channel).abandon();
                self.cancel_channel_timers(channel);
                self.fail_cycle(MotherError::TransportFailure { channel, reason })
            }
        }
    }

    fn ignore_result(
        &mut self,
        channel: Channel,
        version: u64,
        correlation: Correlation,
    ) -> Option<MotherError> {
        let kind = correlation.mismatch()?;
        self.emit(
            "mother_result_ignored",
            [
                ("channel", json!(channel.as_str())),
                ("reason", json!(kind.as_str())),
                ("action_version", json!(version)),
            ],
        );
        Some(MotherError::CorrelationMismatch { channel, kind })
    }

    // Helpers

    fn now(&self) -> u64 {
        self.collaborators.clock.now_ms()
    }

    fn schedule(&mut self, tag: TimerTag, delay: Duration) -> TimerToken {
        let token = self.session.timers.schedule(tag);
        self.collaborators.timers.schedule(token, delay);
        token
    }

    fn cancel_channel_timers(&mut self, channel: Channel) {
        self.session.timers.cancel_where(|tag| match channel {
            Channel::Inference => tag.is_inference(),
            Channel::Generation => tag.is_generation(),
        });
    }

    fn is_current(&self, channel: Channel, version: u64) -> bool {
        self.session
            .correlator(channel)
            .current()
            .map(|record| record.action_version == version)
            .unwrap_or(false)
    }

    fn correlator_mut(&mut self, channel: Channel) -> &mut DispatchCorrelator {
        match channel {
            Channel::Inference => &mut self.session.inference,
            Channel::Generation => &mut self.session.generation,
        }
    }

    fn counters(&self, channel: Channel) -> &RetryCounters {
        match channel {
            Channel::Inference => &self.session.inference_retries,
            Channel::Generation => &self.session.generation_retries,
        }
    }

    fn counters_mut(&mut self, channel: Channel) -> &mut RetryCounters {
        match channel {
            Channel::Inference => &mut self.session.inference_retries,
            Channel::Generation => &mut self.session.generation_retries,
        }
    }

    fn emit<'a, I>(&self, event_type: &str, fields: I)
    where
        I: IntoIterator<Item = (&'a str, Value)>,
    {
        let _ = self.events.emit_fields(event_type, fields);
    }

    fn emit_phase(&self, from: Phase, to: Phase, trigger: Trigger) {
        self.emit(
            "mother_phase",
            [
                ("from", json!(from.as_str())),
                ("to", json!(to.as_str())),
                ("trigger", json!(trigger.as_str())),
                ("realtime_visual", json!(to.shows_realtime_visual())),
            ],
        );
    }

    fn emit_recovery(
        &self,
        channel: Channel,
        version: u64,
        decision: &RecoveryDecision,
        failure: &TransportFailure,
    ) {
        let extra_ms = match decision {
            RecoveryDecision::DeferRetry(extra) => Some(duration_ms(*extra)),
            _ => None,
        };
        self.emit(
            "mother_recovery",
            [
                ("channel", json!(channel.as_str())),
                ("action_version", json!(version)),
                ("decision", json!(decision.label())),
                ("defer_ms", json!(extra_ms)),
                ("retry_count", json!(self.counters(channel).retry_count)),
                ("error", json!(failure.message)),
            ],
        );
    }

    fn emit_discarded(&self, channel: Channel, version: u64, artifact_ref: Option<&str>) {
        self.emit(
            "mother_result_discarded",
            [
                ("channel", json!(channel.as_str())),
                ("action_version", json!(version)),
                ("artifact_ref", json!(artifact_ref)),
            ],
        );
    }

    fn emit_timer_ignored(&self, token: TimerToken, tag: TimerTag) {
        self.emit(
            "mother_timer_ignored",
            [
                ("token", json!(token)),
                ("kind", json!(tag.kind())),
                ("reason", json!("not_current")),
            ],
        );
    }
}

fn deadline_tag(channel: Channel, version: u64) -> TimerTag {
    match channel {
        Channel::Inference => TimerTag::InferenceDeadline(version),
        Channel::Generation => TimerTag::GenerationDeadline(version),
    }
}

fn retry_tag(channel: Channel, version: u64) -> TimerTag {
    match channel {
        Channel::Inference => TimerTag::InferenceRetry(version),
        Channel::Generation => TimerTag::GenerationRetry(version),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
