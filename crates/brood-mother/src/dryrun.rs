//! In-process collaborators that record every outbound call instead of performing it.
//!
//! Used by the scenario tests and by `brood-mother replay`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::collaborators::{
    CanvasImage, CanvasSurface, Clock, Collaborators, GenerationProvider, GenerationRequest,
    InferenceRequest, IntentInference, TimerSource,
};
use crate::placement::{Placement, Rect};
use crate::timers::TimerToken;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum Outbound {
    CaptureSnapshot { name: String, path: String },
    RequestLabels { image_ids: Vec<String> },
    PrimeDraft { mode: String },
    ClearDraft,
    ShowDraft { artifact_ref: String },
    DiscardArtifact { artifact_ref: String },
    Commit {
        artifact_ref: String,
        placement: Placement,
    },
    RequestIntent(InferenceRequest),
    PrepareGeneration,
    RequestGeneration(GenerationRequest),
    ScheduleTimer { token: TimerToken, delay_ms: u64 },
}

#[derive(Debug, Clone, Default)]
pub struct OutboundLog {
    calls: Arc<Mutex<Vec<Outbound>>>,
}

impl OutboundLog {
    pub fn push(&self, call: Outbound) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    pub fn calls(&self) -> Vec<Outbound> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn intent_requests(&self) -> Vec<InferenceRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Outbound::RequestIntent(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn generation_requests(&self) -> Vec<GenerationRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Outbound::RequestGeneration(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn scheduled(&self) -> Vec<(TimerToken, u64)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Outbound::ScheduleTimer { token, delay_ms } => Some((token, delay_ms)),
                _ => None,
            })
            .collect()
    }
}

pub struct DryrunCanvas {
    log: OutboundLog,
    images: Arc<Mutex<Vec<CanvasImage>>>,
    bounds: Rect,
    snapshot_dir: String,
    commit_available: bool,
}

impl CanvasSurface for DryrunCanvas {
    fn images(&self) -> Vec<CanvasImage> {
        self.images
            .lock()
            .map(|images| images.clone())
            .unwrap_or_default()
    }

    fn canvas_bounds(&self) -> Rect {
        self.bounds
    }

    fn capture_snapshot(&mut self, name: &str) -> anyhow::Result<String> {
        let path = format!("{}/{name}", self.snapshot_dir.trim_end_matches('/'));
        self.log.push(Outbound::CaptureSnapshot {
            name: name.to_string(),
            path: path.clone(),
        });
        Ok(path)
    }

    fn request_labels(&mut self, image_ids: &[String]) -> anyhow::Result<()> {
        self.log.push(Outbound::RequestLabels {
            image_ids: image_ids.to_vec(),
        });
        Ok(())
    }

    fn prime_draft(&mut self, proposal_mode: &str) {
        self.log.push(Outbound::PrimeDraft {
            mode: proposal_mode.to_string(),
        });
    }

    fn clear_draft(&mut self) {
        self.log.push(Outbound::ClearDraft);
    }

    fn show_draft(&mut self, artifact_ref: &str) {
        self.log.push(Outbound::ShowDraft {
            artifact_ref: artifact_ref.to_string(),
        });
    }

    fn discard_artifact(&mut self, artifact_ref: &str) {
        self.log.push(Outbound::DiscardArtifact {
            artifact_ref: artifact_ref.to_string(),
        });
    }

    fn commit(&mut self, artifact_ref: &str, placement: &Placement) -> anyhow::Result<()> {
        if !self.commit_available {
            anyhow::bail!("dryrun canvas rejected commit of {artifact_ref}");
        }
        self.log.push(Outbound::Commit {
            artifact_ref: artifact_ref.to_string(),
            placement: placement.clone(),
        });
        Ok(())
    }
}

pub struct DryrunInference {
    log: OutboundLog,
}

impl IntentInference for DryrunInference {
    fn request_intent(&mut self, request: InferenceRequest) -> anyhow::Result<()> {
        self.log.push(Outbound::RequestIntent(request));
        Ok(())
    }
}

pub struct DryrunGeneration {
    log: OutboundLog,
    runtime_available: bool,
}

impl GenerationProvider for DryrunGeneration {
    fn prepare(&mut self) -> anyhow::Result<()> {
        if !self.runtime_available {
            anyhow::bail!("dryrun runtime unavailable");
        }
        self.log.push(Outbound::PrepareGeneration);
        Ok(())
    }

    fn request_generation(&mut self, request: GenerationRequest) -> anyhow::Result<()> {
        self.log.push(Outbound::RequestGeneration(request));
        Ok(())
    }
}

/// Records wake-ups; the driver decides when they fire.
pub struct ManualTimers {
    log: OutboundLog,
}

impl TimerSource for ManualTimers {
    fn schedule(&mut self, token: TimerToken, delay: Duration) {
        self.log.push(Outbound::ScheduleTimer {
            token,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        });
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn advance(&self, ms: u64) -> u64 {
        self.now_ms.fetch_add(ms, Ordering::SeqCst) + ms
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Shared state behind one set of dry-run collaborators.
#[derive(Debug, Clone)]
pub struct DryrunHost {
    pub log: OutboundLog,
    pub clock: ManualClock,
    pub images: Arc<Mutex<Vec<CanvasImage>>>,
    pub canvas_bounds: Rect,
    pub snapshot_dir: String,
    pub runtime_available: bool,
    pub commit_available: bool,
}

impl DryrunHost {
    pub fn new(images: Vec<CanvasImage>) -> Self {
        Self {
            log: OutboundLog::default(),
            clock: ManualClock::default(),
            images: Arc::new(Mutex::new(images)),
            canvas_bounds: Rect::new(0.0, 0.0, 2048.0, 2048.0),
            snapshot_dir: "dryrun".to_string(),
            runtime_available: true,
            commit_available: true,
        }
    }

    pub fn set_images(&self, images: Vec<CanvasImage>) {
        if let Ok(mut current) = self.images.lock() {
            *current = images;
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            canvas: Box::new(DryrunCanvas {
                log: self.log.clone(),
                images: Arc::clone(&self.images),
                bounds: self.canvas_bounds,
                snapshot_dir: self.snapshot_dir.clone(),
                commit_available: self.commit_available,
            }),
            inference: Box::new(DryrunInference {
                log: self.log.clone(),
            }),
            generation: Box::new(DryrunGeneration {
                log: self.log.clone(),
                runtime_available: self.runtime_available,
            }),
            timers: Box::new(ManualTimers {
                log: self.log.clone(),
            }),
            clock: Box::new(self.clock.clone()),
        }
    }
}
