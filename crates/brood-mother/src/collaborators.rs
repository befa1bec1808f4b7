use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::placement::{Placement, Rect};
use crate::prompt::PromptSpec;
use crate::timers::TimerToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanvasImage {
    pub id: String,
    /// Minimal semantic label. Inference waits until every participating image has one.
    #[serde(default)]
    pub label: Option<String>,
    pub bounds: Rect,
}

impl CanvasImage {
    pub fn new(id: impl Into<String>, bounds: Rect) -> Self {
        Self {
            id: id.into(),
            label: None,
            bounds,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn is_labeled(&self) -> bool {
        self.label
            .as_deref()
            .map(|label| !label.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceRequest {
    pub action_version: u64,
    pub image_ids: Vec<String>,
    pub snapshot_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub action_version: u64,
    pub snapshot_path: String,
    pub prompt: PromptSpec,
}

/// The canvas the orchestrator proposes onto.
pub trait CanvasSurface: Send {
    /// Participating images in canvas order.
    fn images(&self) -> Vec<CanvasImage>;
    fn canvas_bounds(&self) -> Rect;
    /// Writes a snapshot of the current canvas and returns its path.
    fn capture_snapshot(&mut self, name: &str) -> anyhow::Result<String>;
    fn request_labels(&mut self, image_ids: &[String]) -> anyhow::Result<()>;
    /// Optimistic "drafting" affordance shown before the generation is armed.
    fn prime_draft(&mut self, proposal_mode: &str);
    fn clear_draft(&mut self);
    fn show_draft(&mut self, artifact_ref: &str);
    fn discard_artifact(&mut self, artifact_ref: &str);
    fn commit(&mut self, artifact_ref: &str, placement: &Placement) -> anyhow::Result<()>;
}

/// Fire-and-forget intent inference. The answer comes back as an inbound event.
pub trait IntentInference: Send {
    fn request_intent(&mut self, request: InferenceRequest) -> anyhow::Result<()>;
}

/// Fire-and-forget generation. The result comes back as an inbound event.
pub trait GenerationProvider: Send {
    /// Brings up the execution runtime. Failing here means the dispatch is never armed.
    fn prepare(&mut self) -> anyhow::Result<()>;
    fn request_generation(&mut self, request: GenerationRequest) -> anyhow::Result<()>;
}

pub trait TimerSource: Send {
    fn schedule(&mut self, token: TimerToken, delay: Duration);
}

pub trait Clock: Send {
    fn now_ms(&self) -> u64;
}

pub struct Collaborators {
    pub canvas: Box<dyn CanvasSurface>,
    pub inference: Box<dyn IntentInference>,
    pub generation: Box<dyn GenerationProvider>,
    pub timers: Box<dyn TimerSource>,
    pub clock: Box<dyn Clock>,
}
