use brood_contracts::intent::TransformationMode;
use serde::{Deserialize, Serialize};

use crate::collaborators::CanvasImage;
use crate::session::IntentSnapshot;

const HINT_LIMIT: usize = 4;
const HINT_CHARS: usize = 64;

/// Provider-neutral description of the one generation a proposal dispatches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub mode: TransformationMode,
    pub summary: String,
    pub image_ids: Vec<String>,
    pub hints: Vec<String>,
    /// Modes rejected for this canvas; providers may steer away from them.
    pub avoid: Vec<TransformationMode>,
}

impl PromptSpec {
    pub fn compose(
        snapshot: &IntentSnapshot,
        images: &[CanvasImage],
        avoid: Vec<TransformationMode>,
    ) -> Self {
        let mut hints: Vec<String> = Vec::new();
        let mut push_hint = |raw: &str| {
            let hint = clamp_text(raw, HINT_CHARS);
            if !hint.is_empty() && hints.len() < HINT_LIMIT && !hints.contains(&hint) {
                hints.push(hint);
            }
        };
        for branch in &snapshot.document.branches {
            push_hint(&branch.branch_id);
        }
        for icon in &snapshot.document.intent_icons {
            push_hint(&icon.icon_id);
        }
        for image in images {
            if let Some(label) = image.label.as_deref() {
                push_hint(label);
            }
        }

        Self {
            mode: snapshot.proposal_mode,
            summary: intent_summary_for_mode(snapshot.proposal_mode, &hints),
            image_ids: images.iter().map(|image| image.id.clone()).collect(),
            hints,
            avoid,
        }
    }

    pub fn render(&self) -> String {
        let mut lines = vec![self.summary.clone()];
        if !self.hints.is_empty() {
            lines.push(format!("Focus: {}.", self.hints.join(", ")));
        }
        if !self.avoid.is_empty() {
            let avoided: Vec<&str> = self.avoid.iter().map(|mode| mode.as_str()).collect();
            lines.push(format!("Avoid: {}.", avoided.join(", ")));
        }
        lines.join("\n")
    }
}

fn clamp_text(raw: &str, limit: usize) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= limit {
        return trimmed.to_string();
    }
    trimmed.chars().take(limit).collect::<String>().trim_end().to_string()
}

pub fn intent_summary_for_mode(mode: TransformationMode, hints: &[String]) -> String {
    let suffix = hints
        .first()
        .map(|hint| format!(" from {hint}"))
        .unwrap_or_default();
    match mode {
        TransformationMode::Amplify => {
            format!("Push the composition into a cinematic crescendo{suffix}.")
        }
        TransformationMode::Transcend => {
            format!("Lift the scene into a transcendent visual world{suffix}.")
        }
        TransformationMode::Destabilize => {
            format!("Shift the composition toward controlled visual instability{suffix}.")
        }
        TransformationMode::Purify => {
            format!("Simplify geometry and light into a calm sculptural image{suffix}.")
        }
        TransformationMode::Hybridize => {
            format!("Fuse current references into one coherent composition{suffix}.")
        }
        TransformationMode::Mythologize => {
            format!("Recast the scene as mythic visual storytelling{suffix}.")
        }
        TransformationMode::Monumentalize => {
            format!("Turn the scene into a monumental hero composition{suffix}.")
        }
        TransformationMode::Fracture => {
            format!("Introduce deliberate fracture while preserving coherence{suffix}.")
        }
        TransformationMode::Romanticize => {
            format!("Infuse the scene with intimate emotional warmth{suffix}.")
        }
        TransformationMode::Alienate => format!("Reframe the scene with uncanny distance{suffix}."),
    }
}
