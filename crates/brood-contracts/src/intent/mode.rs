use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformationMode {
    Amplify,
    Transcend,
    Destabilize,
    Purify,
    #[default]
    Hybridize,
    Mythologize,
    Monumentalize,
    Fracture,
    Romanticize,
    Alienate,
}

impl TransformationMode {
    pub const ALL: [TransformationMode; 10] = [
        Self::Amplify,
        Self::Transcend,
        Self::Destabilize,
        Self::Purify,
        Self::Hybridize,
        Self::Mythologize,
        Self::Monumentalize,
        Self::Fracture,
        Self::Romanticize,
        Self::Alienate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Amplify => "amplify",
            Self::Transcend => "transcend",
            Self::Destabilize => "destabilize",
            Self::Purify => "purify",
            Self::Hybridize => "hybridize",
            Self::Mythologize => "mythologize",
            Self::Monumentalize => "monumentalize",
            Self::Fracture => "fracture",
            Self::Romanticize => "romanticize",
            Self::Alienate => "alienate",
        }
    }

    /// Case-insensitive lookup; unknown names yield `None` rather than a fallback mode.
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == lowered)
    }
}

impl fmt::Display for TransformationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of evidence for a mode. `confidence` lives in [0, 1], `quality_score` in [0, 100].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeCandidate {
    pub mode: TransformationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

impl ModeCandidate {
    pub fn new(mode: TransformationMode) -> Self {
        Self {
            mode,
            confidence: None,
            quality_score: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_quality(mut self, quality_score: f64) -> Self {
        self.quality_score = Some(quality_score);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeSelection {
    pub primary: TransformationMode,
    pub alternates: Vec<TransformationMode>,
}

impl ModeSelection {
    /// Primary first, then alternates.
    pub fn ordered(&self) -> Vec<TransformationMode> {
        let mut out = Vec::with_capacity(self.alternates.len() + 1);
        out.push(self.primary);
        out.extend(self.alternates.iter().copied());
        out
    }
}

/// Missing scores sort last.
pub(crate) fn descending(left: Option<f64>, right: Option<f64>) -> Ordering {
    match (left, right) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn compare_candidates(left: &ModeCandidate, right: &ModeCandidate) -> Ordering {
    descending(left.quality_score, right.quality_score)
        .then_with(|| descending(left.confidence, right.confidence))
}

/// Quality descending, then confidence descending, then evidence order.
pub fn rank_candidates(candidates: &[ModeCandidate]) -> Vec<ModeCandidate> {
    let mut ranked = candidates.to_vec();
    ranked.sort_by(compare_candidates);
    ranked
}

pub fn select_mode(evidence: &[ModeCandidate], default: TransformationMode) -> ModeSelection {
    let ranked = rank_candidates(evidence);
    let Some(first) = ranked.first() else {
        return ModeSelection {
            primary: default,
            alternates: Vec::new(),
        };
    };
    let primary = first.mode;
    let mut alternates: Vec<TransformationMode> = Vec::new();
    for candidate in ranked.iter().skip(1) {
        if candidate.mode == primary || alternates.contains(&candidate.mode) {
            continue;
        }
        alternates.push(candidate.mode);
    }
    ModeSelection {
        primary,
        alternates,
    }
}

#[cfg(test)]
mod tests {
    use super::{select_mode, ModeCandidate, TransformationMode};

    use TransformationMode::*;

    #[test]
    fn parse_is_case_insensitive_and_strict() {
        assert_eq!(TransformationMode::parse("  Amplify "), Some(Amplify));
        assert_eq!(TransformationMode::parse("ALIENATE"), Some(Alienate));
        assert_eq!(TransformationMode::parse("glitch"), None);
        assert_eq!(TransformationMode::parse(""), None);
    }

    #[test]
    fn empty_evidence_falls_back_to_default() {
        let selection = select_mode(&[], Purify);
        assert_eq!(selection.primary, Purify);
        assert!(selection.alternates.is_empty());
    }

    #[test]
    fn quality_outranks_confidence() {
        let evidence = vec![
            ModeCandidate::new(Amplify).with_confidence(0.95),
            ModeCandidate::new(Fracture)
                .with_confidence(0.2)
                .with_quality(40.0),
            ModeCandidate::new(Purify)
                .with_confidence(0.3)
                .with_quality(80.0),
        ];
        let selection = select_mode(&evidence, Hybridize);
        assert_eq!(selection.primary, Purify);
        assert_eq!(selection.alternates, vec![Fracture, Amplify]);
    }

    #[test]
    fn confidence_breaks_quality_ties_and_order_breaks_the_rest() {
        let evidence = vec![
            ModeCandidate::new(Romanticize).with_quality(50.0),
            ModeCandidate::new(Transcend)
                .with_quality(50.0)
                .with_confidence(0.4),
            ModeCandidate::new(Mythologize),
            ModeCandidate::new(Alienate),
            ModeCandidate::new(Destabilize).with_quality(50.0),
        ];
        let selection = select_mode(&evidence, Hybridize);
        assert_eq!(
            selection.ordered(),
            vec![Transcend, Romanticize, Destabilize, Mythologize, Alienate]
        );
    }

    #[test]
    fn duplicate_modes_collapse_to_best_rank() {
        let evidence = vec![
            ModeCandidate::new(Amplify).with_confidence(0.1),
            ModeCandidate::new(Purify).with_confidence(0.5),
            ModeCandidate::new(Amplify).with_confidence(0.9),
        ];
        let selection = select_mode(&evidence, Hybridize);
        assert_eq!(selection.primary, Amplify);
        assert_eq!(selection.alternates, vec![Purify]);
    }
}
