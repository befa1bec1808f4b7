use std::collections::VecDeque;

use brood_contracts::intent::TransformationMode;
use indexmap::IndexMap;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::collaborators::CanvasImage;

/// Rejection scopes for the current canvas.
///
/// `image_set` only changes when image identity changes. `context` also changes when the
/// same images are re-arranged or relabeled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signatures {
    pub image_set: String,
    pub context: String,
}

impl Signatures {
    pub fn from_images(images: &[CanvasImage]) -> Self {
        let mut ids: Vec<&str> = images.iter().map(|image| image.id.as_str()).collect();
        ids.sort_unstable();
        let image_set = sha256_hex(&format!("images|{}", ids.join("|")));

        let context_rows: Vec<String> = images
            .iter()
            .map(|image| {
                format!(
                    "{}:{}:{},{},{},{}",
                    image.id,
                    image.label.as_deref().unwrap_or("").trim(),
                    image.bounds.x.round() as i64,
                    image.bounds.y.round() as i64,
                    image.bounds.w.round() as i64,
                    image.bounds.h.round() as i64,
                )
            })
            .collect();
        let context = sha256_hex(&format!("context|{}", context_rows.join("|")));

        Self { image_set, context }
    }

    /// Both keys, once each.
    pub fn keys(&self) -> Vec<&str> {
        if self.image_set == self.context {
            vec![self.image_set.as_str()]
        } else {
            vec![self.image_set.as_str(), self.context.as_str()]
        }
    }
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Modes the user turned down, per signature. Entries accumulate; each key keeps its newest
/// `per_key` modes.
#[derive(Debug, Clone)]
pub struct RejectionMemory {
    per_key: usize,
    rejected: IndexMap<String, VecDeque<TransformationMode>>,
}

impl RejectionMemory {
    pub fn new(per_key: usize) -> Self {
        Self {
            per_key: per_key.max(1),
            rejected: IndexMap::new(),
        }
    }

    pub fn remember(&mut self, signatures: &Signatures, mode: TransformationMode) -> Vec<String> {
        signatures
            .keys()
            .into_iter()
            .map(|key| {
                self.remember_key(key, mode);
                key.to_string()
            })
            .collect()
    }

    pub fn remember_key(&mut self, key: &str, mode: TransformationMode) {
        let modes = self.rejected.entry(key.to_string()).or_default();
        if modes.contains(&mode) {
            return;
        }
        modes.push_back(mode);
        while modes.len() > self.per_key {
            modes.pop_front();
        }
    }

    pub fn rejected_for(&self, key: &str) -> Vec<TransformationMode> {
        self.rejected
            .get(key)
            .map(|modes| modes.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Union of rejected modes across `keys`, in first-rejected order.
    pub fn rejected_union(&self, keys: &[&str]) -> Vec<TransformationMode> {
        let mut out: Vec<TransformationMode> = Vec::new();
        for key in keys {
            for mode in self.rejected_for(key) {
                if !out.contains(&mode) {
                    out.push(mode);
                }
            }
        }
        out
    }

    /// Drops rejected modes from `candidates`, keeping survivor order. Never returns an empty
    /// list for non-empty input.
    pub fn diversify(
        &self,
        candidates: &[TransformationMode],
        keys: &[&str],
    ) -> Vec<TransformationMode> {
        let rejected = self.rejected_union(keys);
        let survivors: Vec<TransformationMode> = candidates
            .iter()
            .copied()
            .filter(|mode| !rejected.contains(mode))
            .collect();
        if survivors.is_empty() {
            return candidates.to_vec();
        }
        survivors
    }

    pub fn key_count(&self) -> usize {
        self.rejected.len()
    }
}

#[cfg(test)]
mod tests {
    use brood_contracts::intent::TransformationMode::{self, *};

    use super::{RejectionMemory, Signatures};
    use crate::collaborators::CanvasImage;
    use crate::placement::Rect;

    fn canvas(offset: f64) -> Vec<CanvasImage> {
        vec![
            CanvasImage::new("b", Rect::new(offset, 0.0, 64.0, 64.0)).with_label("boat"),
            CanvasImage::new("a", Rect::new(100.0, 0.0, 64.0, 64.0)).with_label("harbor"),
        ]
    }

    #[test]
    fn rearranging_keeps_image_set_but_changes_context() {
        let before = Signatures::from_images(&canvas(0.0));
        let after = Signatures::from_images(&canvas(240.0));
        assert_eq!(before.image_set, after.image_set);
        assert_ne!(before.context, after.context);
        assert_eq!(before.image_set.len(), 64);

        let mut reversed = canvas(0.0);
        reversed.reverse();
        assert_eq!(Signatures::from_images(&reversed).image_set, before.image_set);
    }

    #[test]
    fn remember_records_under_both_signatures() {
        let signatures = Signatures::from_images(&canvas(0.0));
        let mut memory = RejectionMemory::new(6);
        let keys = memory.remember(&signatures, Amplify);
        assert_eq!(keys.len(), 2);
        assert_eq!(memory.rejected_for(&signatures.image_set), vec![Amplify]);
        assert_eq!(memory.rejected_for(&signatures.context), vec![Amplify]);
    }

    #[test]
    fn diversify_filters_and_is_idempotent() {
        let signatures = Signatures::from_images(&canvas(0.0));
        let mut memory = RejectionMemory::new(6);
        memory.remember(&signatures, Purify);
        let keys = signatures.keys();

        let candidates = vec![Purify, Fracture, Purify, Alienate];
        let once = memory.diversify(&candidates, &keys);
        let twice = memory.diversify(&once, &keys);
        assert_eq!(once, vec![Fracture, Alienate]);
        assert_eq!(once, twice);
        assert_eq!(candidates, vec![Purify, Fracture, Purify, Alienate]);
    }

    #[test]
    fn diversify_never_empties_the_list() {
        let signatures = Signatures::from_images(&canvas(0.0));
        let mut memory = RejectionMemory::new(6);
        memory.remember(&signatures, Purify);
        memory.remember(&signatures, Fracture);

        let candidates = vec![Fracture, Purify];
        assert_eq!(memory.diversify(&candidates, &signatures.keys()), candidates);
        assert!(memory.diversify(&[], &signatures.keys()).is_empty());
    }

    #[test]
    fn per_key_bound_evicts_oldest() {
        let mut memory = RejectionMemory::new(3);
        for mode in [Amplify, Transcend, Amplify, Purify, Fracture] {
            memory.remember_key("k", mode);
        }
        let kept: Vec<TransformationMode> = memory.rejected_for("k");
        assert_eq!(kept, vec![Transcend, Purify, Fracture]);
        assert_eq!(memory.key_count(), 1);
    }

    #[test]
    fn context_only_rejection_still_counts_after_rearranging_back() {
        let original = Signatures::from_images(&canvas(0.0));
        let moved = Signatures::from_images(&canvas(240.0));
        let mut memory = RejectionMemory::new(6);
        memory.remember_key(&moved.context, Romanticize);

        assert_eq!(
            memory.diversify(&[Romanticize, Hybridize], &original.keys()),
            vec![Romanticize, Hybridize]
        );
        assert_eq!(
            memory.diversify(&[Romanticize, Hybridize], &moved.keys()),
            vec![Hybridize]
        );
    }
}
