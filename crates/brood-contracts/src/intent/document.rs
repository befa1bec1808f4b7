use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::mode::{compare_candidates, descending, ModeCandidate, TransformationMode};
use super::recovery::ParseFailure;

pub const INTENT_SCHEMA: &str = "brood.intent_icons";
pub const INTENT_SCHEMA_SUFFIX: &str = "intent_icons";
pub const INTENT_SCHEMA_VERSION: u64 = 1;
pub const MAX_EVIDENCE_REFS: usize = 3;

/// Fully-typed intent document produced by the payload recovery parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDocument {
    pub schema: String,
    pub schema_version: u64,
    pub transformation_mode: Option<TransformationMode>,
    pub transformation_mode_candidates: Vec<ModeCandidate>,
    pub intent_icons: Vec<IntentIcon>,
    pub branches: Vec<IntentBranch>,
    pub relations: Vec<IconRelation>,
    pub checkpoint: Option<Checkpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentIcon {
    pub icon_id: String,
    pub confidence: f64,
    pub position_hint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentBranch {
    pub branch_id: String,
    pub confidence: Option<f64>,
    pub evidence_refs: Vec<String>,
    pub icons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IconRelation {
    pub from_icon: String,
    pub to_icon: String,
    pub relation_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub icons: Vec<String>,
    pub applies_to: Option<String>,
}

impl IntentDocument {
    /// Mode evidence for selection: explicit candidates, or the bare mode when no candidates were sent.
    pub fn mode_evidence(&self) -> Vec<ModeCandidate> {
        if !self.transformation_mode_candidates.is_empty() {
            return self.transformation_mode_candidates.clone();
        }
        self.transformation_mode
            .map(|mode| vec![ModeCandidate::new(mode)])
            .unwrap_or_default()
    }

    fn is_empty(&self) -> bool {
        self.transformation_mode.is_none()
            && self.transformation_mode_candidates.is_empty()
            && self.intent_icons.is_empty()
            && self.branches.is_empty()
    }
}

/// Fields whose presence marks an object as an intent payload.
const INTENT_FIELDS: [&str; 5] = [
    "intent_icons",
    "branches",
    "relations",
    "transformation_mode",
    "transformation_mode_candidates",
];

pub(crate) fn looks_like_intent(object: &Map<String, Value>) -> bool {
    if object
        .get("schema")
        .and_then(Value::as_str)
        .map(|schema| schema.trim().ends_with(INTENT_SCHEMA_SUFFIX))
        .unwrap_or(false)
    {
        return true;
    }
    INTENT_FIELDS.iter().any(|key| {
        matches!(
            object.get(*key),
            Some(Value::Array(_)) | Some(Value::String(_))
        )
    })
}

pub(crate) fn normalize_document(
    object: &Map<String, Value>,
) -> Result<IntentDocument, ParseFailure> {
    let schema = object
        .get("schema")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(INTENT_SCHEMA)
        .to_string();
    if !schema.ends_with(INTENT_SCHEMA_SUFFIX) {
        return Err(ParseFailure::SchemaMismatch);
    }
    let schema_version = object
        .get("schema_version")
        .and_then(value_to_u64)
        .unwrap_or(INTENT_SCHEMA_VERSION);

    let transformation_mode = object
        .get("transformation_mode")
        .and_then(Value::as_str)
        .and_then(TransformationMode::parse);

    let mut transformation_mode_candidates: Vec<ModeCandidate> =
        array_rows(object.get("transformation_mode_candidates"))
            .filter_map(normalize_candidate)
            .collect();
    transformation_mode_candidates.sort_by(compare_candidates);
    let mut seen_modes: Vec<TransformationMode> = Vec::new();
    transformation_mode_candidates.retain(|candidate| {
        if seen_modes.contains(&candidate.mode) {
            return false;
        }
        seen_modes.push(candidate.mode);
        true
    });

    let intent_icons = array_rows(object.get("intent_icons"))
        .filter_map(normalize_icon)
        .collect();

    let mut branches: Vec<IntentBranch> = array_rows(object.get("branches"))
        .filter_map(normalize_branch)
        .collect();
    branches.sort_by(|left, right| descending(left.confidence, right.confidence));

    let relations = array_rows(object.get("relations"))
        .filter_map(normalize_relation)
        .collect();

    let checkpoint = object
        .get("checkpoint")
        .and_then(Value::as_object)
        .map(|row| Checkpoint {
            icons: string_list(row.get("icons"), usize::MAX),
            applies_to: non_empty_string(row.get("applies_to")),
        });

    let document = IntentDocument {
        schema,
        schema_version,
        transformation_mode,
        transformation_mode_candidates,
        intent_icons,
        branches,
        relations,
        checkpoint,
    };
    if document.is_empty() {
        return Err(ParseFailure::NoIntentShape);
    }
    Ok(document)
}

fn normalize_candidate(row: &Value) -> Option<ModeCandidate> {
    match row {
        Value::String(text) => TransformationMode::parse(text).map(ModeCandidate::new),
        Value::Object(fields) => {
            let mode = fields
                .get("mode")
                .or_else(|| fields.get("transformation_mode"))
                .and_then(Value::as_str)
                .and_then(TransformationMode::parse)?;
            Some(ModeCandidate {
                mode,
                confidence: fields
                    .get("confidence")
                    .and_then(|value| bounded_number(value, 0.0, 1.0)),
                quality_score: fields
                    .get("quality_score")
                    .or_else(|| fields.get("score"))
                    .and_then(|value| bounded_number(value, 0.0, 100.0)),
            })
        }
        _ => None,
    }
}

fn normalize_icon(row: &Value) -> Option<IntentIcon> {
    match row {
        Value::String(text) => {
            let icon_id = text.trim();
            (!icon_id.is_empty()).then(|| IntentIcon {
                icon_id: icon_id.to_string(),
                confidence: 0.0,
                position_hint: String::new(),
            })
        }
        Value::Object(fields) => Some(IntentIcon {
            icon_id: non_empty_string(fields.get("icon_id").or_else(|| fields.get("id")))?,
            confidence: fields
                .get("confidence")
                .and_then(|value| bounded_number(value, 0.0, 1.0))
                .unwrap_or(0.0),
            position_hint: non_empty_string(fields.get("position_hint")).unwrap_or_default(),
        }),
        _ => None,
    }
}

fn normalize_branch(row: &Value) -> Option<IntentBranch> {
    let fields = row.as_object()?;
    let branch_id = non_empty_string(fields.get("branch_id").or_else(|| fields.get("id")))?;
    Some(IntentBranch {
        branch_id,
        confidence: fields
            .get("confidence")
            .and_then(|value| bounded_number(value, 0.0, 1.0)),
        evidence_refs: string_list(
            fields
                .get("evidence_refs")
                .or_else(|| fields.get("evidence_image_ids")),
            MAX_EVIDENCE_REFS,
        ),
        icons: string_list(fields.get("icons"), usize::MAX),
    })
}

fn normalize_relation(row: &Value) -> Option<IconRelation> {
    let fields = row.as_object()?;
    Some(IconRelation {
        from_icon: non_empty_string(fields.get("from_icon"))?,
        to_icon: non_empty_string(fields.get("to_icon"))?,
        relation_type: non_empty_string(fields.get("relation_type")).unwrap_or_default(),
    })
}

fn array_rows(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flat_map(|rows| rows.iter())
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Accepts an array of strings or a comma-separated string; trims, de-duplicates, caps at `max_items`.
fn string_list(value: Option<&Value>, max_items: usize) -> Vec<String> {
    let raw_items: Vec<String> = match value {
        Some(Value::Array(rows)) => rows
            .iter()
            .filter_map(|row| non_empty_string(Some(row)))
            .collect(),
        Some(Value::String(text)) => text.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    let mut out: Vec<String> = Vec::new();
    for item in raw_items {
        let item = item.trim();
        if item.is_empty() || out.iter().any(|existing| existing == item) {
            continue;
        }
        out.push(item.to_string());
        if out.len() >= max_items {
            break;
        }
    }
    out
}

fn bounded_number(value: &Value, min: f64, max: f64) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then(|| parsed.clamp(min, max))
}

fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|v| v.is_finite() && *v >= 0.0).map(|v| v as u64)),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{looks_like_intent, normalize_document, IntentDocument, INTENT_SCHEMA};
    use crate::intent::mode::TransformationMode;
    use crate::intent::recovery::ParseFailure;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn normalize(value: Value) -> Result<IntentDocument, ParseFailure> {
        normalize_document(&obj(value))
    }

    #[test]
    fn defaults_are_stamped_when_metadata_is_missing() {
        let document = normalize(json!({"transformation_mode": "Purify"})).unwrap();
        assert_eq!(document.schema, INTENT_SCHEMA);
        assert_eq!(document.schema_version, 1);
        assert_eq!(document.transformation_mode, Some(TransformationMode::Purify));
        assert_eq!(document.checkpoint, None);
    }

    #[test]
    fn numeric_fields_are_clamped_and_malformed_rows_dropped() {
        let document = normalize(json!({
            "transformation_mode_candidates": [
                {"mode": "amplify", "confidence": 1.7, "quality_score": "140"},
                {"mode": "not-a-mode", "confidence": 0.9},
                "fracture",
                42
            ],
            "intent_icons": [
                {"icon_id": "IMAGE_GENERATION", "confidence": -3, "position_hint": "primary"},
                {"icon_id": "   ", "confidence": 0.4},
                "ITERATION"
            ],
            "branches": [
                {"branch_id": "", "confidence": 0.9},
                {"branch_id": "game_dev_assets", "confidence": 0.7,
                 "evidence_image_ids": ["a", "b", "b", "c", "d"], "icons": ["SPRITES"]}
            ],
            "relations": [
                {"from_icon": "ITERATION", "to_icon": "IMAGE_GENERATION", "relation_type": "DEPENDENCY"},
                {"from_icon": "ITERATION"}
            ]
        }))
        .unwrap();

        assert_eq!(document.transformation_mode_candidates.len(), 2);
        let first = &document.transformation_mode_candidates[0];
        assert_eq!(first.mode, TransformationMode::Amplify);
        assert_eq!(first.confidence, Some(1.0));
        assert_eq!(first.quality_score, Some(100.0));

        assert_eq!(document.intent_icons.len(), 2);
        assert_eq!(document.intent_icons[0].confidence, 0.0);
        assert_eq!(document.intent_icons[1].icon_id, "ITERATION");

        assert_eq!(document.branches.len(), 1);
        assert_eq!(document.branches[0].evidence_refs, vec!["a", "b", "c"]);
        assert_eq!(document.relations.len(), 1);
    }

    #[test]
    fn foreign_schema_is_a_mismatch() {
        let err = normalize(json!({
            "schema": "brood.canvas_context",
            "transformation_mode": "amplify"
        }))
        .unwrap_err();
        assert_eq!(err, ParseFailure::SchemaMismatch);
    }

    #[test]
    fn payload_with_nothing_usable_has_no_intent_shape() {
        let err = normalize(json!({"relations": [], "transformation_mode": "glitch"})).unwrap_err();
        assert_eq!(err, ParseFailure::NoIntentShape);
    }

    #[test]
    fn branches_sort_by_confidence_with_missing_last() {
        let document = normalize(json!({
            "branches": [
                {"branch_id": "a"},
                {"branch_id": "b", "confidence": 0.3},
                {"branch_id": "c", "confidence": 0.8}
            ]
        }))
        .unwrap();
        let ids: Vec<&str> = document
            .branches
            .iter()
            .map(|row| row.branch_id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn shape_detection_uses_schema_tag_or_known_fields() {
        assert!(looks_like_intent(&obj(json!({"schema": "brood.intent_icons"}))));
        assert!(looks_like_intent(&obj(json!({"intent_icons": []}))));
        assert!(!looks_like_intent(&obj(json!({"data": {"intent_icons": []}}))));
        assert!(!looks_like_intent(&obj(json!({"intent_icons": 3}))));
    }
}
