use indexmap::IndexSet;
use serde_json::{Map, Value};

use super::document::{looks_like_intent, normalize_document, IntentDocument};

/// Recursion bound for string re-parsing and wrapper descent.
const MAX_UNWRAP_DEPTH: usize = 8;

/// Searched before any other key when an object does not already look like an intent payload.
const WRAPPER_KEYS: [&str; 10] = [
    "payload",
    "data",
    "result",
    "output",
    "response",
    "content",
    "text",
    "message",
    "json",
    "intent",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailure {
    #[error("empty_text")]
    EmptyText,
    #[error("invalid_json")]
    InvalidJson,
    #[error("truncated_json")]
    TruncatedJson,
    #[error("schema_mismatch")]
    SchemaMismatch,
    #[error("no_intent_shape")]
    NoIntentShape,
    #[error("no_intent_payload_found")]
    NoIntentPayloadFound,
}

impl ParseFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmptyText => "empty_text",
            Self::InvalidJson => "invalid_json",
            Self::TruncatedJson => "truncated_json",
            Self::SchemaMismatch => "schema_mismatch",
            Self::NoIntentShape => "no_intent_shape",
            Self::NoIntentPayloadFound => "no_intent_payload_found",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct PayloadError {
    pub reason: ParseFailure,
    /// First strict-parse error seen across all candidates.
    pub first_error: Option<String>,
}

impl PayloadError {
    fn new(reason: ParseFailure, first_error: Option<String>) -> Self {
        Self {
            reason,
            first_error,
        }
    }
}

/// Recovers an intent document from raw model output.
///
/// Accepts bare JSON, JSON fenced or embedded in prose, concatenated objects, trailing commas,
/// JSON-in-a-string and common wrapper objects. Truncated output is reported as such so callers
/// can decide whether to ask again.
pub fn recover_intent_document(text: &str) -> Result<IntentDocument, PayloadError> {
    let raw = text.trim();
    if raw.is_empty() {
        return Err(PayloadError::new(ParseFailure::EmptyText, None));
    }

    let mut first_error: Option<String> = None;
    let mut parsed_any = false;
    let mut descended = false;
    let mut schema_mismatch = false;

    for candidate in candidate_texts(raw) {
        let value = match parse_lenient(&candidate) {
            Ok(value) => value,
            Err(err) => {
                first_error.get_or_insert_with(|| err.to_string());
                continue;
            }
        };
        parsed_any = true;

        let mut search = ShapeSearch::default();
        let found = search.find(&value, 0);
        descended |= search.descended;
        let Some(object) = found else {
            continue;
        };
        match normalize_document(&object) {
            Ok(document) => return Ok(document),
            Err(ParseFailure::SchemaMismatch) => schema_mismatch = true,
            Err(_) => {}
        }
    }

    let reason = if looks_truncated(raw) || looks_truncated(&strip_code_fence(raw)) {
        ParseFailure::TruncatedJson
    } else if schema_mismatch {
        ParseFailure::SchemaMismatch
    } else if parsed_any && descended {
        ParseFailure::NoIntentPayloadFound
    } else if parsed_any {
        ParseFailure::NoIntentShape
    } else {
        ParseFailure::InvalidJson
    };
    Err(PayloadError::new(reason, first_error))
}

/// Ordered, de-duplicated texts worth a JSON parse attempt.
fn candidate_texts(raw: &str) -> IndexSet<String> {
    let mut out = IndexSet::new();
    let mut push = |text: &str| {
        let text = text.trim();
        if !text.is_empty() {
            out.insert(text.to_string());
        }
    };
    push(raw);
    push(&strip_code_fence(raw));
    for body in fenced_blocks(raw) {
        push(body);
    }
    for span in balanced_spans(raw) {
        push(span);
    }
    out
}

fn parse_lenient(text: &str) -> Result<Value, serde_json::Error> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => Ok(value),
        Err(err) => {
            let relaxed = strip_trailing_commas(text);
            if relaxed == text {
                return Err(err);
            }
            serde_json::from_str::<Value>(&relaxed).map_err(|_| err)
        }
    }
}

/// Strips a leading and/or trailing code fence; either side may be missing on truncated output.
pub fn strip_code_fence(text: &str) -> String {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        body = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest.trim_start_matches(|ch: char| ch.is_ascii_alphabetic()),
        };
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim().to_string()
}

fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut cursor = 0;
    while let Some(open_rel) = text[cursor..].find("```") {
        let open = cursor + open_rel + 3;
        let Some(close_rel) = text[open..].find("```") else {
            break;
        };
        let close = open + close_rel;
        let inner = &text[open..close];
        let body = match inner.find('\n') {
            Some(newline) if !inner[..newline].contains(&['{', '['][..]) => &inner[newline + 1..],
            _ => inner,
        };
        blocks.push(body);
        cursor = close + 3;
    }
    blocks
}

/// Top-level `{..}` / `[..]` spans found with a quote-aware bracket matcher.
fn balanced_spans(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut start = 0;
    while start < bytes.len() {
        if matches!(bytes[start], b'{' | b'[') {
            if let Some(end) = matching_closer(bytes, start) {
                spans.push(&text[start..=end]);
                start = end + 1;
                continue;
            }
        }
        start += 1;
    }
    spans
}

fn matching_closer(bytes: &[u8], open: usize) -> Option<usize> {
    let mut expected: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (idx, &byte) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => expected.push(b'}'),
            b'[' => expected.push(b']'),
            b'}' | b']' => {
                if expected.pop() != Some(byte) {
                    return None;
                }
                if expected.is_empty() {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for (idx, &ch) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            out.push(ch);
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = chars[idx + 1..].iter().find(|next| !next.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(ch);
    }
    out
}

fn looks_truncated(text: &str) -> bool {
    let text = text.trim();
    match text.chars().next() {
        Some('{') => !text.ends_with('}'),
        Some('[') => !text.ends_with(']'),
        _ => false,
    }
}

#[derive(Default)]
struct ShapeSearch {
    /// Identity of container nodes already visited in the tree currently being searched.
    visited: Vec<*const Value>,
    descended: bool,
}

impl ShapeSearch {
    fn find(&mut self, value: &Value, depth: usize) -> Option<Map<String, Value>> {
        if depth > MAX_UNWRAP_DEPTH {
            return None;
        }
        match value {
            Value::String(text) => {
                let trimmed = strip_code_fence(text);
                if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
                    return None;
                }
                let parsed = parse_lenient(&trimmed).ok()?;
                self.descended = true;
                // Nodes of `parsed` die with this frame; forget them so reused addresses stay searchable.
                let mark = self.visited.len();
                let found = self.find(&parsed, depth + 1);
                self.visited.truncate(mark);
                found
            }
            Value::Array(rows) => {
                if !self.enter(value) {
                    return None;
                }
                if !rows.is_empty() {
                    self.descended = true;
                }
                rows.iter().find_map(|row| self.find(row, depth + 1))
            }
            Value::Object(object) => {
                if !self.enter(value) {
                    return None;
                }
                if looks_like_intent(object) {
                    return Some(object.clone());
                }
                for key in WRAPPER_KEYS {
                    if let Some(inner) = object.get(key) {
                        self.descended = true;
                        if let Some(found) = self.find(inner, depth + 1) {
                            return Some(found);
                        }
                    }
                }
                for (key, inner) in object {
                    if WRAPPER_KEYS.contains(&key.as_str()) {
                        continue;
                    }
                    if matches!(inner, Value::Object(_) | Value::Array(_)) {
                        self.descended = true;
                    }
                    if let Some(found) = self.find(inner, depth + 1) {
                        return Some(found);
                    }
                }
                None
            }
            _ => None,
        }
    }

    fn enter(&mut self, node: &Value) -> bool {
        let identity = node as *const Value;
        if self.visited.contains(&identity) {
            return false;
        }
        self.visited.push(identity);
        true
    }
}
