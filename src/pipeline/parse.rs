//! Model text → [`PageExtraction`].
//!
//! Models do not always follow instructions: answers may be wrapped in prose
//! or code fences, the envelope may be missing, and fields may come back as
//! bare scalars instead of `{value, confidence}` objects. Each field's raw
//! JSON is classified exactly once into [`RawField`] and resolved from there.

use crate::error::{excerpt, ExtractError};
use crate::output::{is_empty_value, FieldResult, PageExtraction, NEUTRAL_CONFIDENCE};
use crate::schema::FieldSchema;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Reasoning used when the model skipped the `extraction_results` envelope.
pub const UNEXPECTED_FORMAT_REASONING: &str = "Response format was unexpected";

/// Fields below this confidence are logged.
const LOW_CONFIDENCE: u8 = 50;

/// Largest brace-delimited span: first `{` to last `}`.
static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// Shape of one field as the model returned it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawField {
    /// `{"value": ..., "confidence": ...}`.
    Scored { value: Value, confidence: Value },
    /// A bare scalar (or any non-null value without a `value` key).
    Legacy(Value),
    /// Key absent or explicit `null`.
    Missing,
}

impl RawField {
    pub fn classify(raw: Option<&Value>) -> Self {
        match raw {
            None | Some(Value::Null) => RawField::Missing,
            Some(Value::Object(obj)) if obj.contains_key("value") => RawField::Scored {
                value: obj.get("value").cloned().unwrap_or(Value::Null),
                confidence: obj.get("confidence").cloned().unwrap_or(Value::Null),
            },
            Some(other) => RawField::Legacy(other.clone()),
        }
    }

    pub fn resolve(&self) -> FieldResult {
        match self {
            RawField::Missing => FieldResult::null(),
            // An empty value carries no reading to be confident about.
            RawField::Scored { value, confidence } => match render_value(value) {
                Some(v) => FieldResult {
                    value: Some(v),
                    confidence: parse_confidence(confidence).unwrap_or(0),
                },
                None => FieldResult::null(),
            },
            RawField::Legacy(value) => match render_value(value) {
                Some(v) => FieldResult {
                    value: Some(v),
                    confidence: NEUTRAL_CONFIDENCE,
                },
                None => FieldResult::null(),
            },
        }
    }
}

/// Parse one page's raw model output.
///
/// # Errors
/// [`ExtractError::MalformedResponse`] when no JSON object can be recovered.
pub fn parse_page(
    raw: &str,
    schema: &FieldSchema,
    page_index: usize,
) -> Result<PageExtraction, ExtractError> {
    let root = decode_object(raw)?;

    let envelope = root
        .get("extraction_results")
        .and_then(Value::as_object)
        .cloned();

    let (envelope, reasoning) = match envelope {
        Some(inner) => {
            let reasoning = inner
                .get("reasoning")
                .and_then(render_value)
                .unwrap_or_default();
            (inner, reasoning)
        }
        None => {
            debug!("Page {}: no extraction_results envelope", page_index + 1);
            let mut wrapped = Map::new();
            wrapped.insert("data".into(), Value::Object(root));
            (wrapped, UNEXPECTED_FORMAT_REASONING.to_string())
        }
    };

    let data = match envelope.get("data") {
        Some(Value::Object(d)) => d.clone(),
        _ => Map::new(),
    };

    let mut fields = BTreeMap::new();
    for name in schema.names() {
        let result = RawField::classify(data.get(name)).resolve();
        if result.confidence < LOW_CONFIDENCE && result.value.is_some() {
            warn!(
                "Page {}: low confidence ({}%) for field '{}'",
                page_index + 1,
                result.confidence,
                name
            );
        }
        fields.insert(name.to_string(), result);
    }

    let additional = envelope
        .get("additional_request_result")
        .and_then(render_value)
        .filter(|a| !is_empty_value(a));

    Ok(PageExtraction::new(page_index, fields, reasoning).with_additional_answer(additional))
}

/// Decode the whole text, falling back to the largest `{...}` span.
fn decode_object(raw: &str) -> Result<Map<String, Value>, ExtractError> {
    let malformed = || ExtractError::MalformedResponse {
        excerpt: excerpt(raw, 200),
    };

    let value = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(v) => v,
        Err(_) => {
            let span = JSON_OBJECT.find(raw).ok_or_else(malformed)?;
            serde_json::from_str::<Value>(span.as_str()).map_err(|_| malformed())?
        }
    };

    match value {
        Value::Object(obj) => Ok(obj),
        _ => Err(malformed()),
    }
}

/// Render a JSON value as field text; empty-ish values become `None`.
fn render_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    if is_empty_value(&text) {
        None
    } else {
        Some(text)
    }
}

/// Integer, float or numeric string → rounded and clamped to `0..=100`.
fn parse_confidence(value: &Value) -> Option<u8> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !n.is_finite() {
        return None;
    }
    Some(n.round().clamp(0.0, 100.0) as u8)
}
