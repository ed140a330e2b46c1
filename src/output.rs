//! Result types produced by the extraction pipeline.
//!
//! ```text
//! PageImage ──▶ PageExtraction (one per page, ephemeral)
//!                     │
//!                     ▼
//!              MergedExtraction (one per document) ──▶ ExtractionOutput
//! ```
//!
//! Fields are kept in a `BTreeMap` so serialised output is deterministic;
//! use [`crate::FieldSchema::names`] to iterate in schema order.

use crate::error::PageError;
use crate::schema::FieldSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Confidence assigned to fields returned in the legacy bare-scalar form.
pub const NEUTRAL_CONFIDENCE: u8 = 50;

/// Placeholder words models use instead of leaving a field empty.
const EMPTY_MARKERS: [&str; 3] = ["null", "none", "not found"];

/// Whether a value counts as "nothing was found".
///
/// Empty (after trimming) or case-insensitively equal to `null`, `none` or
/// `not found`.
pub fn is_empty_value(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || EMPTY_MARKERS.iter().any(|m| v.eq_ignore_ascii_case(m))
}

/// Mean of the given confidences, truncated to an integer. 0 when empty.
pub(crate) fn mean_confidence<I: IntoIterator<Item = u8>>(values: I) -> u8 {
    let (sum, count) = values
        .into_iter()
        .fold((0u32, 0u32), |(s, c), v| (s + v as u32, c + 1));
    if count == 0 {
        0
    } else {
        (sum / count) as u8
    }
}

/// One field's extracted value and its legibility confidence (0–100).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldResult {
    pub value: Option<String>,
    pub confidence: u8,
}

impl FieldResult {
    pub fn new(value: impl Into<String>, confidence: u8) -> Self {
        Self {
            value: Some(value.into()),
            confidence: confidence.min(100),
        }
    }

    /// Explicit null with confidence 0.
    pub fn null() -> Self {
        Self::default()
    }

    /// Whether this field holds a real (non-empty) value.
    pub fn is_found(&self) -> bool {
        self.value.as_deref().is_some_and(|v| !is_empty_value(v))
    }
}

/// Extraction result for a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageExtraction {
    /// 0-based page index within the source document.
    pub page_index: usize,
    /// One entry per schema field.
    pub fields: BTreeMap<String, FieldResult>,
    /// Mean of the per-field confidences.
    pub confidence: u8,
    /// Model's free-text explanation (image quality, difficulties).
    pub reasoning: String,
    /// Answer to the additional free-text question, if one was asked.
    pub additional_answer: Option<String>,
}

impl PageExtraction {
    /// Build a page result, deriving the aggregate confidence from `fields`.
    pub fn new(
        page_index: usize,
        fields: BTreeMap<String, FieldResult>,
        reasoning: impl Into<String>,
    ) -> Self {
        let confidence = mean_confidence(fields.values().map(|f| f.confidence));
        Self {
            page_index,
            fields,
            confidence,
            reasoning: reasoning.into(),
            additional_answer: None,
        }
    }

    pub fn with_additional_answer(mut self, answer: Option<String>) -> Self {
        self.additional_answer = answer;
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldResult> {
        self.fields.get(name)
    }

    /// Number of fields with a non-empty value.
    pub fn found_count(&self) -> usize {
        self.fields.values().filter(|f| f.is_found()).count()
    }

    /// Present a single page as the final record, without a merge step.
    ///
    /// Fields and confidence follow the same rules as [`crate::merge_pages`]:
    /// empty values become explicit nulls and the confidence is the mean over
    /// found fields. The page's own reasoning is kept as is.
    pub fn into_merged(self) -> MergedExtraction {
        let fields: BTreeMap<String, FieldResult> = self
            .fields
            .into_iter()
            .map(|(name, f)| if f.is_found() { (name, f) } else { (name, FieldResult::null()) })
            .collect();
        let confidence = mean_confidence(
            fields
                .values()
                .filter(|f| f.is_found())
                .map(|f| f.confidence),
        );
        MergedExtraction {
            fields,
            confidence,
            reasoning: self.reasoning,
            pages_merged: 1,
        }
    }
}

/// The final per-document record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedExtraction {
    /// Exactly one entry per schema field; missing values are explicit nulls.
    pub fields: BTreeMap<String, FieldResult>,
    /// Mean confidence over fields that received a value.
    pub confidence: u8,
    pub reasoning: String,
    /// Number of pages that contributed to the record.
    pub pages_merged: usize,
}

impl MergedExtraction {
    /// A record with every schema field null, confidence 0.
    ///
    /// Used when the pipeline fails after the document loaded.
    pub fn degraded(schema: &FieldSchema, reasoning: impl Into<String>) -> Self {
        Self {
            fields: schema
                .names()
                .map(|n| (n.to_string(), FieldResult::null()))
                .collect(),
            confidence: 0,
            reasoning: reasoning.into(),
            pages_merged: 0,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldResult> {
        self.fields.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|f| f.value.as_deref())
    }
}

/// Outcome of one page in the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageReport {
    /// 0-based page index.
    pub page_index: usize,
    /// Page confidence, `None` when the page failed.
    pub confidence: Option<u8>,
    /// Fields with a non-empty value on this page.
    pub fields_found: usize,
    /// Wall-clock time of the model call + parse.
    pub duration_ms: u64,
    /// `Some` when the page failed and was left out of the merge.
    pub error: Option<PageError>,
}

/// Aggregate statistics for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Pages in the source document (before the page cap).
    pub total_pages: usize,
    /// Pages whose extraction succeeded.
    pub processed_pages: usize,
    /// Pages whose model call or parse failed.
    pub failed_pages: usize,
    /// Pages beyond the page cap that were never sent.
    pub dropped_pages: usize,
    pub load_duration_ms: u64,
    pub model_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything returned to the caller of [`crate::extract`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// The merged record.
    pub extraction: MergedExtraction,
    /// Answer to the additional question, kept apart from the fields.
    pub additional_answer: Option<String>,
    /// Model that produced the record.
    pub model: String,
    /// Per-page outcomes, in page order.
    pub pages: Vec<PageReport>,
    pub stats: ExtractionStats,
    /// Set when the record is a degraded placeholder after an unexpected failure.
    pub error: Option<String>,
}

impl ExtractionOutput {
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_markers_are_case_insensitive() {
        assert!(is_empty_value(""));
        assert!(is_empty_value("   "));
        assert!(is_empty_value("NULL"));
        assert!(is_empty_value("None"));
        assert!(is_empty_value("Not Found"));
        assert!(!is_empty_value("not found yet"));
        assert!(!is_empty_value("0"));
    }

    #[test]
    fn mean_truncates() {
        assert_eq!(mean_confidence([90, 85]), 87);
        assert_eq!(mean_confidence([]), 0);
        assert_eq!(mean_confidence([100, 100, 100]), 100);
    }

    #[test]
    fn field_result_found() {
        assert!(FieldResult::new("INV-1", 80).is_found());
        assert!(!FieldResult::new("none", 80).is_found());
        assert!(!FieldResult::null().is_found());
    }

    #[test]
    fn field_result_clamps_confidence() {
        assert_eq!(FieldResult::new("x", 250).confidence, 100);
    }

    #[test]
    fn page_confidence_is_mean_of_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("a".to_string(), FieldResult::new("1", 80));
        fields.insert("b".to_string(), FieldResult::null());
        let page = PageExtraction::new(0, fields, "clear");
        assert_eq!(page.confidence, 40);
        assert_eq!(page.found_count(), 1);
    }

    #[test]
    fn single_page_record_matches_merge_of_one() {
        let schema = FieldSchema::new([("invoice_id", "Id"), ("total", "Total")]).unwrap();
        let page = crate::parse_page(
            r#"{"data": {
                "invoice_id": {"value": "INV-3", "confidence": 90},
                "total": {"value": "Not Found", "confidence": 85}
            }, "reasoning": "clean scan"}"#,
            &schema,
            0,
        )
        .unwrap();
        assert_eq!(page.field("total"), Some(&FieldResult::null()));

        let merged = crate::merge_pages(std::slice::from_ref(&page), &schema);
        assert_eq!(merged.fields, page.fields);

        let single = page.into_merged();
        assert_eq!(single.fields, merged.fields);
        assert_eq!(single.confidence, merged.confidence);
        assert_eq!(single.confidence, 90);
        assert_eq!(single.reasoning, "clean scan");
    }

    #[test]
    fn into_merged_nulls_unfound_values() {
        let mut fields = BTreeMap::new();
        fields.insert("a".to_string(), FieldResult::new("none", 70));
        fields.insert("b".to_string(), FieldResult::new("42", 60));
        let merged = PageExtraction::new(0, fields, "").into_merged();
        assert_eq!(merged.fields["a"], FieldResult::null());
        assert_eq!(merged.confidence, 60);
    }

    #[test]
    fn degraded_has_every_field_null() {
        let schema = FieldSchema::new([("a", "A"), ("b", "B")]).unwrap();
        let merged = MergedExtraction::degraded(&schema, "Error: boom");
        assert_eq!(merged.fields.len(), 2);
        assert!(merged.fields.values().all(|f| f.value.is_none()));
        assert_eq!(merged.confidence, 0);
        assert_eq!(merged.reasoning, "Error: boom");
    }
}
