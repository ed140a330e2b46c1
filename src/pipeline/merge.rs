//! Cross-page reconciliation: `[PageExtraction]` → one [`MergedExtraction`].
//!
//! Greedy and field-independent: each field takes the most legible non-empty
//! value seen on any page (ties go to the earliest page). Fields are not
//! cross-checked against each other, so different fields may come from
//! different pages.

use crate::output::{mean_confidence, FieldResult, MergedExtraction, PageExtraction};
use crate::schema::FieldSchema;
use std::collections::BTreeMap;

/// Separator between page reasonings.
pub const REASONING_SEPARATOR: &str = " | ";

/// Reasoning used when no page explained itself.
pub const DEFAULT_MERGE_REASONING: &str = "Multi-page extraction";

/// Merge per-page results in page order.
pub fn merge_pages(pages: &[PageExtraction], schema: &FieldSchema) -> MergedExtraction {
    let mut adopted: BTreeMap<&str, &FieldResult> = BTreeMap::new();

    for page in pages {
        for name in schema.names() {
            let Some(candidate) = page.field(name) else {
                continue;
            };
            // Empty candidates never displace anything and end as null.
            if !candidate.is_found() {
                continue;
            }
            match adopted.get(name) {
                Some(current) if candidate.confidence <= current.confidence => {}
                _ => {
                    adopted.insert(name, candidate);
                }
            }
        }
    }

    let fields: BTreeMap<String, FieldResult> = schema
        .names()
        .map(|name| {
            let result = adopted
                .get(name)
                .map(|r| (*r).clone())
                .unwrap_or_else(FieldResult::null);
            (name.to_string(), result)
        })
        .collect();

    let confidence = mean_confidence(adopted.values().map(|r| r.confidence));

    MergedExtraction {
        fields,
        confidence,
        reasoning: merge_reasoning(pages),
        pages_merged: pages.len(),
    }
}

/// Distinct non-empty page reasonings in first-seen order, with a page count prefix.
pub fn merge_reasoning(pages: &[PageExtraction]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for page in pages {
        let r = page.reasoning.trim();
        if !r.is_empty() && !seen.contains(&r) {
            seen.push(r);
        }
    }
    let body = if seen.is_empty() {
        DEFAULT_MERGE_REASONING.to_string()
    } else {
        seen.join(REASONING_SEPARATOR)
    };
    format!("Merged from {} pages: {}", pages.len(), body)
}

/// First non-empty answer to the additional question, in page order.
pub fn first_additional_answer(pages: &[PageExtraction]) -> Option<String> {
    pages
        .iter()
        .filter_map(|p| p.additional_answer.as_deref())
        .map(str::trim)
        .find(|a| !a.is_empty())
        .map(str::to_string)
}
