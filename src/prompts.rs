//! Instruction text sent to the vision model with every page.
//!
//! Keeping every prompt here means the rubric and the JSON envelope the
//! parser expects live side by side: change one, check the other.
//!
//! Callers can replace the instruction header via
//! [`crate::config::ExtractionConfig::instruction`]; the field list, the
//! additional question and the response template are always appended so the
//! parser keeps working.

use crate::schema::FieldSchema;

/// Default instruction header: extraction rules plus the legibility rubric.
///
/// Confidence is requested as a measure of how clearly the text could be
/// read, not of how plausible the value is.
pub const DEFAULT_INSTRUCTION: &str = r#"You are a document data extraction assistant. Extract information from this document image.

EXTRACTION RULES:
1. Copy text EXACTLY as it appears (keep formatting, spacing and case).
2. For each field, give the extracted value and a confidence score from 0 to 100.
3. The confidence score must reflect IMAGE QUALITY and TEXT LEGIBILITY:

   80-100  Sharp image, crisp and fully readable characters, no blur or fading.
   50-79   Some blur or compression artefacts; readable but a few characters are unclear.
   20-49   Blurry, faded or low-resolution text; some characters had to be guessed.
   0-19    Barely legible or illegible; if most characters cannot be read, use null.

4. For critical data (IBAN, codes, amounts, identifiers):
   - Any unclear digit or character must lower the confidence noticeably.
   - One or two unclear characters: at most 60.
   - Several unclear characters: around 30-40.
   - Prefer a low-confidence value over null when something is readable.

5. In "reasoning", mention image-quality problems and anything that was hard to read."#;

/// Build the full instruction for one page.
///
/// `header` overrides [`DEFAULT_INSTRUCTION`] when set.
pub fn build_instruction(schema: &FieldSchema, question: Option<&str>, header: Option<&str>) -> String {
    let fields = schema
        .fields()
        .map(|f| format!("- `{}`: {}", f.name, f.description))
        .collect::<Vec<_>>()
        .join("\n");

    let question = question.map(str::trim).filter(|q| !q.is_empty()).unwrap_or("None");

    format!(
        "{header}\n\nFields to extract:\n{fields}\n\nAdditional request: {question}\n\n{template}",
        header = header.unwrap_or(DEFAULT_INSTRUCTION),
        template = response_template(schema),
    )
}

/// JSON skeleton the model is asked to fill in.
pub fn response_template(schema: &FieldSchema) -> String {
    let data = schema
        .names()
        .map(|name| {
            format!(
                "      \"{name}\": {{\"value\": \"<extracted text or null>\", \"confidence\": <0-100 reflecting legibility>}}"
            )
        })
        .collect::<Vec<_>>()
        .join(",\n");

    format!(
        r#"Respond with ONLY this JSON structure:
{{
  "extraction_results": {{
    "overall_confidence": <average of all field confidences>,
    "reasoning": "<image quality and any difficulties reading the text>",
    "data": {{
{data}
    }},
    "additional_request_result": "<answer or null>"
  }}
}}"#
    )
}

/// Suffix appended to the instruction for page `index` (0-based) of `total`.
pub fn page_note(index: usize, total: usize) -> String {
    format!(
        "\n\nNote: This is page {} of {} from the document.",
        index + 1,
        total
    )
}
