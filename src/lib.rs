//! # edgequake-extract
//!
//! Extract structured fields from scanned documents (images and multi-page
//! PDFs) with a local vision model served by Ollama.
//!
//! ## Why this crate?
//!
//! OCR followed by regexes breaks on every new layout. Here the caller
//! describes the fields in plain words, each page is shown to a vision model
//! as an image, and the model answers with a value and a legibility score for
//! every field. Pages are then reconciled field by field, keeping the most
//! legible reading.
//!
//! ## Pipeline Overview
//!
//! ```text
//! document (PDF / PNG / JPEG)
//!  │
//!  ├─ 1. Load    media type → page images (pdfium at 250 DPI, ≤ 10 pages)
//!  ├─ 2. Encode  width ≤ 1344 px, JPEG q95, base64
//!  ├─ 3. Probe   is the model vision-capable? (once per request)
//!  ├─ 4. Vision  one page per call, sequential, JSON mode
//!  ├─ 5. Parse   recover JSON, normalise values and confidences
//!  └─ 6. Merge   per field: highest confidence wins, earliest page on ties
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_extract::{extract_file, ExtractionConfig, FieldSchema};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let schema = FieldSchema::from_json_str(
//!         r#"{"invoice_id": "Invoice number", "total": "Total amount due"}"#,
//!     )?;
//!     let config = ExtractionConfig::builder().model("llama3.2-vision").build()?;
//!     let output = extract_file("invoice.pdf", &schema, None, &config).await?;
//!     for name in schema.names() {
//!         let field = output.extraction.field(name).unwrap();
//!         println!("{name}: {:?} ({}%)", field.value, field.confidence);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docextract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-extract = { version = "0.1", default-features = false }
//! ```
//!
//! ## Choosing a Model
//!
//! | Model | Size | Notes |
//! |-------|------|-------|
//! | `llama3.2-vision` | 11B | Default; good on forms and invoices |
//! | `llava:13b` | 13B | Older, robust on photos |
//! | `bakllava` | 7B | Smallest of the three |
//! | `gemma3:12b` | 12B | Strong multilingual reading |
//!
//! Text-only models are refused before any page is sent.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{ExtractError, PageError, VisionError};
pub use extract::{extract, extract_file, extract_pages, extract_sync, write_output};
pub use models::{list_vision_models, resolve_model_name, server_status, ServerStatus};
pub use output::{
    ExtractionOutput, ExtractionStats, FieldResult, MergedExtraction, PageExtraction, PageReport,
};
pub use pipeline::capability::{Capability, CapabilityRule, CapabilityRules, ModelMetadata};
pub use pipeline::load::{load_document, Document, LoadedDocument, MediaType, PageImage};
pub use pipeline::merge::merge_pages;
pub use pipeline::parse::parse_page;
pub use pipeline::vision::{
    connect, GenerateRequest, GenerationOptions, InstalledModel, ModelServer, OllamaServer,
    VisionClient,
};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use schema::{FieldSchema, FieldSpec};
