//! Extraction entry points: document → one confidence-scored record.
//!
//! Pages are sent to the model one at a time, in order. A document with a
//! single page is all-or-nothing; for several pages, a page that fails is
//! reported and left out of the merge, and only a document where every page
//! failed is an error.
//!
//! Classified failures are returned as `Err`. A panic after the document
//! loaded, from the capability check through the merge, is turned into a
//! degraded output with every field null, so callers always get a record of
//! the right shape back.

use crate::config::ExtractionConfig;
use crate::error::{ExtractError, PageError};
use crate::output::{
    ExtractionOutput, ExtractionStats, MergedExtraction, PageExtraction, PageReport,
};
use crate::pipeline::load::{load_document, Document, PageImage};
use crate::pipeline::merge::{first_additional_answer, merge_pages};
use crate::pipeline::parse::parse_page;
use crate::pipeline::vision::VisionClient;
use crate::prompts::{build_instruction, page_note};
use crate::schema::FieldSchema;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Extract the schema's fields from a document.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `document` — raw bytes plus declared media type
/// * `schema`   — fields to extract
/// * `question` — optional free-text question answered once per document
/// * `config`   — model, server and rendering settings
///
/// # Errors
/// Returns `Err(ExtractError)` for classified failures:
/// - unsupported media type, unreadable document
/// - text-only model, unreachable server, timeout (single page)
/// - unparseable answer (single page)
/// - every page failed (several pages)
///
/// # Example
/// ```rust,no_run
/// use edgequake_extract::{extract, Document, ExtractionConfig, FieldSchema};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let schema = FieldSchema::from_json_str(r#"{"iban": "Bank account IBAN"}"#)?;
/// let document = Document::from_file("statement.pdf").await?;
/// let output = extract(&document, &schema, None, &ExtractionConfig::default()).await?;
/// println!("{:?}", output.extraction.value("iban"));
/// # Ok(())
/// # }
/// ```
pub async fn extract(
    document: &Document,
    schema: &FieldSchema,
    question: Option<&str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let total_start = Instant::now();
    info!(
        "Starting extraction: {} ({} bytes), {} field(s), model '{}'",
        document.media_type.as_mime(),
        document.bytes.len(),
        schema.len(),
        config.model
    );

    // ── Step 1: Validate schema ──────────────────────────────────────────
    ensure_schema(schema)?;

    // ── Step 2: Load pages ───────────────────────────────────────────────
    let load_start = Instant::now();
    let loaded = load_document(document, config).await?;
    let stats = ExtractionStats {
        total_pages: loaded.total_pages,
        dropped_pages: loaded.dropped_pages,
        load_duration_ms: load_start.elapsed().as_millis() as u64,
        ..Default::default()
    };

    run(loaded.pages, stats, schema, question, config, total_start).await
}

/// Run the extraction on pages that were already loaded.
///
/// Useful when the caller renders pages itself. Pages are processed in the
/// order given.
pub async fn extract_pages(
    pages: Vec<PageImage>,
    schema: &FieldSchema,
    question: Option<&str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let total_start = Instant::now();
    ensure_schema(schema)?;
    if pages.is_empty() {
        return Err(ExtractError::DocumentLoadFailure {
            detail: "no pages to process".into(),
        });
    }
    let stats = ExtractionStats {
        total_pages: pages.len(),
        ..Default::default()
    };
    run(pages, stats, schema, question, config, total_start).await
}

/// Read a file and extract from it. The media type comes from the extension.
pub async fn extract_file(
    path: impl AsRef<Path>,
    schema: &FieldSchema,
    question: Option<&str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let document = Document::from_file(path).await?;
    extract(&document, schema, question, config).await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    document: &Document,
    schema: &FieldSchema,
    question: Option<&str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(document, schema, question, config))
}

/// Write the output as pretty JSON.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_output(
    output: &ExtractionOutput,
    path: impl AsRef<Path>,
) -> Result<(), ExtractError> {
    let path = path.as_ref();
    let write_err = |source| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_string_pretty(output)
        .map_err(|e| ExtractError::Internal(format!("Failed to serialise output: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn ensure_schema(schema: &FieldSchema) -> Result<(), ExtractError> {
    if schema.is_empty() {
        return Err(ExtractError::InvalidSchema(
            "at least one field is required".into(),
        ));
    }
    Ok(())
}

/// What the page loop produced.
struct PageRun {
    extraction: MergedExtraction,
    additional_answer: Option<String>,
    reports: Vec<PageReport>,
    model_duration_ms: u64,
}

async fn run(
    pages: Vec<PageImage>,
    mut stats: ExtractionStats,
    schema: &FieldSchema,
    question: Option<&str>,
    config: &ExtractionConfig,
    total_start: Instant,
) -> Result<ExtractionOutput, ExtractError> {
    let client = VisionClient::from_config(config)?;

    let outcome = AssertUnwindSafe(async {
        // ── Step 3: Check the model can see images ───────────────────────
        client.ensure_capable().await?;

        // ── Step 4: Per-page extraction + merge ──────────────────────────
        process_pages(&client, &pages, schema, question, config).await
    })
    .catch_unwind()
    .await;

    let page_run = match outcome {
        Ok(Ok(page_run)) => page_run,
        Ok(Err(e)) => return Err(e),
        Err(panic) => {
            let msg = panic_message(&*panic);
            return Ok(degraded(schema, &client, stats, msg, total_start));
        }
    };

    // ── Step 5: Stats ────────────────────────────────────────────────────
    stats.processed_pages = page_run.reports.iter().filter(|r| r.error.is_none()).count();
    stats.failed_pages = page_run.reports.len() - stats.processed_pages;
    stats.model_duration_ms = page_run.model_duration_ms;
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Extraction complete: {}/{} pages, confidence {}%, {}ms total",
        stats.processed_pages,
        page_run.reports.len(),
        page_run.extraction.confidence,
        stats.total_duration_ms
    );

    Ok(ExtractionOutput {
        extraction: page_run.extraction,
        additional_answer: page_run.additional_answer,
        model: client.model().to_string(),
        pages: page_run.reports,
        stats,
        error: None,
    })
}

async fn process_pages(
    client: &VisionClient,
    pages: &[PageImage],
    schema: &FieldSchema,
    question: Option<&str>,
    config: &ExtractionConfig,
) -> Result<PageRun, ExtractError> {
    let total = pages.len();
    let instruction = build_instruction(schema, question, config.instruction.as_deref());
    let cb = config.progress_callback.as_ref();

    if let Some(cb) = cb {
        cb.on_extraction_start(total);
    }

    // Single page: any failure is fatal and the page is the record.
    if let [page] = pages {
        if let Some(cb) = cb {
            cb.on_page_start(1, 1);
        }
        let start = Instant::now();
        let extracted = match extract_one(client, &instruction, page, schema).await {
            Ok(p) => p,
            Err(e) => {
                if let Some(cb) = cb {
                    cb.on_page_error(1, 1, &e.to_string());
                    cb.on_extraction_complete(1, 0);
                }
                return Err(e);
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let found = extracted.found_count();
        if let Some(cb) = cb {
            cb.on_page_complete(1, 1, found);
            cb.on_extraction_complete(1, 1);
        }
        let additional_answer = extracted.additional_answer.clone();
        let report = PageReport {
            page_index: page.index,
            confidence: Some(extracted.confidence),
            fields_found: found,
            duration_ms,
            error: None,
        };
        return Ok(PageRun {
            extraction: extracted.into_merged(),
            additional_answer,
            reports: vec![report],
            model_duration_ms: duration_ms,
        });
    }

    // Several pages: isolate failures, merge the rest.
    info!("Processing {} pages one at a time", total);
    let mut succeeded: Vec<PageExtraction> = Vec::with_capacity(total);
    let mut reports = Vec::with_capacity(total);
    let mut model_duration_ms = 0u64;

    for (pos, page) in pages.iter().enumerate() {
        let page_num = pos + 1;
        if let Some(cb) = cb {
            cb.on_page_start(page_num, total);
        }

        let prompt = format!("{instruction}{}", page_note(pos, total));
        let start = Instant::now();
        let result = extract_one(client, &prompt, page, schema).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        model_duration_ms += duration_ms;

        match result {
            Ok(extracted) => {
                let found = extracted.found_count();
                debug!(
                    "Page {}/{}: {} field(s) found, confidence {}%",
                    page_num, total, found, extracted.confidence
                );
                if let Some(cb) = cb {
                    cb.on_page_complete(page_num, total, found);
                }
                reports.push(PageReport {
                    page_index: page.index,
                    confidence: Some(extracted.confidence),
                    fields_found: found,
                    duration_ms,
                    error: None,
                });
                succeeded.push(extracted);
            }
            Err(e) => {
                let page_err = PageError::from_extract_error(page.index + 1, &e);
                warn!("Page {}/{} failed: {}", page_num, total, e);
                if let Some(cb) = cb {
                    cb.on_page_error(page_num, total, &page_err.to_string());
                }
                reports.push(PageReport {
                    page_index: page.index,
                    confidence: None,
                    fields_found: 0,
                    duration_ms,
                    error: Some(page_err),
                });
            }
        }
    }

    if let Some(cb) = cb {
        cb.on_extraction_complete(total, succeeded.len());
    }

    if succeeded.is_empty() {
        let first_error = reports
            .iter()
            .find_map(|r| r.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(ExtractError::NoPagesSucceeded { total, first_error });
    }

    let extraction = merge_pages(&succeeded, schema);
    let additional_answer = first_additional_answer(&succeeded);

    Ok(PageRun {
        extraction,
        additional_answer,
        reports,
        model_duration_ms,
    })
}

/// One model call + parse for one page.
async fn extract_one(
    client: &VisionClient,
    prompt: &str,
    page: &PageImage,
    schema: &FieldSchema,
) -> Result<PageExtraction, ExtractError> {
    let raw = client.invoke(prompt, page).await?;
    parse_page(&raw, schema, page.index)
}

fn degraded(
    schema: &FieldSchema,
    client: &VisionClient,
    mut stats: ExtractionStats,
    msg: String,
    total_start: Instant,
) -> ExtractionOutput {
    error!("Extraction failed unexpectedly: {}", msg);
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    ExtractionOutput {
        extraction: MergedExtraction::degraded(schema, format!("Error: {msg}")),
        additional_answer: None,
        model: client.model().to_string(),
        pages: Vec::new(),
        stats,
        error: Some(msg),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "pipeline panicked".to_string()
    }
}
