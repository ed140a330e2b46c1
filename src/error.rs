//! Error types for the edgequake-extract library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`ExtractError`] — **Fatal**: the request cannot produce a record at all
//!   (unsupported file, unreadable document, model is text-only, every page
//!   failed). Returned as `Err(ExtractError)` from the `extract*` functions.
//!
//! * [`VisionError`] — a single call to the model server failed. Fatal when
//!   the document has one page, isolated to that page otherwise.
//!
//! * [`PageError`] — **Non-fatal**: one page of a multi-page document failed
//!   and was left out of the merge. Stored inside
//!   [`crate::output::PageReport`] so callers can see which pages contributed.

use std::path::PathBuf;
use thiserror::Error;

/// Model names suggested when the configured model cannot read images.
pub const SUGGESTED_VISION_MODELS: &str = "llama3.2-vision, llava, or bakllava";

/// First `max_chars` characters of `text`, for error messages.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// All fatal errors returned by the edgequake-extract library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The field schema is empty or malformed.
    #[error("Invalid field schema: {0}\nExpected a JSON object of the form {{\"field\": \"description\"}}.")]
    InvalidSchema(String),

    /// The declared media type is neither a PDF nor an image.
    #[error("Unsupported media type '{media_type}'\nSupported: application/pdf, image/png, image/jpeg.")]
    UnsupportedMediaType { media_type: String },

    /// Could not read the input file from disk.
    #[error("Failed to read '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Document errors ───────────────────────────────────────────────────
    /// The document could not be opened, rasterised or encoded.
    #[error("Failed to load document: {detail}")]
    DocumentLoadFailure { detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
PDF rasterisation needs the pdfium shared library. You can:\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n\
  • Place libpdfium next to the working directory.\n\
  • Install pdfium system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Model errors ──────────────────────────────────────────────────────
    /// A call to the model server failed.
    #[error(transparent)]
    Vision(#[from] VisionError),

    /// The model answered, but no JSON object could be recovered from it.
    #[error("Could not parse JSON from the model response. Raw: {excerpt}")]
    MalformedResponse { excerpt: String },

    /// Every page of a multi-page document failed.
    #[error("Failed to process any page of the document ({total} attempted).\nFirst error: {first_error}")]
    NoPagesSucceeded { total: usize, first_error: String },

    // ── Config / IO errors ────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single request to the model server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VisionError {
    /// The model has no image encoder; sending the page would be wasted.
    #[error("Model '{model}' does not support vision/image input. Please select a vision-capable model like: {suggestions}.", suggestions = SUGGESTED_VISION_MODELS)]
    NotVisionCapable { model: String },

    /// The model server could not be reached.
    #[error("Could not reach the model server at {url}: {detail}\nIs Ollama running? Start it with: ollama serve")]
    Unreachable { url: String, detail: String },

    /// The call exceeded the per-call timeout.
    #[error("Model request timed out after {secs}s. Try a smaller document or a faster model.")]
    Timeout { secs: u64 },

    /// HTTP 400 — usually an oversized or invalid image.
    #[error("Bad request to the model server: {detail}\nPossible causes: image too large or invalid format. Try a smaller/simpler document.")]
    BadRequest { detail: String },

    /// HTTP 413.
    #[error("Payload too large for the model server. The document images are too big; lower the DPI or max width.")]
    PayloadTooLarge,

    /// HTTP 5xx — the model may have crashed.
    #[error("Model server internal error (HTTP {status}): {detail}\nThe model might have crashed. Try restarting Ollama: ollama serve")]
    ServerError { status: u16, detail: String },

    /// Any other non-success HTTP status.
    #[error("Model server returned HTTP {status}: {detail}")]
    Api { status: u16, detail: String },

    /// The server answered with a body we could not decode.
    #[error("Invalid response from the model server: {0}")]
    InvalidResponse(String),
}

/// A non-fatal error for a single page.
///
/// The overall extraction continues unless ALL pages fail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The model call for the page failed.
    #[error("Page {page}: model call failed: {detail}")]
    ModelCall { page: usize, detail: String },

    /// The model answered, but the answer could not be parsed.
    #[error("Page {page}: could not parse model response: {excerpt}")]
    Malformed { page: usize, excerpt: String },
}

impl PageError {
    /// Convert a page-level failure into its non-fatal form.
    ///
    /// `page` is 1-indexed.
    pub fn from_extract_error(page: usize, err: &ExtractError) -> Self {
        match err {
            ExtractError::MalformedResponse { excerpt } => PageError::Malformed {
                page,
                excerpt: excerpt.clone(),
            },
            other => PageError::ModelCall {
                page,
                detail: other.to_string(),
            },
        }
    }
}
