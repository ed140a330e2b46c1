//! Pipeline stages for document field extraction.
//!
//! Each submodule implements exactly one transformation step so it can be
//! tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! load ──▶ render ──▶ encode ──▶ vision ──▶ parse ──▶ merge
//! (bytes)  (pdfium)   (JPEG/b64)  (Ollama)   (JSON)    (max confidence)
//! ```
//!
//! 1. [`load`]       — resolve the media type and produce ordered page images
//! 2. [`render`]     — rasterise PDF pages; blocking, runs on the blocking pool
//! 3. [`encode`]     — cap the width, JPEG-encode and base64-wrap each page
//! 4. [`capability`] — decide from model metadata whether images are accepted
//! 5. [`vision`]     — one page + instruction per model call; the only stage
//!    with network I/O
//! 6. [`parse`]      — recover JSON from the answer and normalise every field
//! 7. [`merge`]      — reconcile pages field by field

pub mod capability;
pub mod encode;
pub mod load;
pub mod merge;
pub mod parse;
pub mod render;
pub mod vision;
