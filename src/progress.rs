//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the orchestrator works through each page.
//!
//! Callers can forward events to a channel, a log, or a terminal progress bar
//! without the library knowing how the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use edgequake_extract::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, fields_found: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{}: {} fields", page_num, total_pages, fields_found);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the orchestrator as it processes each page.
///
/// Pages are processed one at a time, so events for a request never overlap.
/// Implementations must still be `Send + Sync` because the callback lives in
/// a shareable [`crate::ExtractionConfig`]. All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once after the document is loaded, before the first model call.
    ///
    /// # Arguments
    /// * `total_pages` — number of pages that will be sent to the model
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the model request is sent for a page.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — pages in this request
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page was extracted and parsed.
    ///
    /// # Arguments
    /// * `page_num`     — 1-indexed page number
    /// * `total_pages`  — pages in this request
    /// * `fields_found` — fields with a non-empty value on this page
    fn on_page_complete(&self, page_num: usize, total_pages: usize, fields_found: usize) {
        let _ = (page_num, total_pages, fields_found);
    }

    /// Called when a page failed (model error or unparseable answer).
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after all pages have been attempted.
    ///
    /// # Arguments
    /// * `total_pages`   — pages in this request
    /// * `success_count` — pages that contributed to the merged record
    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
