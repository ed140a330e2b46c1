//! PDF rasterisation: render the first pages of a PDF to `DynamicImage` via pdfium.
//!
//! pdfium is a C++ library with thread-local state; every call here is
//! blocking and must run inside `tokio::task::spawn_blocking` (see
//! [`crate::pipeline::load::load_document`]).

use crate::error::ExtractError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, info, warn};

/// Environment variable naming an explicit pdfium library file.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Rendered pages plus the document's true page count.
#[derive(Debug)]
pub struct RenderedPdf {
    /// `(page_index_0based, image)` for each rendered page, in order.
    pub pages: Vec<(usize, DynamicImage)>,
    /// Page count of the document, including pages beyond the cap.
    pub total_pages: usize,
}

/// Bind to a pdfium library.
///
/// Order: `PDFIUM_LIB_PATH`, a library in the working directory, then the
/// system library.
pub fn bind_pdfium() -> Result<Pdfium, ExtractError> {
    if let Ok(path) = std::env::var(PDFIUM_LIB_PATH_ENV) {
        if !path.is_empty() {
            return Pdfium::bind_to_library(&path)
                .map(Pdfium::new)
                .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{path}: {e:?}")));
        }
    }

    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{e:?}")))
}

/// Render at most `max_pages` pages of the PDF in `bytes` at `dpi`.
///
/// Blocking. Pages beyond the cap are skipped with a warning.
pub fn render_pdf_blocking(
    bytes: &[u8],
    dpi: u32,
    max_pages: usize,
) -> Result<RenderedPdf, ExtractError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| ExtractError::DocumentLoadFailure {
            detail: format!("could not open PDF: {e:?}"),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    if total_pages == 0 {
        return Err(ExtractError::DocumentLoadFailure {
            detail: "PDF has no pages".into(),
        });
    }

    let keep = total_pages.min(max_pages);
    if keep < total_pages {
        warn!(
            "PDF has {} pages, only the first {} will be processed",
            total_pages, keep
        );
    }

    let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

    let mut rendered = Vec::with_capacity(keep);
    for idx in 0..keep {
        let page = pages
            .get(idx as u16)
            .map_err(|e| ExtractError::DocumentLoadFailure {
                detail: format!("page {}: {e:?}", idx + 1),
            })?;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ExtractError::DocumentLoadFailure {
                detail: format!("page {} could not be rendered: {e:?}", idx + 1),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} at {} DPI → {}x{} px",
            idx + 1,
            dpi,
            image.width(),
            image.height()
        );
        rendered.push((idx, image));
    }

    Ok(RenderedPdf {
        pages: rendered,
        total_pages,
    })
}
