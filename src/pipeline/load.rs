//! Document loading: bytes + media type → ordered, model-ready page images.
//!
//! A single image becomes exactly one page. A PDF is rasterised page by page
//! (see [`crate::pipeline::render`]), capped at `max_pages`. Everything runs
//! in memory on the blocking pool; no intermediate files are written.
//!
//! Any failure here is fatal for the request: there are no partial loads.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::pipeline::{encode, render};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What kind of document the bytes are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaType {
    Pdf,
    /// An `image/*` type, e.g. `image/png`.
    Image(String),
}

impl MediaType {
    /// Resolve a declared MIME type.
    pub fn from_mime(mime: &str) -> Result<Self, ExtractError> {
        let m = mime.trim().to_ascii_lowercase();
        if m == "application/pdf" {
            Ok(MediaType::Pdf)
        } else if m.starts_with("image/") && m.len() > "image/".len() {
            Ok(MediaType::Image(m))
        } else {
            Err(ExtractError::UnsupportedMediaType {
                media_type: mime.to_string(),
            })
        }
    }

    /// Infer the media type from a file extension (`pdf`, `png`, `jpg`, `jpeg`).
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(MediaType::Pdf),
            "png" => Ok(MediaType::Image("image/png".into())),
            "jpg" | "jpeg" => Ok(MediaType::Image("image/jpeg".into())),
            _ => Err(ExtractError::UnsupportedMediaType {
                media_type: if ext.is_empty() {
                    format!("{} (no extension)", path.display())
                } else {
                    format!(".{ext}")
                },
            }),
        }
    }

    pub fn as_mime(&self) -> &str {
        match self {
            MediaType::Pdf => "application/pdf",
            MediaType::Image(m) => m,
        }
    }
}

/// Raw document as supplied by the caller.
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub media_type: MediaType,
}

impl Document {
    pub fn new(bytes: Vec<u8>, media_type: MediaType) -> Self {
        Self { bytes, media_type }
    }

    /// Build from bytes and a declared MIME type.
    pub fn from_mime(bytes: Vec<u8>, mime: &str) -> Result<Self, ExtractError> {
        Ok(Self::new(bytes, MediaType::from_mime(mime)?))
    }

    /// Read a file, inferring the media type from its extension.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ExtractError> {
        let path = path.as_ref();
        let media_type = MediaType::from_path(path)?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ExtractError::FileRead {
                path: PathBuf::from(path),
                source,
            })?;
        Ok(Self::new(bytes, media_type))
    }
}

/// One page ready for the vision model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 0-based page index within the source document.
    pub index: usize,
    /// Base64-encoded image bytes.
    pub data: String,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
}

/// Result of loading a document.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// Pages in document order.
    pub pages: Vec<PageImage>,
    /// Page count of the source document.
    pub total_pages: usize,
    /// Pages beyond `max_pages` that were not rendered.
    pub dropped_pages: usize,
}

/// Load a document into page images.
///
/// # Errors
/// * [`ExtractError::DocumentLoadFailure`] — unreadable PDF or image
/// * [`ExtractError::PdfiumBindingFailed`] — no pdfium library for a PDF
pub async fn load_document(
    document: &Document,
    config: &ExtractionConfig,
) -> Result<LoadedDocument, ExtractError> {
    let bytes = document.bytes.clone();
    let media_type = document.media_type.clone();
    let dpi = config.dpi;
    let max_pages = config.max_pages;
    let max_width = config.max_width;
    let quality = config.jpeg_quality;

    let loaded = tokio::task::spawn_blocking(move || match media_type {
        MediaType::Pdf => load_pdf_blocking(&bytes, dpi, max_pages, max_width, quality),
        MediaType::Image(mime) => load_image_blocking(bytes, &mime, max_width, quality),
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("Load task panicked: {e}")))??;

    info!(
        "Loaded {} page(s) ({} in document, {} dropped)",
        loaded.pages.len(),
        loaded.total_pages,
        loaded.dropped_pages
    );
    Ok(loaded)
}

fn load_pdf_blocking(
    bytes: &[u8],
    dpi: u32,
    max_pages: usize,
    max_width: u32,
    quality: u8,
) -> Result<LoadedDocument, ExtractError> {
    if !bytes.starts_with(b"%PDF") {
        return Err(ExtractError::DocumentLoadFailure {
            detail: "not a PDF file (missing %PDF header)".into(),
        });
    }

    let rendered = render::render_pdf_blocking(bytes, dpi, max_pages)?;
    let dropped_pages = rendered.total_pages.saturating_sub(rendered.pages.len());

    let pages = rendered
        .pages
        .into_iter()
        .map(|(idx, img)| {
            encode::encode_page(img, idx, max_width, quality).map_err(|e| {
                ExtractError::DocumentLoadFailure {
                    detail: format!("page {} could not be encoded: {e}", idx + 1),
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(LoadedDocument {
        pages,
        total_pages: rendered.total_pages,
        dropped_pages,
    })
}

/// Decode to validate; re-encode only when wider than `max_width`.
fn load_image_blocking(
    bytes: Vec<u8>,
    declared_mime: &str,
    max_width: u32,
    quality: u8,
) -> Result<LoadedDocument, ExtractError> {
    let img = image::load_from_memory(&bytes).map_err(|e| ExtractError::DocumentLoadFailure {
        detail: format!("could not decode image: {e}"),
    })?;

    let page = if img.width() > max_width {
        encode::encode_page(img, 0, max_width, quality).map_err(|e| {
            ExtractError::DocumentLoadFailure {
                detail: format!("could not re-encode image: {e}"),
            }
        })?
    } else {
        let mime_type = image::guess_format(&bytes)
            .map(|f| f.to_mime_type().to_string())
            .unwrap_or_else(|_| declared_mime.to_string());
        debug!(
            "Image {}x{} within width limit, passing through as {}",
            img.width(),
            img.height(),
            mime_type
        );
        PageImage {
            index: 0,
            data: STANDARD.encode(&bytes),
            mime_type,
            width: img.width(),
            height: img.height(),
        }
    };

    Ok(LoadedDocument {
        pages: vec![page],
        total_pages: 1,
        dropped_pages: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([255, 255, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn mime_resolution() {
        assert_eq!(MediaType::from_mime("application/pdf").unwrap(), MediaType::Pdf);
        assert_eq!(
            MediaType::from_mime("Image/PNG").unwrap(),
            MediaType::Image("image/png".into())
        );
        assert!(matches!(
            MediaType::from_mime("text/plain"),
            Err(ExtractError::UnsupportedMediaType { .. })
        ));
        assert!(MediaType::from_mime("image/").is_err());
    }

    #[test]
    fn extension_resolution() {
        assert_eq!(MediaType::from_path(Path::new("a/scan.PDF")).unwrap(), MediaType::Pdf);
        assert_eq!(
            MediaType::from_path(Path::new("photo.jpeg")).unwrap().as_mime(),
            "image/jpeg"
        );
        assert!(MediaType::from_path(Path::new("notes.txt")).is_err());
        assert!(MediaType::from_path(Path::new("README")).is_err());
    }

    #[tokio::test]
    async fn small_image_passes_through_unchanged() {
        let bytes = png_bytes(40, 20);
        let doc = Document::from_mime(bytes.clone(), "image/png").unwrap();
        let loaded = load_document(&doc, &ExtractionConfig::default()).await.unwrap();
        assert_eq!(loaded.pages.len(), 1);
        let page = &loaded.pages[0];
        assert_eq!(page.mime_type, "image/png");
        assert_eq!((page.width, page.height), (40, 20));
        assert_eq!(STANDARD.decode(&page.data).unwrap(), bytes);
    }

    #[tokio::test]
    async fn wide_image_is_downscaled_to_jpeg() {
        let doc = Document::from_mime(png_bytes(400, 100), "image/png").unwrap();
        let config = ExtractionConfig::builder().max_width(200).build().unwrap();
        let loaded = load_document(&doc, &config).await.unwrap();
        let page = &loaded.pages[0];
        assert_eq!(page.mime_type, "image/jpeg");
        assert_eq!((page.width, page.height), (200, 50));
    }

    #[tokio::test]
    async fn garbage_image_is_a_load_failure() {
        let doc = Document::from_mime(b"definitely not an image".to_vec(), "image/png").unwrap();
        let err = load_document(&doc, &ExtractionConfig::default()).await.unwrap_err();
        assert!(matches!(err, ExtractError::DocumentLoadFailure { .. }));
    }

    #[tokio::test]
    async fn pdf_without_header_is_rejected_before_pdfium() {
        let doc = Document::new(b"PK\x03\x04zip".to_vec(), MediaType::Pdf);
        let err = load_document(&doc, &ExtractionConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("%PDF"), "got: {err}");
    }

    #[tokio::test]
    async fn missing_file_is_file_read_error() {
        let err = Document::from_file("/definitely/not/here.png").await.unwrap_err();
        assert!(matches!(err, ExtractError::FileRead { .. }));
    }
}
