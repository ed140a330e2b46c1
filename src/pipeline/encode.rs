//! Image encoding: `DynamicImage` → width-capped JPEG → base64 [`PageImage`].
//!
//! The width cap defaults to 1344 px, the tile size of common vision models.

use crate::pipeline::load::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;

/// Downscale `img` to `max_width` pixels wide, preserving aspect ratio.
///
/// Images already within the limit are returned unchanged.
pub fn fit_width(img: DynamicImage, max_width: u32) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    if w <= max_width || w == 0 {
        return img;
    }
    let new_h = ((h as u64 * max_width as u64) / w as u64).max(1) as u32;
    debug!("Resizing {}x{} → {}x{}", w, h, max_width, new_h);
    img.resize_exact(max_width, new_h, FilterType::Lanczos3)
}

/// Encode as baseline JPEG. Alpha is dropped.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)))?;
    Ok(buf)
}

/// Resize, JPEG-encode and base64-wrap one rendered page.
pub fn encode_page(
    img: DynamicImage,
    index: usize,
    max_width: u32,
    quality: u8,
) -> Result<PageImage, image::ImageError> {
    let img = fit_width(img, max_width);
    let (width, height) = (img.width(), img.height());
    let jpeg = encode_jpeg(&img, quality)?;
    let data = STANDARD.encode(&jpeg);
    debug!(
        "Encoded page {} → {}x{} JPEG, {} bytes base64",
        index + 1,
        width,
        height,
        data.len()
    );
    Ok(PageImage {
        index,
        data,
        mime_type: "image/jpeg".to_string(),
        width,
        height,
    })
}
