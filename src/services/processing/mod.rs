//! Transform engine: decode bytes, dispatch per operation variant,
//! re-encode.
//!
//! Every operation reads the same decoded source image and produces a
//! fresh output buffer; nothing mutates shared pixels between
//! operations. Derived object paths are deterministic per
//! `(image_id, operation, params)` so replays overwrite instead of
//! accumulating.

use crate::error::{AppError, Result};
use crate::models::{OperationParams, DEFAULT_JPEG_QUALITY, DEFAULT_THUMBNAIL_SIZE};
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use uuid::Uuid;

pub mod resize;
pub mod thumbnail;
pub mod watermark;

pub use watermark::Watermarker;

pub struct ProcessingEngine {
    watermarker: Watermarker,
}

impl ProcessingEngine {
    pub fn new() -> Result<Self> {
        Ok(Self {
            watermarker: Watermarker::new()?,
        })
    }

    /// Decode via format auto-detection; returns the pixels and the
    /// detected format tag.
    pub fn decode(data: &[u8]) -> Result<(DynamicImage, String)> {
        let format = image::guess_format(data)
            .map(format_name)
            .unwrap_or("jpeg")
            .to_string();
        let img = image::load_from_memory(data)
            .map_err(|e| AppError::Decode(format!("failed to decode image: {e}")))?;
        Ok((img, format))
    }

    /// Apply one operation against the decoded source, returning the
    /// encoded bytes and the resulting format tag.
    pub fn apply(
        &self,
        img: &DynamicImage,
        target_format: &str,
        operation: &OperationParams,
    ) -> Result<(Bytes, String)> {
        match operation {
            OperationParams::Thumbnail(params) => {
                encode(thumbnail::apply(img, params)?, target_format)
            }
            OperationParams::Resize(params) => encode(resize::apply(img, params)?, target_format),
            OperationParams::Watermark(params) => {
                // Animation is not preserved: watermarked GIFs flatten to
                // JPEG.
                let format = if target_format.eq_ignore_ascii_case("gif") {
                    "jpeg"
                } else {
                    target_format
                };
                encode(self.watermarker.apply(img, params)?, format)
            }
            other => Err(AppError::UnsupportedOperation(
                other.operation_type().as_str().to_string(),
            )),
        }
    }

    /// Deterministic object key for a derived artifact.
    pub fn derived_path(image_id: Uuid, operation: &OperationParams, format: &str) -> String {
        match operation {
            OperationParams::Thumbnail(params) => {
                let size = if params.size == 0 {
                    DEFAULT_THUMBNAIL_SIZE
                } else {
                    params.size
                };
                format!("processed/thumbnails/{image_id}/{size}.{format}")
            }
            OperationParams::Resize(params) => format!(
                "processed/resize/{image_id}/{}x{}.{format}",
                params.width.unwrap_or(0),
                params.height.unwrap_or(0)
            ),
            OperationParams::Watermark(_) => {
                format!("processed/watermarked/{image_id}/watermarked.{format}")
            }
            other => format!(
                "processed/{}/{image_id}/processed.{format}",
                other.operation_type().as_str()
            ),
        }
    }
}

/// Bilinear scale over the full source bounds into a freshly allocated
/// RGBA buffer.
pub(crate) fn scale(img: &DynamicImage, width: u32, height: u32) -> RgbaImage {
    image::imageops::resize(img, width.max(1), height.max(1), FilterType::Triangle)
}

/// Encode per the format mapping: `jpg|jpeg -> JPEG q85`, `png`, `gif`,
/// anything else falls back to JPEG q85.
pub(crate) fn encode(buffer: RgbaImage, format: &str) -> Result<(Bytes, String)> {
    let mut out = Vec::new();
    let mut cursor = Cursor::new(&mut out);

    let resulting = match format.to_lowercase().as_str() {
        "png" => {
            DynamicImage::ImageRgba8(buffer)
                .write_to(&mut cursor, ImageFormat::Png)
                .map_err(|e| AppError::OperationFailed(format!("failed to encode png: {e}")))?;
            "png"
        }
        "gif" => {
            DynamicImage::ImageRgba8(buffer)
                .write_to(&mut cursor, ImageFormat::Gif)
                .map_err(|e| AppError::OperationFailed(format!("failed to encode gif: {e}")))?;
            "gif"
        }
        // "jpg", "jpeg" and everything unrecognised.
        _ => {
            // The JPEG encoder has no alpha channel to write into.
            let rgb = DynamicImage::ImageRgba8(buffer).to_rgb8();
            DynamicImage::ImageRgb8(rgb)
                .write_with_encoder(JpegEncoder::new_with_quality(&mut cursor, DEFAULT_JPEG_QUALITY))
                .map_err(|e| AppError::OperationFailed(format!("failed to encode jpeg: {e}")))?;
            "jpeg"
        }
    };

    Ok((Bytes::from(out), resulting.to_string()))
}

fn format_name(format: image::ImageFormat) -> &'static str {
    match format {
        image::ImageFormat::Jpeg => "jpeg",
        image::ImageFormat::Png => "png",
        image::ImageFormat::Gif => "gif",
        image::ImageFormat::WebP => "webp",
        image::ImageFormat::Bmp => "bmp",
        image::ImageFormat::Tiff => "tiff",
        _ => "jpeg",
    }
}
