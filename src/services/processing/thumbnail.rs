//! Square-ish thumbnails: either center-cropped to a square or scaled so
//! the short edge matches the target.

use super::scale;
use crate::error::{AppError, Result};
use crate::models::ThumbnailParams;
use image::{DynamicImage, GenericImageView, RgbaImage};

pub fn apply(img: &DynamicImage, params: &ThumbnailParams) -> Result<RgbaImage> {
    let size = params.size;
    if size == 0 {
        return Err(AppError::OperationFailed(
            "size must be a positive number".to_string(),
        ));
    }

    if params.crop_to_fit {
        return Ok(crop_and_resize(img, size));
    }

    let (orig_width, orig_height) = img.dimensions();
    let (new_width, new_height) = fit_short_edge(orig_width, orig_height, size);
    Ok(scale(img, new_width, new_height))
}

/// Short edge becomes `size`; the long edge keeps the source ratio,
/// truncated toward zero.
fn fit_short_edge(orig_width: u32, orig_height: u32, size: u32) -> (u32, u32) {
    if orig_width > orig_height {
        let width = (orig_width as f64 * size as f64 / orig_height as f64) as u32;
        (width, size)
    } else {
        let height = (orig_height as f64 * size as f64 / orig_width as f64) as u32;
        (size, height)
    }
}

/// Largest centred square (long edge cropped symmetrically), scaled down
/// to `size`x`size`.
fn crop_and_resize(img: &DynamicImage, size: u32) -> RgbaImage {
    let (orig_width, orig_height) = img.dimensions();

    let (crop_x, crop_y, crop_size) = if orig_width > orig_height {
        ((orig_width - orig_height) / 2, 0, orig_height)
    } else {
        (0, (orig_height - orig_width) / 2, orig_width)
    };

    let cropped = img.crop_imm(crop_x, crop_y, crop_size, crop_size);
    scale(&cropped, size, size)
}
