//! Exact or aspect-preserving resize.

use super::scale;
use crate::error::{AppError, Result};
use crate::models::ResizeParams;
use image::{DynamicImage, GenericImageView, RgbaImage};

pub fn apply(img: &DynamicImage, params: &ResizeParams) -> Result<RgbaImage> {
    let width = params.width.ok_or_else(|| {
        AppError::OperationFailed("width parameter is required and must be a number".to_string())
    })?;
    let height = params.height.ok_or_else(|| {
        AppError::OperationFailed("height parameter is required and must be a number".to_string())
    })?;

    if width == 0 || height == 0 {
        return Err(AppError::OperationFailed(
            "width and height must be positive numbers".to_string(),
        ));
    }

    if params.keep_aspect {
        let (orig_width, orig_height) = img.dimensions();
        let (new_width, new_height) = fit_within(orig_width, orig_height, width, height);
        Ok(scale(img, new_width, new_height))
    } else {
        Ok(scale(img, width, height))
    }
}

/// Scale to fit entirely inside the requested box, preserving the
/// source ratio.
fn fit_within(orig_width: u32, orig_height: u32, width: u32, height: u32) -> (u32, u32) {
    let width_ratio = width as f64 / orig_width as f64;
    let height_ratio = height as f64 / orig_height as f64;
    let ratio = width_ratio.min(height_ratio);

    let new_width = (orig_width as f64 * ratio).round() as u32;
    let new_height = (orig_height as f64 * ratio).round() as u32;
    (new_width.max(1), new_height.max(1))
}
