//! Text watermarks drawn with the bundled DejaVu Sans font.

use crate::error::{AppError, Result};
use crate::models::{WatermarkParams, WatermarkPosition, DEFAULT_WATERMARK_OPACITY, DEFAULT_WATERMARK_TEXT};
use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, Blend};

static FONT_BYTES: &[u8] = include_bytes!("../../../assets/DejaVuSans.ttf");

/// Margin kept between the text box and the anchored edges, in pixels.
const MARGIN: i32 = 20;

pub struct Watermarker {
    font: FontRef<'static>,
}

impl Watermarker {
    pub fn new() -> Result<Self> {
        let font = FontRef::try_from_slice(FONT_BYTES)
            .map_err(|e| AppError::Internal(format!("failed to load watermark font: {e}")))?;
        Ok(Self { font })
    }

    pub fn apply(&self, img: &DynamicImage, params: &WatermarkParams) -> Result<RgbaImage> {
        let text = if params.text.is_empty() {
            DEFAULT_WATERMARK_TEXT
        } else {
            params.text.as_str()
        };
        let opacity = if params.opacity > 0.0 {
            params.opacity
        } else {
            DEFAULT_WATERMARK_OPACITY
        };
        let font_size = if params.font_size > 0.0 {
            params.font_size
        } else {
            36.0
        };

        let color = parse_color(&params.font_color, opacity);
        let scale = PxScale::from(font_size as f32);
        let text_width = self.text_width(text, scale) as i32;
        let text_height = (font_size * 1.2) as i32;

        let (x, y) = anchor(
            WatermarkPosition::parse(&params.position),
            img.width() as i32,
            img.height() as i32,
            text_width,
            text_height,
            font_size as i32,
        );

        let mut canvas = Blend(img.to_rgba8());
        draw_text_mut(&mut canvas, color, x, y, scale, &self.font, text);
        Ok(canvas.0)
    }

    /// Measured from glyph horizontal advances.
    fn text_width(&self, text: &str, scale: PxScale) -> f32 {
        let scaled = self.font.as_scaled(scale);
        text.chars()
            .map(|c| scaled.h_advance(self.font.glyph_id(c)))
            .sum()
    }
}

/// Top-left corner of the drawn text for a given anchor position.
///
/// Top anchors sit one margin below the top edge; bottom anchors place
/// the text baseline one margin above the bottom edge. Unknown positions
/// fall back to bottom-right.
fn anchor(
    position: WatermarkPosition,
    width: i32,
    height: i32,
    text_width: i32,
    text_height: i32,
    font_size: i32,
) -> (i32, i32) {
    match position {
        WatermarkPosition::TopLeft => (MARGIN, MARGIN),
        WatermarkPosition::TopRight => (width - text_width - MARGIN, MARGIN),
        WatermarkPosition::TopCenter => ((width - text_width) / 2, MARGIN),
        WatermarkPosition::BottomLeft => (MARGIN, height - MARGIN - font_size),
        WatermarkPosition::BottomRight => (width - text_width - MARGIN, height - MARGIN - font_size),
        WatermarkPosition::BottomCenter => ((width - text_width) / 2, height - MARGIN - font_size),
        WatermarkPosition::Center => ((width - text_width) / 2, (height + text_height) / 2 - font_size),
    }
}

/// Parse "R,G,B" or "R,G,B,A" with components clamped to [0,255].
/// A missing alpha channel gets `round(255 * opacity)`; unparseable
/// colours fall back to white at the given opacity.
pub(crate) fn parse_color(color: &str, opacity: f64) -> Rgba<u8> {
    let fallback_alpha = (255.0 * opacity.clamp(0.0, 1.0)).round() as u8;
    let fallback = Rgba([255, 255, 255, fallback_alpha]);

    let cleaned = color.replace(' ', "");
    let parts: Vec<&str> = cleaned.split(',').collect();
    if parts.len() != 3 && parts.len() != 4 {
        return fallback;
    }

    let component = |raw: &str| raw.parse::<i64>().ok().map(|v| v.clamp(0, 255) as u8);
    match (component(parts[0]), component(parts[1]), component(parts[2])) {
        (Some(r), Some(g), Some(b)) => {
            let alpha = if parts.len() == 4 {
                component(parts[3]).unwrap_or(fallback_alpha)
            } else {
                fallback_alpha
            };
            Rgba([r, g, b, alpha])
        }
        _ => fallback,
    }
}
