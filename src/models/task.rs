/// Broker payloads: processing tasks and their results.
use super::{ImageFormat, ImageStatus, OperationType, DEFAULT_THUMBNAIL_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A queued unit of work: one uploaded image plus the ordered transforms
/// to apply. Serialized as JSON; the key of the broker message is the
/// image id so all tasks for one asset stay on one partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub id: Uuid,
    pub image_id: Uuid,
    pub original_path: String,
    pub bucket: String,
    pub operations: Vec<OperationParams>,
    #[serde(default)]
    pub format: Option<ImageFormat>,
}

/// Transform parameters, discriminated by operation type.
///
/// Crop/rotate/flip/grayscale deserialize (older producers may emit
/// them) but the engine rejects them, failing the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "parameters", rename_all = "lowercase")]
pub enum OperationParams {
    Thumbnail(ThumbnailParams),
    Resize(ResizeParams),
    Watermark(WatermarkParams),
    Crop(serde_json::Value),
    Rotate(serde_json::Value),
    Flip(serde_json::Value),
    Grayscale(serde_json::Value),
}

impl OperationParams {
    pub fn operation_type(&self) -> OperationType {
        match self {
            Self::Thumbnail(_) => OperationType::Thumbnail,
            Self::Resize(_) => OperationType::Resize,
            Self::Watermark(_) => OperationType::Watermark,
            Self::Crop(_) => OperationType::Crop,
            Self::Rotate(_) => OperationType::Rotate,
            Self::Flip(_) => OperationType::Flip,
            Self::Grayscale(_) => OperationType::Grayscale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailParams {
    /// Square target edge in pixels.
    #[serde(default = "default_thumbnail_size")]
    pub size: u32,
    /// Center-crop to a square before scaling.
    #[serde(default)]
    pub crop_to_fit: bool,
}

impl Default for ThumbnailParams {
    fn default() -> Self {
        Self {
            size: DEFAULT_THUMBNAIL_SIZE,
            crop_to_fit: false,
        }
    }
}

fn default_thumbnail_size() -> u32 {
    DEFAULT_THUMBNAIL_SIZE
}

/// Width and height are required; absence is rejected by the engine so
/// the task fails rather than the whole payload being poison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResizeParams {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// Fit inside the requested box, preserving the source ratio.
    #[serde(default)]
    pub keep_aspect: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkParams {
    #[serde(default = "default_watermark_text")]
    pub text: String,
    #[serde(default = "default_watermark_opacity")]
    pub opacity: f64,
    #[serde(default = "default_watermark_position")]
    pub position: String,
    #[serde(default = "default_font_size")]
    pub font_size: f64,
    /// "R,G,B" or "R,G,B,A", components clamped to [0,255].
    #[serde(default = "default_font_color")]
    pub font_color: String,
}

impl Default for WatermarkParams {
    fn default() -> Self {
        Self {
            text: default_watermark_text(),
            opacity: default_watermark_opacity(),
            position: default_watermark_position(),
            font_size: default_font_size(),
            font_color: default_font_color(),
        }
    }
}

fn default_watermark_text() -> String {
    super::DEFAULT_WATERMARK_TEXT.to_string()
}

fn default_watermark_opacity() -> f64 {
    super::DEFAULT_WATERMARK_OPACITY
}

fn default_watermark_position() -> String {
    WatermarkPosition::BottomRight.as_str().to_string()
}

fn default_font_size() -> f64 {
    36.0
}

fn default_font_color() -> String {
    "255,255,255".to_string()
}

/// Watermark anchor; unknown strings fall back to the bottom-right
/// corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    TopCenter,
    BottomLeft,
    BottomRight,
    BottomCenter,
    Center,
}

impl WatermarkPosition {
    pub fn parse(s: &str) -> Self {
        match s {
            "top-left" => Self::TopLeft,
            "top-right" => Self::TopRight,
            "top-center" => Self::TopCenter,
            "bottom-left" => Self::BottomLeft,
            "bottom-right" => Self::BottomRight,
            "bottom-center" => Self::BottomCenter,
            "center" => Self::Center,
            _ => Self::BottomRight,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopLeft => "top-left",
            Self::TopRight => "top-right",
            Self::TopCenter => "top-center",
            Self::BottomLeft => "bottom-left",
            Self::BottomRight => "bottom-right",
            Self::BottomCenter => "bottom-center",
            Self::Center => "center",
        }
    }
}

/// Outcome of one task, published to the results topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub id: Uuid,
    pub image_id: Uuid,
    pub status: ImageStatus,
    /// operation name -> derived object path
    pub processed_paths: HashMap<String, String>,
    /// Empty on success.
    #[serde(default)]
    pub error: String,
}
