/// Data models for the image service
///
/// - Image: one row per uploaded asset
/// - ProcessedImage: one row per derived artifact
/// - ProcessingTask / ProcessingResult: broker payloads (see `task`)
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod task;

pub use task::{
    OperationParams, ProcessingResult, ProcessingTask, ResizeParams, ThumbnailParams,
    WatermarkParams, WatermarkPosition,
};

/// Maximum accepted upload size in bytes (32 MiB).
pub const MAX_UPLOAD_SIZE: usize = 32 << 20;

/// Default square edge for thumbnails.
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 200;

/// JPEG encoder quality used for every JPEG artifact.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

pub const DEFAULT_WATERMARK_TEXT: &str = "© ImageProcessor";
pub const DEFAULT_WATERMARK_OPACITY: f64 = 0.5;

/// Image lifecycle status
///
/// `Failed -> Processing` is forbidden and `Deleted` is terminal; the
/// repository enforces both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
    Deleted,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(Self::Uploaded),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Supported transform operations.
///
/// Crop, rotate, flip and grayscale are declared for wire compatibility
/// but have no implementation; tasks carrying them fail with an
/// unsupported-operation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Thumbnail,
    Resize,
    Watermark,
    Crop,
    Rotate,
    Flip,
    Grayscale,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thumbnail => "thumbnail",
            Self::Resize => "resize",
            Self::Watermark => "watermark",
            Self::Crop => "crop",
            Self::Rotate => "rotate",
            Self::Flip => "flip",
            Self::Grayscale => "grayscale",
        }
    }
}

/// Canonical source/target format tag carried on tasks and artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Jpg,
    Png,
    Gif,
    Webp,
    Bmp,
    Tiff,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Jpg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Jpeg | Self::Jpg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Bmp => "image/bmp",
            Self::Tiff => "image/tiff",
        }
    }

    pub fn from_mime(mime: &str) -> Self {
        if mime.contains("jpeg") {
            Self::Jpeg
        } else if mime.contains("png") {
            Self::Png
        } else if mime.contains("gif") {
            Self::Gif
        } else if mime.contains("webp") {
            Self::Webp
        } else if mime.contains("bmp") {
            Self::Bmp
        } else if mime.contains("tiff") {
            Self::Tiff
        } else {
            Self::Jpeg
        }
    }
}

/// Uploaded asset record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Image {
    pub id: Uuid,
    pub original_filename: String,
    pub original_size: i64,
    pub mime_type: String,
    pub status: String,
    pub original_path: String,
    pub bucket: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Image {
    pub fn status(&self) -> ImageStatus {
        ImageStatus::parse(&self.status).unwrap_or(ImageStatus::Uploaded)
    }
}

/// Derived artifact record; at most one logical row per
/// `(image_id, operation)`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessedImage {
    pub id: Uuid,
    pub image_id: Uuid,
    pub operation: String,
    pub path: String,
    pub size: i64,
    pub mime_type: String,
    pub format: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}
