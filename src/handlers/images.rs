//! Image endpoints: multipart upload, original/variant fetch, status,
//! delete and listing.

use crate::error::{AppError, Result};
use crate::models::{Image, OperationParams, ResizeParams, ThumbnailParams, WatermarkParams, MAX_UPLOAD_SIZE};
use crate::services::IngestService;
use crate::storage::path::sanitize_filename;
use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpResponse};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ALLOWED_EXTENSIONS: [&str; 7] = [".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp", ".tiff"];

/// Upper bound for non-file form values.
const MAX_FIELD_LEN: usize = 1024;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: Uuid,
    pub filename: String,
    pub status: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

impl From<Image> for UploadResponse {
    fn from(image: Image) -> Self {
        Self {
            id: image.id,
            filename: image.original_filename,
            status: image.status,
            size: image.original_size,
            created_at: image.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub id: Uuid,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct GetImageQuery {
    #[serde(default)]
    pub operation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default)]
struct UploadForm {
    file: Option<Vec<u8>>,
    filename: Option<String>,
    content_type: String,
    thumbnail: bool,
    resize: bool,
    watermark: bool,
    watermark_text: Option<String>,
}

/// POST /api/images/upload
pub async fn upload_image(
    service: web::Data<IngestService>,
    payload: Multipart,
) -> Result<HttpResponse> {
    let form = read_upload_form(payload).await?;

    let operations = requested_operations(&form);

    let data = form
        .file
        .ok_or_else(|| AppError::BadRequest("File is required".to_string()))?;
    let filename = form
        .filename
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::BadRequest("File is required".to_string()))?;

    validate_file(&filename, &form.content_type, data.len())?;

    let image = service
        .upload(Bytes::from(data), &filename, &form.content_type, operations)
        .await?;

    tracing::info!(
        image_id = %image.id,
        filename = %image.original_filename,
        status = %image.status,
        "Image uploaded successfully"
    );

    Ok(HttpResponse::Accepted().json(UploadResponse::from(image)))
}

/// GET /api/images/{id}?operation=
pub async fn get_image(
    service: web::Data<IngestService>,
    id: web::Path<String>,
    query: web::Query<GetImageQuery>,
) -> Result<HttpResponse> {
    let id = parse_image_id(&id)?;
    let operation = query.operation.clone().unwrap_or_default();

    let (image, data) = service.get_image(id, &operation).await?;

    let filename = download_filename(&image.original_filename, &operation);
    Ok(HttpResponse::Ok()
        .content_type(image.mime_type)
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", filename),
        ))
        .insert_header((header::CACHE_CONTROL, "public, max-age=3600"))
        .body(data))
}

/// GET /api/images/{id}/status
pub async fn get_status(
    service: web::Data<IngestService>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let id = parse_image_id(&id)?;
    let status = service.get_status(id).await?;
    Ok(HttpResponse::Ok().json(StatusResponse {
        id,
        status: status.as_str().to_string(),
    }))
}

/// DELETE /api/images/{id}
pub async fn delete_image(
    service: web::Data<IngestService>,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let id = parse_image_id(&id)?;
    service.delete_image(id).await?;
    tracing::info!(image_id = %id, "Image deleted");
    Ok(HttpResponse::NoContent().finish())
}

/// GET /api/images
pub async fn list_images(
    service: web::Data<IngestService>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);
    let images = service.list_images(limit, offset).await?;
    let response: Vec<UploadResponse> = images.into_iter().map(UploadResponse::from).collect();
    Ok(HttpResponse::Ok().json(response))
}

async fn read_upload_form(mut payload: Multipart) -> Result<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::BadRequest(format!("Invalid request format: {e}")))?;

        let disposition = field.content_disposition();
        let name = disposition.get_name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                form.filename = disposition.get_filename().map(str::to_string);
                form.content_type = field
                    .content_type()
                    .map(|mime| mime.to_string())
                    .unwrap_or_default();

                let mut data = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk =
                        chunk.map_err(|e| AppError::BadRequest(format!("File read error: {e}")))?;
                    if data.len() + chunk.len() > MAX_UPLOAD_SIZE {
                        return Err(AppError::FileTooLarge(format!(
                            "max size is {} bytes",
                            MAX_UPLOAD_SIZE
                        )));
                    }
                    data.extend_from_slice(&chunk);
                }
                form.file = Some(data);
            }
            "thumbnail" | "resize" | "watermark" | "watermark_text" => {
                let value = read_text_field(&mut field).await?;
                match name.as_str() {
                    "thumbnail" => form.thumbnail = value == "true",
                    "resize" => form.resize = value == "true",
                    "watermark" => form.watermark = value == "true",
                    _ => form.watermark_text = Some(value),
                }
            }
            _ => {
                // Unknown fields still have to be drained.
                while let Some(chunk) = field.next().await {
                    chunk.map_err(|e| AppError::BadRequest(format!("Field read error: {e}")))?;
                }
            }
        }
    }

    Ok(form)
}

async fn read_text_field(field: &mut actix_multipart::Field) -> Result<String> {
    let mut data = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Field read error: {e}")))?;
        if data.len() + chunk.len() > MAX_FIELD_LEN {
            return Err(AppError::BadRequest("Form field too long".to_string()));
        }
        data.extend_from_slice(&chunk);
    }
    String::from_utf8(data).map_err(|_| AppError::BadRequest("Form field is not UTF-8".to_string()))
}

/// Cheap pre-checks before the coordinator's magic-byte gate.
fn validate_file(filename: &str, content_type: &str, size: usize) -> Result<()> {
    if size > MAX_UPLOAD_SIZE {
        return Err(AppError::FileTooLarge(format!(
            "max size is {} MB",
            MAX_UPLOAD_SIZE / (1024 * 1024)
        )));
    }

    let lowered = filename.to_lowercase();
    if !ALLOWED_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext)) {
        return Err(AppError::InvalidFileFormat(
            "unsupported file extension; allowed: jpg, jpeg, png, gif, webp, bmp, tiff".to_string(),
        ));
    }

    if !content_type.starts_with("image/") {
        return Err(AppError::InvalidFileFormat(
            "file must be an image".to_string(),
        ));
    }

    Ok(())
}

fn requested_operations(form: &UploadForm) -> Vec<OperationParams> {
    let mut operations = Vec::new();

    if form.thumbnail {
        operations.push(OperationParams::Thumbnail(ThumbnailParams {
            size: 200,
            crop_to_fit: true,
        }));
    }

    if form.resize {
        operations.push(OperationParams::Resize(ResizeParams {
            width: Some(1024),
            height: Some(768),
            keep_aspect: true,
        }));
    }

    if form.watermark {
        let mut params = WatermarkParams::default();
        if let Some(text) = form.watermark_text.as_ref().filter(|t| !t.is_empty()) {
            params.text = text.clone();
        }
        operations.push(OperationParams::Watermark(params));
    }

    operations
}

fn parse_image_id(raw: &str) -> Result<Uuid> {
    if raw.is_empty() {
        return Err(AppError::BadRequest("Image ID is required".to_string()));
    }
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest("Invalid image ID".to_string()))
}

/// `photo.jpg` + `thumbnail` -> `photo_thumbnail.jpg`
fn download_filename(original: &str, operation: &str) -> String {
    let safe = sanitize_filename(original);
    if operation.is_empty() {
        return safe;
    }
    match safe.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{operation}.{ext}"),
        _ => format!("{safe}_{operation}"),
    }
}
