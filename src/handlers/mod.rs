//! HTTP handlers for the image API.

pub mod images;

pub use images::{delete_image, get_image, get_status, list_images, upload_image};
