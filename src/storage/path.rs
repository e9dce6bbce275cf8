//! Object-key hygiene and generation.
//!
//! Every externally influenced path goes through [`sanitize_object_path`]
//! before any store call; the sanitiser performs no I/O. Filenames are
//! reduced to a safe basename before they are used for extensions or
//! content-disposition headers.

use crate::error::{AppError, Result};
use chrono::Utc;

const FORBIDDEN_FILENAME_CHARS: [char; 9] = ['/', '\\', '<', '>', ':', '"', '|', '?', '*'];

/// Lexically canonicalise an object path: collapse `.` and `..`, strip a
/// leading `/`, reject anything that escapes the root.
pub fn sanitize_object_path(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(AppError::InvalidPath("empty path".to_string()));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if segments.pop().is_none() {
                    return Err(AppError::InvalidPath(format!(
                        "path escapes storage root: {}",
                        path
                    )));
                }
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err(AppError::InvalidPath(format!("path resolves to nothing: {}", path)));
    }

    Ok(segments.join("/"))
}

/// Reduce a client-supplied filename to its basename, with path
/// separators and shell-unfriendly characters replaced by `_`.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);

    let mut name = base.to_string();
    while name.contains("..") {
        name = name.replace("..", "_");
    }
    name.chars()
        .map(|c| {
            if FORBIDDEN_FILENAME_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Lower-cased extension of a sanitised filename, including the dot;
/// `.dat` when there is none.
pub fn extension_of(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            format!(".{}", ext.to_lowercase())
        }
        _ => ".dat".to_string(),
    }
}

/// Key for a freshly uploaded original: `original/YYYY/MM/DD/<nanos><ext>`.
pub fn original_object_key(sanitized_filename: &str) -> String {
    let now = Utc::now();
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000));
    format!(
        "original/{}/{}{}",
        now.format("%Y/%m/%d"),
        nanos,
        extension_of(sanitized_filename)
    )
}

/// Content type by file extension (with or without the leading dot).
pub fn content_type_for_ext(ext: &str) -> &'static str {
    match ext.trim_start_matches('.').to_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tiff" | "tif" => "image/tiff",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_path_passes_clean_keys() {
        assert_eq!(
            sanitize_object_path("processed/thumbnails/abc/200.jpeg").unwrap(),
            "processed/thumbnails/abc/200.jpeg"
        );
    }

    #[test]
    fn sanitize_path_collapses_dot_segments() {
        assert_eq!(
            sanitize_object_path("a/./b/../c").unwrap(),
            "a/c"
        );
    }

    #[test]
    fn sanitize_path_strips_leading_slash() {
        assert_eq!(sanitize_object_path("/original/x.jpg").unwrap(), "original/x.jpg");
    }

    #[test]
    fn sanitize_path_rejects_escapes() {
        assert!(matches!(
            sanitize_object_path("../etc/passwd"),
            Err(AppError::InvalidPath(_))
        ));
        assert!(matches!(
            sanitize_object_path("a/../../b"),
            Err(AppError::InvalidPath(_))
        ));
        assert!(matches!(
            sanitize_object_path(""),
            Err(AppError::InvalidPath(_))
        ));
        assert!(matches!(
            sanitize_object_path("a/.."),
            Err(AppError::InvalidPath(_))
        ));
    }

    #[test]
    fn sanitize_filename_takes_basename_and_scrubs() {
        assert_eq!(sanitize_filename("/tmp/../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\photos\\me.jpg"), "me.jpg");
        assert_eq!(sanitize_filename("a<b>c?.png"), "a_b_c_.png");
        assert_eq!(sanitize_filename("weird..name.jpg"), "weird_name.jpg");
    }

    #[test]
    fn extension_falls_back_to_dat() {
        assert_eq!(extension_of("photo.JPG"), ".jpg");
        assert_eq!(extension_of("archive.tar.gz"), ".gz");
        assert_eq!(extension_of("noext"), ".dat");
        assert_eq!(extension_of(".hidden"), ".dat");
    }

    #[test]
    fn original_key_has_date_layout_and_extension() {
        let key = original_object_key("photo.jpg");
        assert!(key.starts_with("original/"));
        assert!(key.ends_with(".jpg"));
        // original/YYYY/MM/DD/<nanos>.jpg
        assert_eq!(key.matches('/').count(), 4);
    }

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for_ext(".jpg"), "image/jpeg");
        assert_eq!(content_type_for_ext("tif"), "image/tiff");
        assert_eq!(content_type_for_ext(".exe"), "application/octet-stream");
    }
}
