//! Image input utilities.
//!
//! Reads encoded images from disk or memory, enforces the accepted size and formats,
//! and decodes to an RGBA8 [`Image`]. Decoding either yields the full image or an
//! error; partial pixel data is never returned.

use crate::core::config::InputConfig;
use crate::types::Image;
use crate::{Result, TilescribeError};
use image::ImageFormat;
use std::path::Path;

/// Short lowercase name used in `InputConfig::supported_formats`.
fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Tiff => "tiff",
        _ => "unknown",
    }
}

/// Read a file asynchronously.
///
/// # Errors
///
/// Returns `TilescribeError::Io` for I/O errors (these always bubble up).
pub async fn read_file_async(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    tokio::fs::read(path.as_ref()).await.map_err(TilescribeError::Io)
}

/// Validate that a path exists and is a regular file.
pub fn validate_file_exists(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(TilescribeError::validation(format!(
            "File does not exist: {}",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(TilescribeError::validation(format!(
            "Path is not a file: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Load and decode an image file.
///
/// The format is sniffed from the file content, not the extension.
///
/// # Errors
///
/// - `TilescribeError::Validation` if the path is missing, is a directory, exceeds
///   `max_file_size_bytes`, or holds an unsupported format
/// - `TilescribeError::ImageProcessing` if the content cannot be decoded
/// - `TilescribeError::Io` for read failures
pub fn load_image(path: impl AsRef<Path>, config: &InputConfig) -> Result<Image> {
    let path = path.as_ref();
    validate_file_exists(path)?;

    let size = std::fs::metadata(path)?.len();
    check_size(size, config)?;

    let bytes = std::fs::read(path)?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "read image file");
    decode_image(&bytes, config)
}

/// Async variant of [`load_image`].
pub async fn load_image_async(path: impl AsRef<Path>, config: &InputConfig) -> Result<Image> {
    let path = path.as_ref();
    validate_file_exists(path)?;

    let size = tokio::fs::metadata(path).await?.len();
    check_size(size, config)?;

    let bytes = read_file_async(path).await?;
    decode_image(&bytes, config)
}

/// Decode an in-memory encoded image to RGBA8.
pub fn decode_image(bytes: &[u8], config: &InputConfig) -> Result<Image> {
    if bytes.is_empty() {
        return Err(TilescribeError::validation("Image data is empty"));
    }
    check_size(bytes.len() as u64, config)?;

    let format = image::guess_format(bytes)
        .map_err(|e| TilescribeError::validation_with_source("Unrecognized image format", e))?;
    let name = format_name(format);
    if !config.supported_formats.iter().any(|f| f.eq_ignore_ascii_case(name)) {
        return Err(TilescribeError::validation(format!(
            "Unsupported image format: {:?} (supported: {})",
            format,
            config.supported_formats.join(", ")
        )));
    }

    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| TilescribeError::image_processing_with_source(format!("Failed to decode {} image", name), e))?;

    let image = Image::from_rgba(decoded.to_rgba8())?;
    tracing::debug!(
        format = name,
        width = image.width(),
        height = image.height(),
        "decoded image"
    );
    Ok(image)
}

fn check_size(size: u64, config: &InputConfig) -> Result<()> {
    if size > config.max_file_size_bytes {
        return Err(TilescribeError::validation(format!(
            "Image is {} bytes, above the {} byte limit",
            size, config.max_file_size_bytes
        )));
    }
    Ok(())
}
