//! Error types for Tilescribe.
//!
//! All fallible public operations return [`Result<T>`], backed by [`TilescribeError`].
//!
//! # Error Handling Philosophy
//!
//! **System errors MUST always bubble up unchanged:**
//! - `TilescribeError::Io` (from `std::io::Error`) - file system and permission errors
//!
//! **Pipeline-internal degradations are absorbed, not raised:**
//! - a failed block detection falls back to the whole-image grid
//! - an over-budget plan falls back to a coarse grid
//! - a failed tile recognition is logged and the tile is skipped
//! - an over-expanded combination falls back to the deterministic merge
//!
//! Only undecodable input, invalid configuration and a recognition backend that never
//! answered (including the whole-image fallback) reach the caller as errors.
//!
//! # Example
//!
//! ```rust
//! use tilescribe::{Result, TilescribeError};
//!
//! fn check_dimensions(width: u32, height: u32) -> Result<()> {
//!     if width == 0 || height == 0 {
//!         return Err(TilescribeError::validation(format!(
//!             "Image dimensions must be non-zero, got {}x{}",
//!             width, height
//!         )));
//!     }
//!     Ok(())
//! }
//! ```
use thiserror::Error;

/// Result type alias using `TilescribeError`.
pub type Result<T> = std::result::Result<T, TilescribeError>;

/// Main error type for all Tilescribe operations.
///
/// # Variants
///
/// - `Io` - File system and I/O errors (always bubble up)
/// - `Validation` - Invalid input image, parameters or configuration
/// - `ImageProcessing` - Decoding, cropping or encoding failures
/// - `Recognition` - A single recognition call failed (retryable at the call site)
/// - `Serialization` - JSON/TOML/YAML (de)serialization errors
/// - `BackendUnavailable` - Recognition backend never answered, fallback exhausted
/// - `Other` - Catch-all for uncommon errors
#[derive(Debug, Error)]
pub enum TilescribeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Image processing error: {message}")]
    ImageProcessing {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Recognition error: {message}")]
    Recognition {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Recognition backend unavailable after {attempts} attempts: {message}")]
    BackendUnavailable { attempts: u32, message: String },

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for TilescribeError {
    fn from(err: serde_json::Error) -> Self {
        TilescribeError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<toml::de::Error> for TilescribeError {
    fn from(err: toml::de::Error) -> Self {
        TilescribeError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_yaml_ng::Error> for TilescribeError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        TilescribeError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<image::ImageError> for TilescribeError {
    fn from(err: image::ImageError) -> Self {
        TilescribeError::ImageProcessing {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<reqwest::Error> for TilescribeError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {}", err)
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else {
            err.to_string()
        };
        TilescribeError::Recognition {
            message,
            source: Some(Box::new(err)),
        }
    }
}

macro_rules! error_constructor {
    ($name:ident, $variant:ident) => {
        pastey::paste! {
            #[doc = "Create a " $variant " error"]
            pub fn $name<S: Into<String>>(message: S) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: None,
                }
            }

            #[doc = "Create a " $variant " error with source"]
            pub fn [<$name _with_source>]<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
                message: S,
                source: E,
            ) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: Some(Box::new(source)),
                }
            }
        }
    };
}

impl TilescribeError {
    error_constructor!(validation, Validation);
    error_constructor!(image_processing, ImageProcessing);
    error_constructor!(recognition, Recognition);
    error_constructor!(serialization, Serialization);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TilescribeError = io_err.into();
        assert!(matches!(err, TilescribeError::Io(_)));
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_validation_error() {
        let err = TilescribeError::validation("overlap must be below 1.0");
        assert_eq!(err.to_string(), "Validation error: overlap must be below 1.0");
    }

    #[test]
    fn test_recognition_error_with_source() {
        let source = std::io::Error::other("connection reset");
        let err = TilescribeError::recognition_with_source("tile request failed", source);
        assert_eq!(err.to_string(), "Recognition error: tile request failed");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_backend_unavailable_message() {
        let err = TilescribeError::BackendUnavailable {
            attempts: 3,
            message: "HTTP 503".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Recognition backend unavailable after 3 attempts: HTTP 503"
        );
    }

    #[test]
    fn test_json_error_from() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
        let err: TilescribeError = json_err.into();
        assert!(matches!(err, TilescribeError::Serialization { .. }));
    }

    #[test]
    fn test_toml_error_from() {
        let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let err: TilescribeError = toml_err.into();
        assert!(matches!(err, TilescribeError::Serialization { .. }));
    }
}
