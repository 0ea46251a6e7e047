//! Recognition backends.
//!
//! The pipeline talks to text recognition through the [`RecognitionBackend`] trait.
//! [`client::RecognitionClient`] implements it over HTTP against a generate-style
//! endpoint; tests and embedders can plug in their own implementation.
//!
//! The HTTP client is composed from independent pieces:
//! - [`retry::RetryPolicy`]: attempt count and capped exponential backoff
//! - [`stream::StreamDecoder`]: newline-delimited JSON response decoding
//! - [`progress::TokenTracker`]: token counting and rate reporting

pub mod client;
pub mod progress;
pub mod retry;
pub mod stream;

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use client::{ClientStats, RecognitionClient};
pub use progress::{ProgressCallback, TokenProgress, TokenTracker};
pub use retry::RetryPolicy;
pub use stream::{StreamDecoder, StreamEvent};

/// Which configured model a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Image transcription: tiles and the whole-image fallback.
    Vision,
    /// Text-only generation: the generative combiner.
    Text,
}

/// Timeout class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutTier {
    /// A single tile.
    Tile,
    /// A whole document: fallback and combination calls.
    Document,
}

/// One recognition call.
#[derive(Debug, Clone, Copy)]
pub struct RecognitionRequest<'a> {
    pub prompt: &'a str,
    /// Encoded image bytes for vision requests.
    pub image: Option<&'a [u8]>,
    pub role: ModelRole,
    pub tier: TimeoutTier,
}

impl<'a> RecognitionRequest<'a> {
    /// Transcribe one tile.
    pub fn tile(prompt: &'a str, image: &'a [u8]) -> Self {
        Self {
            prompt,
            image: Some(image),
            role: ModelRole::Vision,
            tier: TimeoutTier::Tile,
        }
    }

    /// Transcribe the whole page in one call.
    pub fn whole_image(prompt: &'a str, image: &'a [u8]) -> Self {
        Self {
            prompt,
            image: Some(image),
            role: ModelRole::Vision,
            tier: TimeoutTier::Document,
        }
    }

    /// Text-only document request.
    pub fn document_text(prompt: &'a str) -> Self {
        Self {
            prompt,
            image: None,
            role: ModelRole::Text,
            tier: TimeoutTier::Document,
        }
    }
}

/// Raw text returned by a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognitionOutput {
    pub text: String,
    /// Tokens reported or counted for this call.
    pub tokens: u64,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

impl RecognitionOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens: 0,
            attempts: 1,
        }
    }
}

/// A text recognition service.
///
/// Implementations must be `Send + Sync`. The pipeline issues calls strictly one at a
/// time, so implementations need no internal request scheduling.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use tilescribe::Result;
/// use tilescribe::recognition::{RecognitionBackend, RecognitionOutput, RecognitionRequest};
///
/// struct Echo;
///
/// #[async_trait]
/// impl RecognitionBackend for Echo {
///     async fn extract(&self, request: RecognitionRequest<'_>) -> Result<RecognitionOutput> {
///         Ok(RecognitionOutput::new(request.prompt))
///     }
/// }
/// ```
#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    /// Run one recognition call.
    ///
    /// # Errors
    ///
    /// - `TilescribeError::Recognition` - the call failed after all retries
    /// - `TilescribeError::BackendUnavailable` - the backend could not be reached at all
    async fn extract(&self, request: RecognitionRequest<'_>) -> Result<RecognitionOutput>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "custom"
    }
}
