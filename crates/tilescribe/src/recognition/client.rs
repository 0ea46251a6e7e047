//! HTTP recognition client for generate-style model endpoints.
//!
//! Each call posts `{model, prompt, images?, stream, options}` and reads either a
//! single JSON object or a newline-delimited stream. Transport errors, timeouts,
//! non-2xx statuses and `error` payloads are retried according to the
//! [`RetryPolicy`]. After every completed call, successful or not, the client pauses
//! for the configured cooldown so sequential callers never hammer the backend.

use crate::core::config::RecognitionConfig;
use crate::recognition::progress::{ProgressCallback, TokenTracker};
use crate::recognition::retry::RetryPolicy;
use crate::recognition::stream::{StreamDecoder, StreamEvent};
use crate::recognition::{ModelRole, RecognitionBackend, RecognitionOutput, RecognitionRequest, TimeoutTier};
use crate::{Result, TilescribeError};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest slice of an error body echoed into error messages.
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
    stream: bool,
    options: GenerateOptions,
}

/// Cumulative counters since the client was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    /// HTTP attempts sent, including retries.
    pub requests: u64,
    pub successes: u64,
    /// Calls that failed after all attempts.
    pub failures: u64,
    /// Backoff delays taken before retries.
    pub backoffs: u64,
    pub tokens: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    backoffs: AtomicU64,
    tokens: AtomicU64,
}

pub struct RecognitionClient {
    http: reqwest::Client,
    config: RecognitionConfig,
    retry: RetryPolicy,
    progress: Option<ProgressCallback>,
    counters: Counters,
}

impl std::fmt::Debug for RecognitionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionClient")
            .field("endpoint", &self.config.endpoint)
            .field("vision_model", &self.config.vision_model)
            .field("text_model", &self.config.text_model)
            .field("retry", &self.retry)
            .finish()
    }
}

impl RecognitionClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `TilescribeError::Validation` if the endpoint is not a valid http(s) URL.
    pub fn new(config: RecognitionConfig) -> Result<Self> {
        let url = reqwest::Url::parse(&config.endpoint).map_err(|e| {
            TilescribeError::validation_with_source(format!("Invalid recognition endpoint: {}", config.endpoint), e)
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TilescribeError::validation(format!(
                "Recognition endpoint must use http or https: {}",
                config.endpoint
            )));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TilescribeError::recognition_with_source("Failed to create HTTP client", e))?;

        Ok(Self {
            http,
            retry: RetryPolicy::from_config(&config),
            config,
            progress: None,
            counters: Counters::default(),
        })
    }

    /// Receive a progress snapshot for every streamed fragment.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &RecognitionConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            backoffs: self.counters.backoffs.load(Ordering::Relaxed),
            tokens: self.counters.tokens.load(Ordering::Relaxed),
        }
    }

    pub fn model_for(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::Vision => &self.config.vision_model,
            ModelRole::Text => &self.config.text_model,
        }
    }

    pub fn timeout_for(&self, tier: TimeoutTier) -> Duration {
        match tier {
            TimeoutTier::Tile => Duration::from_secs(self.config.tile_timeout_secs),
            TimeoutTier::Document => Duration::from_secs(self.config.document_timeout_secs),
        }
    }

    /// One HTTP attempt. Returns the text and its token count.
    async fn attempt(&self, body: &GenerateRequest<'_>, tier: TimeoutTier) -> Result<(String, u64)> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let mut response = self
            .http
            .post(&self.config.endpoint)
            .timeout(self.timeout_for(tier))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(TilescribeError::recognition(format!(
                "HTTP {} from recognition endpoint: {}",
                status.as_u16(),
                detail.trim()
            )));
        }

        let mut tracker = TokenTracker::new(body.model);
        let decoder = if body.stream {
            let mut decoder = StreamDecoder::new();
            while let Some(bytes) = response.chunk().await? {
                let events = decoder.push(&bytes)?;
                self.report(&events, &mut tracker);
            }
            let events = decoder.finish()?;
            self.report(&events, &mut tracker);
            decoder
        } else {
            let bytes = response.bytes().await?;
            let decoder = StreamDecoder::decode_body(&bytes)?;
            self.report(&[StreamEvent::Fragment(decoder.text().to_string())], &mut tracker);
            decoder
        };

        if !decoder.is_done() {
            tracing::debug!(model = body.model, "response ended without a completion flag");
        }
        let tokens = decoder.tokens();
        Ok((decoder.into_text(), tokens))
    }

    fn report(&self, events: &[StreamEvent], tracker: &mut TokenTracker) {
        let Some(callback) = &self.progress else {
            return;
        };
        for event in events {
            if let StreamEvent::Fragment(fragment) = event {
                let progress = tracker.record(fragment);
                callback(&progress);
            }
        }
    }

    async fn cooldown(&self) {
        if self.config.cooldown_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.cooldown_ms)).await;
        }
    }
}

#[async_trait]
impl RecognitionBackend for RecognitionClient {
    async fn extract(&self, request: RecognitionRequest<'_>) -> Result<RecognitionOutput> {
        let model = self.model_for(request.role);
        let body = GenerateRequest {
            model,
            prompt: request.prompt,
            images: request.image.map(|bytes| vec![BASE64.encode(bytes)]),
            stream: self.config.stream,
            options: GenerateOptions {
                temperature: self.config.temperature,
            },
        };
        let tier = request.tier;
        let client = self;
        let body_ref = &body;

        let result = self
            .retry
            .run(
                move |_| client.attempt(body_ref, tier),
                |attempt, error, delay| {
                    self.counters.backoffs.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        attempt,
                        model,
                        error = %error,
                        delay_ms = delay.as_millis() as u64,
                        "recognition attempt failed, backing off"
                    );
                },
            )
            .await;

        self.cooldown().await;

        match result {
            Ok(((text, tokens), attempts)) => {
                self.counters.successes.fetch_add(1, Ordering::Relaxed);
                self.counters.tokens.fetch_add(tokens, Ordering::Relaxed);
                tracing::debug!(model, attempts, tokens, chars = text.len(), "recognition call succeeded");
                Ok(RecognitionOutput { text, tokens, attempts })
            }
            Err((error, attempts)) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                Err(TilescribeError::recognition_with_source(
                    format!("Recognition failed after {} attempts", attempts),
                    error,
                ))
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
