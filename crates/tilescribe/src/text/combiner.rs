//! Final document assembly with an expansion guard.
//!
//! The combiner never lets the document grow beyond what the tiles contained: the
//! ratio of output to input volume (non-whitespace characters) is checked after a
//! generative merge, and a result above the configured cap is discarded in favour of
//! the deterministic line-overlap merge.

use crate::core::config::{CombineConfig, CombineStrategy};
use crate::extraction::filter::clean_text;
use crate::recognition::{RecognitionBackend, RecognitionRequest};
use crate::text::merge::OverlapMerger;
use crate::types::{CombinationMethod, EMPTY_RESULT_MARKER, ExtractionRecord};

/// Number of non-whitespace characters.
pub fn text_volume(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Output volume over input volume.
pub fn expansion_ratio<S: AsRef<str>>(output: &str, inputs: &[S]) -> f64 {
    let input: usize = inputs.iter().map(|t| text_volume(t.as_ref())).sum();
    let output = text_volume(output);
    if input == 0 {
        return if output == 0 { 1.0 } else { f64::INFINITY };
    }
    output as f64 / input as f64
}

/// Result of combining records into a document.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedDocument {
    pub text: String,
    pub method: CombinationMethod,
    /// Measured only when a merge actually ran.
    pub expansion_ratio: Option<f64>,
    pub tokens: u64,
}

impl CombinedDocument {
    fn empty() -> Self {
        Self {
            text: EMPTY_RESULT_MARKER.to_string(),
            method: CombinationMethod::Empty,
            expansion_ratio: None,
            tokens: 0,
        }
    }
}

pub struct TextCombiner<'a> {
    config: &'a CombineConfig,
    generator: Option<(&'a dyn RecognitionBackend, &'a str)>,
}

impl<'a> TextCombiner<'a> {
    /// A combiner that can only merge deterministically.
    pub fn new(config: &'a CombineConfig) -> Self {
        Self { config, generator: None }
    }

    /// Enable the generative strategy through `backend` with the given merge prompt.
    pub fn with_generator(mut self, backend: &'a dyn RecognitionBackend, prompt: &'a str) -> Self {
        self.generator = Some((backend, prompt));
        self
    }

    /// Combine records already sorted in reading order. Never fails; problems with the
    /// generative merge are logged and answered with the deterministic merge.
    pub async fn combine(&self, records: &[ExtractionRecord]) -> CombinedDocument {
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();

        match texts.as_slice() {
            [] => {
                tracing::info!("no records to combine");
                return CombinedDocument::empty();
            }
            [only] => {
                return CombinedDocument {
                    text: only.to_string(),
                    method: CombinationMethod::Single,
                    expansion_ratio: None,
                    tokens: 0,
                };
            }
            _ => {}
        }

        let volume: usize = texts.iter().map(|t| text_volume(t)).sum();
        if volume < self.config.min_combined_chars {
            tracing::info!(
                records = texts.len(),
                volume,
                min = self.config.min_combined_chars,
                "too little text to combine"
            );
            return CombinedDocument::empty();
        }

        match self.config.strategy {
            CombineStrategy::Deterministic => self.deterministic(records, CombinationMethod::Deterministic),
            CombineStrategy::Generative => self.generative(records).await,
        }
    }

    fn deterministic(&self, records: &[ExtractionRecord], method: CombinationMethod) -> CombinedDocument {
        let merged = OverlapMerger::from(self.config).merge(records);
        if merged.trim().is_empty() {
            return CombinedDocument::empty();
        }
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        let ratio = expansion_ratio(&merged, &texts);
        tracing::info!(records = records.len(), ratio, ?method, "combined records");
        CombinedDocument {
            text: merged,
            method,
            expansion_ratio: Some(ratio),
            tokens: 0,
        }
    }

    async fn generative(&self, records: &[ExtractionRecord]) -> CombinedDocument {
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
        let Some((backend, prompt)) = self.generator else {
            tracing::warn!("generative combine requested without a backend, merging deterministically");
            return self.deterministic(records, CombinationMethod::DeterministicFallback);
        };

        let request_text = format!("{}\n\n{}", prompt, texts.join("\n\n"));
        let output = match backend.extract(RecognitionRequest::document_text(&request_text)).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "generative combine failed, merging deterministically");
                return self.deterministic(records, CombinationMethod::DeterministicFallback);
            }
        };

        let text = clean_text(&output.text);
        if text.trim().is_empty() {
            tracing::warn!("generative combine returned nothing, merging deterministically");
            let mut fallback = self.deterministic(records, CombinationMethod::DeterministicFallback);
            fallback.tokens = output.tokens;
            return fallback;
        }

        let ratio = expansion_ratio(&text, &texts);
        if ratio > self.config.max_expansion_ratio {
            tracing::warn!(
                ratio,
                cap = self.config.max_expansion_ratio,
                "generative combine expanded the text, merging deterministically"
            );
            let mut fallback = self.deterministic(records, CombinationMethod::DeterministicFallback);
            fallback.tokens = output.tokens;
            return fallback;
        }

        tracing::info!(records = texts.len(), ratio, "generative combine accepted");
        CombinedDocument {
            text,
            method: CombinationMethod::Generative,
            expansion_ratio: Some(ratio),
            tokens: output.tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::{ModelRole, RecognitionOutput};
    use crate::types::Rect;
    use crate::{Result, TilescribeError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedGenerator {
        reply: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl FixedGenerator {
        fn replying(reply: &'static str) -> Self {
            Self {
                reply: Some(reply),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                reply: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RecognitionBackend for FixedGenerator {
        async fn extract(&self, request: RecognitionRequest<'_>) -> Result<RecognitionOutput> {
            assert_eq!(request.role, ModelRole::Text);
            assert!(request.image.is_none());
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Some(reply) => Ok(RecognitionOutput {
                    text: reply.to_string(),
                    tokens: 12,
                    attempts: 1,
                }),
                None => Err(TilescribeError::recognition("connection refused")),
            }
        }
    }

    fn record(text: &str, x: u32, y: u32) -> ExtractionRecord {
        ExtractionRecord {
            text: text.to_string(),
            position: Rect::new(x, y, 100, 100),
        }
    }

    fn generative() -> CombineConfig {
        CombineConfig {
            strategy: CombineStrategy::Generative,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_no_records_yields_marker() {
        let config = CombineConfig::default();
        let combined = TextCombiner::new(&config).combine(&[]).await;
        assert_eq!(combined.text, EMPTY_RESULT_MARKER);
        assert_eq!(combined.method, CombinationMethod::Empty);
    }

    #[tokio::test]
    async fn test_single_record_is_returned_unchanged() {
        let config = generative();
        let generator = FixedGenerator::replying("rewritten");
        let text = "  Exactly as recognized\n\n  with spacing ";
        let combined = TextCombiner::new(&config)
            .with_generator(&generator, "merge")
            .combine(&[record(text, 0, 0)])
            .await;

        assert_eq!(combined.text, text);
        assert_eq!(combined.method, CombinationMethod::Single);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_too_little_text_yields_marker() {
        let config = CombineConfig::default();
        let combined = TextCombiner::new(&config)
            .combine(&[record("ab", 0, 0), record("cd", 0, 50)])
            .await;
        assert_eq!(combined.text, EMPTY_RESULT_MARKER);
    }

    #[tokio::test]
    async fn test_deterministic_merge_resolves_overlap() {
        let config = CombineConfig {
            min_combined_chars: 5,
            ..Default::default()
        };
        let combined = TextCombiner::new(&config)
            .combine(&[record("Hello wor", 0, 0), record("world, friend", 80, 0)])
            .await;

        assert_eq!(combined.text, "Hello world, friend");
        assert_eq!(combined.method, CombinationMethod::Deterministic);
        assert!(combined.expansion_ratio.unwrap() <= 1.0);
    }

    #[tokio::test]
    async fn test_deterministic_merge_keeps_separate_blocks_intact() {
        let config = CombineConfig::default();
        let records = [
            ExtractionRecord {
                text: "Applicant: Alice\nSignature".to_string(),
                position: Rect::new(0, 0, 300, 100),
            },
            ExtractionRecord {
                text: "Signature\nWitness: Bob".to_string(),
                position: Rect::new(0, 600, 300, 100),
            },
            ExtractionRecord {
                text: "We fed the cat".to_string(),
                position: Rect::new(0, 900, 300, 100),
            },
            ExtractionRecord {
                text: "Cathedral tours start at noon".to_string(),
                position: Rect::new(0, 1200, 300, 100),
            },
        ];
        let combined = TextCombiner::new(&config).combine(&records).await;

        assert_eq!(combined.method, CombinationMethod::Deterministic);
        assert_eq!(
            combined.text,
            "Applicant: Alice\nSignature\nSignature\nWitness: Bob\nWe fed the cat\nCathedral tours start at noon"
        );
        assert_eq!(combined.expansion_ratio, Some(1.0));
    }

    #[tokio::test]
    async fn test_generative_result_within_cap_is_used() {
        let config = generative();
        let generator = FixedGenerator::replying("First paragraph text.\nSecond paragraph text.");
        let records = [
            record("First paragraph text.", 0, 0),
            record("Second paragraph text.", 0, 100),
        ];
        let combined = TextCombiner::new(&config)
            .with_generator(&generator, "merge")
            .combine(&records)
            .await;

        assert_eq!(combined.method, CombinationMethod::Generative);
        assert_eq!(combined.text, "First paragraph text.\nSecond paragraph text.");
        assert_eq!(combined.tokens, 12);
    }

    #[tokio::test]
    async fn test_expanding_generative_result_is_rejected() {
        let config = generative();
        let generator = FixedGenerator::replying(
            "This document appears to be a formal letter. First paragraph text. It then continues with \
             Second paragraph text. In summary the letter is about several topics.",
        );
        let records = [
            record("First paragraph text.", 0, 0),
            record("Second paragraph text.", 0, 100),
        ];
        let combined = TextCombiner::new(&config)
            .with_generator(&generator, "merge")
            .combine(&records)
            .await;

        assert_eq!(combined.method, CombinationMethod::DeterministicFallback);
        assert_eq!(combined.text, "First paragraph text.\nSecond paragraph text.");
        assert!(combined.expansion_ratio.unwrap() <= config.max_expansion_ratio);
    }

    #[tokio::test]
    async fn test_failed_generative_call_falls_back() {
        let config = generative();
        let generator = FixedGenerator::failing();
        let records = [record("Alpha beta gamma", 0, 0), record("delta epsilon zeta", 0, 100)];
        let combined = TextCombiner::new(&config)
            .with_generator(&generator, "merge")
            .combine(&records)
            .await;

        assert_eq!(combined.method, CombinationMethod::DeterministicFallback);
        assert_eq!(combined.text, "Alpha beta gamma\ndelta epsilon zeta");
    }

    #[tokio::test]
    async fn test_generative_without_backend_falls_back() {
        let config = generative();
        let records = [record("Alpha beta gamma", 0, 0), record("delta epsilon zeta", 0, 100)];
        let combined = TextCombiner::new(&config).combine(&records).await;
        assert_eq!(combined.method, CombinationMethod::DeterministicFallback);
    }

    #[test]
    fn test_expansion_ratio_counts_non_whitespace() {
        assert_eq!(expansion_ratio("a b\nc", &["abc"]), 1.0);
        assert_eq!(expansion_ratio("abcd", &["ab", "  "]), 2.0);
        assert_eq!(expansion_ratio("", &[""]), 1.0);
        assert!(expansion_ratio("x", &[" "]).is_infinite());
    }
}
