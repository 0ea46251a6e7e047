//! Sequential tile recognition with a whole-image fallback.
//!
//! Chunks are recognized strictly one after another; a failed chunk is logged and
//! skipped. When most chunks produce nothing usable (rejected by the pre-filter or
//! failed outright), one last call sends the whole page instead.

use crate::core::config::{FilterConfig, RecognitionConfig};
use crate::extraction::filter::{FilterOutcome, Rejection, TextFilter};
use crate::recognition::{RecognitionBackend, RecognitionRequest};
use crate::types::{Chunk, ExtractionRecord, Image, Rect};
use crate::{Result, TilescribeError};

/// Fill the per-tile placeholders of a prompt template. `chunk_number` is 1-based.
pub fn render_tile_prompt(template: &str, chunk_number: usize, total_chunks: usize, position: Rect) -> String {
    let coordinates = format!(
        "(left={}, top={}, right={}, bottom={})",
        position.x,
        position.y,
        position.right(),
        position.bottom()
    );
    template
        .replace("{chunk_number}", &chunk_number.to_string())
        .replace("{total_chunks}", &total_chunks.to_string())
        .replace("{coordinates}", &coordinates)
}

/// What one orchestration run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionReport {
    /// Accepted records sorted by `(y, x)`.
    pub records: Vec<ExtractionRecord>,
    pub total_chunks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rejected: usize,
    pub duplicates: usize,
    /// `(rejected + failed) / total_chunks`; 1.0 when there were no chunks.
    pub empty_ratio: f64,
    pub fallback_attempted: bool,
    pub fallback_used: bool,
    pub tokens: u64,
}

pub struct ExtractionOrchestrator<'a> {
    backend: &'a dyn RecognitionBackend,
    recognition: &'a RecognitionConfig,
    filter: &'a FilterConfig,
}

impl<'a> ExtractionOrchestrator<'a> {
    pub fn new(backend: &'a dyn RecognitionBackend, recognition: &'a RecognitionConfig, filter: &'a FilterConfig) -> Self {
        Self {
            backend,
            recognition,
            filter,
        }
    }

    /// Recognize every chunk in order, then decide on the whole-image fallback.
    ///
    /// # Errors
    ///
    /// Returns `TilescribeError::BackendUnavailable` only when no chunk call succeeded
    /// and the fallback call failed too. Every other failure is absorbed.
    pub async fn run(&self, image: &Image, chunks: Vec<Chunk>) -> Result<ExtractionReport> {
        let mut report = ExtractionReport {
            total_chunks: chunks.len(),
            ..Default::default()
        };
        let mut filter = TextFilter::new(self.filter.clone());

        let total = chunks.len();
        for (number, chunk) in chunks.into_iter().enumerate() {
            let prompt = render_tile_prompt(&self.recognition.tile_prompt, number + 1, total, chunk.position);
            let request = RecognitionRequest::tile(&prompt, &chunk.data);
            match self.backend.extract(request).await {
                Ok(output) => {
                    report.succeeded += 1;
                    report.tokens += output.tokens;
                    match filter.accept(&output.text) {
                        FilterOutcome::Accepted(text) => {
                            tracing::debug!(index = chunk.index, position = ?chunk.position, chars = text.len(), "chunk accepted");
                            report.records.push(ExtractionRecord {
                                text,
                                position: chunk.position,
                            });
                        }
                        FilterOutcome::Rejected(Rejection::Duplicate) => {
                            tracing::debug!(index = chunk.index, "chunk text duplicates an earlier chunk");
                            report.duplicates += 1;
                        }
                        FilterOutcome::Rejected(reason) => {
                            tracing::debug!(index = chunk.index, ?reason, "chunk text rejected");
                            report.rejected += 1;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        index = chunk.index,
                        position = ?chunk.position,
                        error = %e,
                        "chunk recognition failed, skipping"
                    );
                    report.failed += 1;
                }
            }
        }

        report.empty_ratio = if report.total_chunks == 0 {
            1.0
        } else {
            (report.rejected + report.failed) as f64 / report.total_chunks as f64
        };
        tracing::info!(
            chunks = report.total_chunks,
            accepted = report.records.len(),
            rejected = report.rejected,
            failed = report.failed,
            duplicates = report.duplicates,
            empty_ratio = report.empty_ratio,
            "tile recognition finished"
        );

        if report.empty_ratio >= self.filter.empty_ratio_threshold {
            self.whole_image_fallback(image, &mut report).await?;
        }

        report.records.sort_by(|a, b| a.position.reading_order(&b.position));
        Ok(report)
    }

    async fn whole_image_fallback(&self, image: &Image, report: &mut ExtractionReport) -> Result<()> {
        tracing::info!(empty_ratio = report.empty_ratio, "trying whole-image fallback");
        report.fallback_attempted = true;

        let page = match image.flatten_to_png() {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(error = %e, "could not encode page for fallback");
                return Ok(());
            }
        };

        let request = RecognitionRequest::whole_image(&self.recognition.fallback_prompt, &page);
        match self.backend.extract(request).await {
            Ok(output) => {
                report.tokens += output.tokens;
                match TextFilter::new(self.filter.clone()).accept(&output.text) {
                    FilterOutcome::Accepted(text) => {
                        tracing::info!(chars = text.len(), "whole-image fallback replaced chunk records");
                        report.records = vec![ExtractionRecord {
                            text,
                            position: image.bounds(),
                        }];
                        report.fallback_used = true;
                    }
                    FilterOutcome::Rejected(reason) => {
                        tracing::info!(?reason, "whole-image fallback produced no usable text");
                    }
                }
                Ok(())
            }
            Err(e) if report.succeeded == 0 => Err(TilescribeError::BackendUnavailable {
                attempts: (report.total_chunks + 1) as u32,
                message: e.to_string(),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "whole-image fallback failed, keeping chunk records");
                Ok(())
            }
        }
    }
}
