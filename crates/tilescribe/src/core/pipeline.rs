//! End-to-end pipeline.
//!
//! Stages run in a fixed order: block detection, block merging, chunk planning, ink
//! selection, tile cropping, sequential recognition, text combination. Everything
//! before recognition is synchronous and finishes before the first network call.
//!
//! # Example
//!
//! ```rust,no_run
//! use tilescribe::{PipelineConfig, RecognitionClient, load_image, run_pipeline};
//!
//! # async fn example() -> tilescribe::Result<()> {
//! let config = PipelineConfig::default();
//! let image = load_image("scan.png", &config.input)?;
//! let client = RecognitionClient::new(config.recognition.clone())?;
//! let output = run_pipeline(&image, &client, &config).await?;
//! println!("{}", output.document);
//! # Ok(())
//! # }
//! ```

use crate::chunking::{ChunkPlanner, InkScorer, TileExtractor, select_tiles};
use crate::core::config::PipelineConfig;
use crate::core::io::{decode_image, load_image_async};
use crate::extraction::ExtractionOrchestrator;
use crate::layout::{BlockDetector, BlockMerger};
use crate::recognition::{RecognitionBackend, RecognitionClient};
use crate::text::TextCombiner;
use crate::types::{Image, PipelineOutput, PipelineStats};
use crate::Result;
use once_cell::sync::Lazy;
use std::path::Path;

/// Runtime shared by the synchronous entry points.
static GLOBAL_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create global Tokio runtime - system may be out of resources")
});

/// Run every stage on a decoded image against the given backend.
///
/// # Errors
///
/// - `TilescribeError::Validation` - the configuration is invalid
/// - `TilescribeError::BackendUnavailable` - no recognition call succeeded, including the whole-image fallback
/// - `TilescribeError::ImageProcessing` - a tile could not be encoded
///
/// A page without text is not an error: the document is then [`crate::EMPTY_RESULT_MARKER`].
#[cfg_attr(feature = "otel", tracing::instrument(
    skip(image, backend, config),
    fields(
        image.width = image.width(),
        image.height = image.height(),
        backend = backend.name(),
    )
))]
pub async fn run_pipeline(
    image: &Image,
    backend: &dyn RecognitionBackend,
    config: &PipelineConfig,
) -> Result<PipelineOutput> {
    config.validate()?;
    let mut stats = PipelineStats::default();

    let detected = BlockDetector::new(config.detection.clone()).detect(image);
    let merged = BlockMerger::new(config.merge.clone()).merge(&detected);
    stats.detected_blocks = detected.len();
    stats.merged_blocks = merged.len();
    tracing::info!(
        width = image.width(),
        height = image.height(),
        detected = detected.len(),
        merged = merged.len(),
        "layout analysis finished"
    );

    let plan = ChunkPlanner::new(config.budget.clone()).plan_groups(&merged, image);
    stats.plan_strategy = Some(plan.strategy);
    stats.planned_tiles = plan.tile_count();

    let selection = select_tiles(&InkScorer::new(image), &plan, &config.budget);
    stats.inked_blocks = selection.kept_blocks;
    stats.selected_tiles = selection.tiles.len();
    tracing::info!(
        strategy = ?plan.strategy,
        planned = plan.tile_count(),
        selected = selection.tiles.len(),
        skipped_blocks = selection.skipped_blocks,
        "chunk plan ready"
    );

    let chunks = TileExtractor::new().extract(image, &selection.tiles)?;

    let report = ExtractionOrchestrator::new(backend, &config.recognition, &config.filter)
        .run(image, chunks)
        .await?;
    stats.chunks_succeeded = report.succeeded;
    stats.chunks_failed = report.failed;
    stats.chunks_rejected = report.rejected;
    stats.chunks_duplicate = report.duplicates;
    stats.fallback_attempted = report.fallback_attempted;
    stats.fallback_used = report.fallback_used;

    let combined = TextCombiner::new(&config.combine)
        .with_generator(backend, &config.recognition.combine_prompt)
        .combine(&report.records)
        .await;
    stats.combination = Some(combined.method);
    stats.expansion_ratio = combined.expansion_ratio;
    stats.tokens = report.tokens + combined.tokens;

    tracing::info!(
        records = report.records.len(),
        method = ?combined.method,
        chars = combined.text.len(),
        tokens = stats.tokens,
        "pipeline finished"
    );

    Ok(PipelineOutput {
        document: combined.text,
        records: report.records,
        tiles: selection.tiles,
        stats,
    })
}

/// Load an image file and run the pipeline against the configured HTTP backend.
///
/// # Errors
///
/// Besides the errors of [`run_pipeline`], returns `TilescribeError::Io` or
/// `TilescribeError::Validation` for missing, oversized or unsupported files.
#[cfg_attr(feature = "otel", tracing::instrument(
    skip(config, path),
    fields(
        extraction.path = %path.as_ref().display(),
    )
))]
pub async fn extract_file(path: impl AsRef<Path>, config: &PipelineConfig) -> Result<PipelineOutput> {
    let image = load_image_async(path.as_ref(), &config.input).await?;
    let client = RecognitionClient::new(config.recognition.clone())?;
    run_pipeline(&image, &client, config).await
}

/// Decode an in-memory image and run the pipeline against the configured HTTP backend.
#[cfg_attr(feature = "otel", tracing::instrument(
    skip(config, content),
    fields(
        extraction.size_bytes = content.len(),
    )
))]
pub async fn extract_bytes(content: &[u8], config: &PipelineConfig) -> Result<PipelineOutput> {
    let image = decode_image(content, &config.input)?;
    let client = RecognitionClient::new(config.recognition.clone())?;
    run_pipeline(&image, &client, config).await
}

/// Synchronous wrapper for [`extract_file`].
pub fn extract_file_sync(path: impl AsRef<Path>, config: &PipelineConfig) -> Result<PipelineOutput> {
    GLOBAL_RUNTIME.block_on(extract_file(path, config))
}

/// Synchronous wrapper for [`extract_bytes`].
pub fn extract_bytes_sync(content: &[u8], config: &PipelineConfig) -> Result<PipelineOutput> {
    GLOBAL_RUNTIME.block_on(extract_bytes(content, config))
}
