//! Tilescribe - content-aware image chunking and OCR text reassembly
//!
//! Tilescribe turns a large raster image (a scanned page or a long screenshot) into
//! ordered plain text. It finds the content blocks on the page, slices them into
//! bounded, overlapping tiles sized for a vision model, recognizes each tile through a
//! remote generation endpoint, and stitches the per-tile text back together without
//! letting the result grow beyond what the tiles contained.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use tilescribe::{PipelineConfig, extract_file_sync};
//!
//! # fn main() -> tilescribe::Result<()> {
//! let config = PipelineConfig::default();
//! let output = extract_file_sync("scan.png", &config)?;
//! println!("{}", output.document);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Core** (`core`): configuration, image loading and the end-to-end pipeline
//! - **Layout** (`layout`): block detection and block merging
//! - **Chunking** (`chunking`): grid primitive, budget-aware planner, ink scoring, tile cropping
//! - **Recognition** (`recognition`): backend trait, HTTP client, retry policy, streaming decoder
//! - **Extraction** (`extraction`): sequential orchestration, pre-filter, whole-image fallback
//! - **Text** (`text`): deterministic overlap merge and the guarded text combiner

#![deny(unsafe_code)]

pub mod chunking;
pub mod core;
pub mod error;
pub mod extraction;
pub mod layout;
pub mod recognition;
pub mod text;
pub mod types;

pub use error::{Result, TilescribeError};
pub use types::*;

pub use core::config::{
    ChunkBudgetConfig, CombineConfig, CombineStrategy, DetectionConfig, DetectionMode, FilterConfig, InputConfig,
    MergeConfig, PipelineConfig, RecognitionConfig,
};
pub use core::io::{decode_image, load_image};
pub use core::pipeline::{extract_bytes, extract_bytes_sync, extract_file, extract_file_sync, run_pipeline};

pub use chunking::grid::grid_of;
pub use chunking::planner::{ChunkPlan, ChunkPlanner};
pub use extraction::orchestrator::ExtractionOrchestrator;
pub use layout::detector::BlockDetector;
pub use layout::merger::BlockMerger;
pub use recognition::client::RecognitionClient;
pub use recognition::{ModelRole, RecognitionBackend, RecognitionOutput, RecognitionRequest, TimeoutTier};
pub use text::combiner::TextCombiner;
