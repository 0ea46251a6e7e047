//! Configuration loading and management.
//!
//! A [`PipelineConfig`] is built once at the pipeline boundary and threaded through
//! every stage. It can be loaded from TOML, YAML or JSON files, discovered in the
//! directory hierarchy, or created programmatically. No stage reads environment
//! variables or other global state.

use crate::{Result, TilescribeError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default prompt for a single tile.
///
/// `{chunk_number}`, `{total_chunks}` and `{coordinates}` are filled in for every tile.
pub const DEFAULT_TILE_PROMPT: &str = "This is section {chunk_number} of {total_chunks}, taken from a larger image \
at {coordinates}. Transcribe all visible text in this image section exactly as written. \
Preserve line breaks and reading order. Do not describe the image, do not summarize, do not add commentary. \
If text is cut off at an edge, transcribe the visible part only. If no text is visible, answer EMPTY.";

/// Default prompt for the whole-image fallback.
pub const DEFAULT_FALLBACK_PROMPT: &str = "Transcribe all visible text on this page exactly as written, \
top to bottom and left to right. Preserve line breaks. Do not describe the image or add commentary. \
If no text is visible, answer EMPTY.";

/// Default instruction for the generative combiner.
pub const DEFAULT_COMBINE_PROMPT: &str = "The following text fragments were transcribed from overlapping \
sections of one page, in reading order. Merge them into a single text. Remove text duplicated by the overlap \
between consecutive fragments. Do not add, rephrase, summarize, explain or correct anything. \
Output only the merged text.";

/// Main pipeline configuration.
///
/// # Example
///
/// ```rust
/// use tilescribe::core::config::{CombineStrategy, PipelineConfig};
///
/// let mut config = PipelineConfig::default();
/// config.budget.max_dim = 800;
/// config.combine.strategy = CombineStrategy::Generative;
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub budget: ChunkBudgetConfig,

    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub combine: CombineConfig,
}

/// Input acceptance rules applied before decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Largest accepted encoded file, in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,

    /// Accepted container formats, lowercase (png, jpeg, gif, webp, bmp, tiff)
    #[serde(default = "default_supported_formats")]
    pub supported_formats: Vec<String>,
}

/// Whether the block detector runs at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    #[default]
    Enabled,
    /// Skip detection; planning always uses the whole-image grid.
    Disabled,
}

/// Block detector tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default)]
    pub mode: DetectionMode,

    /// Height/width ratio above which a page counts as very tall
    #[serde(default = "default_tall_aspect_ratio")]
    pub tall_aspect_ratio: f64,

    /// Very tall pages are downscaled to at most this height before analysis
    #[serde(default = "default_max_analysis_height")]
    pub max_analysis_height: u32,

    /// Light border added around the page before morphology
    #[serde(default = "default_padding")]
    pub padding: u32,

    /// Gaussian blur sigma applied to the grayscale page
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,

    /// Closing kernel width as a fraction of the analysed page width
    #[serde(default = "default_kernel_width_ratio")]
    pub kernel_width_ratio: f64,

    /// Closing kernel height in pixels
    #[serde(default = "default_kernel_height")]
    pub kernel_height: u32,

    #[serde(default = "default_min_block_width")]
    pub min_block_width: u32,

    #[serde(default = "default_min_block_height")]
    pub min_block_height: u32,

    /// Boxes covering at least this fraction of both page dimensions are discarded
    #[serde(default = "default_full_page_fraction")]
    pub full_page_fraction: f64,

    /// Pages whose grayscale range is below this are treated as blank
    #[serde(default = "default_min_contrast")]
    pub min_contrast: u8,
}

/// Block merger tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Disable to pass detected blocks through unchanged
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f64,

    /// Blocks separated by at most this many pixels are merged
    #[serde(default = "default_adjacency_tolerance")]
    pub adjacency_tolerance: u32,
}

/// Tile size, overlap and budget rules for the chunk planner and ink scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkBudgetConfig {
    /// Largest tile edge in pixels
    #[serde(default = "default_max_dim")]
    pub max_dim: u32,

    /// Overlap for the whole-image grid, in `[0, 1)`
    #[serde(default = "default_overlap_fraction")]
    pub overlap_fraction: f64,

    /// Chunk budget for block-aware planning
    #[serde(default = "default_max_total_chunks")]
    pub max_total_chunks: usize,

    /// Blocks within `max_dim * singleton_dim_factor` on both edges are kept whole
    #[serde(default = "default_singleton_dim_factor")]
    pub singleton_dim_factor: f64,

    /// Overlap used when subdividing a block, in `[0, 1)`
    #[serde(default = "default_in_block_overlap")]
    pub in_block_overlap: f64,

    #[serde(default = "default_coarse_grid_max_dim")]
    pub coarse_grid_max_dim: u32,

    #[serde(default = "default_coarse_grid_overlap")]
    pub coarse_grid_overlap: f64,

    /// Minimum dark-pixel fraction for a tile to be recognized
    #[serde(default = "default_min_ink_fraction")]
    pub min_ink_fraction: f64,

    /// Whole blocks need `min_ink_fraction * block_ink_multiplier`
    #[serde(default = "default_block_ink_multiplier")]
    pub block_ink_multiplier: f64,

    /// Keep at most this many tiles per block, best ink first (0 = unlimited)
    #[serde(default = "default_max_chunks_per_block")]
    pub max_chunks_per_block: usize,

    /// Overlap multiplier applied when the budget is exceeded
    #[serde(default = "default_relaxed_overlap_factor")]
    pub relaxed_overlap_factor: f64,

    /// Tile size multiplier applied when the budget is exceeded
    #[serde(default = "default_relaxed_dim_factor")]
    pub relaxed_dim_factor: f64,
}

/// Recognition backend connection and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Generate endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model used for tile and whole-image requests
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// Model used for the generative combiner
    #[serde(default = "default_text_model")]
    pub text_model: String,

    /// Request newline-delimited streaming responses
    #[serde(default = "default_true")]
    pub stream: bool,

    #[serde(default = "default_tile_timeout_secs")]
    pub tile_timeout_secs: u64,

    /// Timeout for whole-document requests (fallback and combination)
    #[serde(default = "default_document_timeout_secs")]
    pub document_timeout_secs: u64,

    /// Attempts per call, including the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Pause after every completed call
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    #[serde(default)]
    pub temperature: f32,

    /// Per-tile prompt; may use `{chunk_number}`, `{total_chunks}` and `{coordinates}`
    #[serde(default = "default_tile_prompt")]
    pub tile_prompt: String,

    #[serde(default = "default_fallback_prompt")]
    pub fallback_prompt: String,

    #[serde(default = "default_combine_prompt")]
    pub combine_prompt: String,
}

/// Pre-filter rules for recognized tile text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Minimum share of alphanumeric characters among non-whitespace characters
    #[serde(default = "default_min_alnum_ratio")]
    pub min_alnum_ratio: f64,

    /// Outputs equal to one of these (case-insensitive, trimmed) are rejected
    #[serde(default = "default_placeholders")]
    pub placeholders: Vec<String>,

    /// Share of unusable chunks that triggers the whole-image fallback
    #[serde(default = "default_empty_ratio_threshold")]
    pub empty_ratio_threshold: f64,
}

/// Primary combination strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineStrategy {
    /// Line-level overlap merge, no external call
    #[default]
    Deterministic,
    /// Merge-only instruction sent to the text model, guarded by the expansion cap
    Generative,
}

/// Text combiner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombineConfig {
    #[serde(default)]
    pub strategy: CombineStrategy,

    /// Output/input ratio of non-whitespace characters above which a result is rejected
    #[serde(default = "default_max_expansion_ratio")]
    pub max_expansion_ratio: f64,

    /// Below this many combined characters, multiple records yield the empty marker
    #[serde(default = "default_min_combined_chars")]
    pub min_combined_chars: usize,

    /// Two lines at or above this similarity are treated as the same line
    #[serde(default = "default_line_similarity_threshold")]
    pub line_similarity_threshold: f64,

    /// Largest suffix/prefix line overlap searched between consecutive records
    #[serde(default = "default_max_overlap_lines")]
    pub max_overlap_lines: usize,

    /// Minimum shared characters to splice a line cut at a tile edge
    #[serde(default = "default_min_char_overlap")]
    pub min_char_overlap: usize,

    /// Seams are only resolved between records whose tiles are at most this many pixels apart
    #[serde(default)]
    pub max_seam_gap: u32,
}

fn default_true() -> bool {
    true
}
fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}
fn default_supported_formats() -> Vec<String> {
    ["png", "jpeg", "gif", "webp", "bmp", "tiff"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_tall_aspect_ratio() -> f64 {
    3.0
}
fn default_max_analysis_height() -> u32 {
    4096
}
fn default_padding() -> u32 {
    10
}
fn default_blur_sigma() -> f32 {
    1.0
}
fn default_kernel_width_ratio() -> f64 {
    0.02
}
fn default_kernel_height() -> u32 {
    7
}
fn default_min_block_width() -> u32 {
    20
}
fn default_min_block_height() -> u32 {
    10
}
fn default_full_page_fraction() -> f64 {
    0.95
}
fn default_min_contrast() -> u8 {
    16
}
fn default_iou_threshold() -> f64 {
    0.2
}
fn default_adjacency_tolerance() -> u32 {
    8
}
fn default_max_dim() -> u32 {
    1024
}
fn default_overlap_fraction() -> f64 {
    0.15
}
fn default_max_total_chunks() -> usize {
    40
}
fn default_singleton_dim_factor() -> f64 {
    1.25
}
fn default_in_block_overlap() -> f64 {
    0.1
}
fn default_coarse_grid_max_dim() -> u32 {
    1600
}
fn default_coarse_grid_overlap() -> f64 {
    0.1
}
fn default_min_ink_fraction() -> f64 {
    0.01
}
fn default_block_ink_multiplier() -> f64 {
    1.5
}
fn default_max_chunks_per_block() -> usize {
    8
}
fn default_relaxed_overlap_factor() -> f64 {
    0.5
}
fn default_relaxed_dim_factor() -> f64 {
    1.5
}
fn default_endpoint() -> String {
    "http://localhost:11434/api/generate".to_string()
}
fn default_vision_model() -> String {
    "llava:34b".to_string()
}
fn default_text_model() -> String {
    "llama3:70b".to_string()
}
fn default_tile_timeout_secs() -> u64 {
    60
}
fn default_document_timeout_secs() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    8000
}
fn default_cooldown_ms() -> u64 {
    1000
}
fn default_tile_prompt() -> String {
    DEFAULT_TILE_PROMPT.to_string()
}
fn default_fallback_prompt() -> String {
    DEFAULT_FALLBACK_PROMPT.to_string()
}
fn default_combine_prompt() -> String {
    DEFAULT_COMBINE_PROMPT.to_string()
}
fn default_min_alnum_ratio() -> f64 {
    0.3
}
fn default_placeholders() -> Vec<String> {
    ["empty", "none", "n/a", "no text", "blank"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_empty_ratio_threshold() -> f64 {
    0.8
}
fn default_max_expansion_ratio() -> f64 {
    1.1
}
fn default_min_combined_chars() -> usize {
    20
}
fn default_line_similarity_threshold() -> f64 {
    0.85
}
fn default_max_overlap_lines() -> usize {
    8
}
fn default_min_char_overlap() -> usize {
    3
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size(),
            supported_formats: default_supported_formats(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            mode: DetectionMode::Enabled,
            tall_aspect_ratio: default_tall_aspect_ratio(),
            max_analysis_height: default_max_analysis_height(),
            padding: default_padding(),
            blur_sigma: default_blur_sigma(),
            kernel_width_ratio: default_kernel_width_ratio(),
            kernel_height: default_kernel_height(),
            min_block_width: default_min_block_width(),
            min_block_height: default_min_block_height(),
            full_page_fraction: default_full_page_fraction(),
            min_contrast: default_min_contrast(),
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            iou_threshold: default_iou_threshold(),
            adjacency_tolerance: default_adjacency_tolerance(),
        }
    }
}

impl Default for ChunkBudgetConfig {
    fn default() -> Self {
        Self {
            max_dim: default_max_dim(),
            overlap_fraction: default_overlap_fraction(),
            max_total_chunks: default_max_total_chunks(),
            singleton_dim_factor: default_singleton_dim_factor(),
            in_block_overlap: default_in_block_overlap(),
            coarse_grid_max_dim: default_coarse_grid_max_dim(),
            coarse_grid_overlap: default_coarse_grid_overlap(),
            min_ink_fraction: default_min_ink_fraction(),
            block_ink_multiplier: default_block_ink_multiplier(),
            max_chunks_per_block: default_max_chunks_per_block(),
            relaxed_overlap_factor: default_relaxed_overlap_factor(),
            relaxed_dim_factor: default_relaxed_dim_factor(),
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            vision_model: default_vision_model(),
            text_model: default_text_model(),
            stream: true,
            tile_timeout_secs: default_tile_timeout_secs(),
            document_timeout_secs: default_document_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            cooldown_ms: default_cooldown_ms(),
            temperature: 0.0,
            tile_prompt: default_tile_prompt(),
            fallback_prompt: default_fallback_prompt(),
            combine_prompt: default_combine_prompt(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_alnum_ratio: default_min_alnum_ratio(),
            placeholders: default_placeholders(),
            empty_ratio_threshold: default_empty_ratio_threshold(),
        }
    }
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            strategy: CombineStrategy::Deterministic,
            max_expansion_ratio: default_max_expansion_ratio(),
            min_combined_chars: default_min_combined_chars(),
            line_similarity_threshold: default_line_similarity_threshold(),
            max_overlap_lines: default_max_overlap_lines(),
            min_char_overlap: default_min_char_overlap(),
            max_seam_gap: 0,
        }
    }
}

const CONFIG_FILE_NAMES: [&str; 4] = ["tilescribe.toml", "tilescribe.yaml", "tilescribe.yml", "tilescribe.json"];

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if !(0.0..1.0).contains(&value) {
        return Err(TilescribeError::validation(format!(
            "{} must be in [0, 1), got {}",
            name, value
        )));
    }
    Ok(())
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `TilescribeError::Validation` if the file cannot be read and
    /// `TilescribeError::Serialization` if it is not valid TOML for this schema.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        Ok(serde_yaml_ng::from_str(&content)?)
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load configuration, choosing the parser from the file extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("toml") => Self::from_toml_file(path),
            Some("yaml") | Some("yml") => Self::from_yaml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(TilescribeError::validation(format!(
                "Unsupported config file extension: {} (expected .toml, .yaml, .yml or .json)",
                path.display()
            ))),
        }
    }

    /// Discover a configuration file by walking up from the current directory.
    ///
    /// Looks for `tilescribe.toml`, `tilescribe.yaml`, `tilescribe.yml` and
    /// `tilescribe.json`, in that order, in each directory.
    ///
    /// Returns `Ok(None)` if no file is found.
    pub fn discover() -> Result<Option<Self>> {
        let mut current = std::env::current_dir()?;

        loop {
            for name in CONFIG_FILE_NAMES {
                let candidate = current.join(name);
                if candidate.is_file() {
                    tracing::debug!(path = %candidate.display(), "discovered config file");
                    return Self::from_file(&candidate).map(Some);
                }
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(None)
    }

    /// Reject values no pipeline run can honour.
    pub fn validate(&self) -> Result<()> {
        let budget = &self.budget;
        if budget.max_dim == 0 || budget.coarse_grid_max_dim == 0 {
            return Err(TilescribeError::validation("Tile dimensions must be greater than zero"));
        }
        if budget.max_total_chunks == 0 {
            return Err(TilescribeError::validation("max_total_chunks must be greater than zero"));
        }
        check_fraction("overlap_fraction", budget.overlap_fraction)?;
        check_fraction("in_block_overlap", budget.in_block_overlap)?;
        check_fraction("coarse_grid_overlap", budget.coarse_grid_overlap)?;
        if !(0.0..=1.0).contains(&budget.min_ink_fraction) {
            return Err(TilescribeError::validation(format!(
                "min_ink_fraction must be in [0, 1], got {}",
                budget.min_ink_fraction
            )));
        }
        if !budget.block_ink_multiplier.is_finite() || budget.block_ink_multiplier < 1.0 {
            return Err(TilescribeError::validation(format!(
                "block_ink_multiplier must be at least 1.0, got {}",
                budget.block_ink_multiplier
            )));
        }
        if !budget.singleton_dim_factor.is_finite() || budget.singleton_dim_factor <= 0.0 {
            return Err(TilescribeError::validation("singleton_dim_factor must be positive"));
        }
        if !(0.0..=1.0).contains(&budget.relaxed_overlap_factor)
            || !budget.relaxed_dim_factor.is_finite()
            || budget.relaxed_dim_factor < 1.0
        {
            return Err(TilescribeError::validation(
                "relaxed_overlap_factor must be in [0, 1] and relaxed_dim_factor at least 1.0",
            ));
        }

        let detection = &self.detection;
        if !(detection.kernel_width_ratio > 0.0 && detection.kernel_width_ratio < 1.0) {
            return Err(TilescribeError::validation(format!(
                "kernel_width_ratio must be in (0, 1), got {}",
                detection.kernel_width_ratio
            )));
        }
        if detection.max_analysis_height == 0 {
            return Err(TilescribeError::validation("max_analysis_height must be greater than zero"));
        }

        if !(0.0..=1.0).contains(&self.merge.iou_threshold) {
            return Err(TilescribeError::validation(format!(
                "iou_threshold must be in [0, 1], got {}",
                self.merge.iou_threshold
            )));
        }

        let recognition = &self.recognition;
        if recognition.endpoint.trim().is_empty() {
            return Err(TilescribeError::validation("Recognition endpoint cannot be empty"));
        }
        if recognition.vision_model.trim().is_empty() || recognition.text_model.trim().is_empty() {
            return Err(TilescribeError::validation("Model names cannot be empty"));
        }
        if recognition.max_retries == 0 {
            return Err(TilescribeError::validation("max_retries must be at least 1"));
        }
        if recognition.tile_timeout_secs == 0 || recognition.document_timeout_secs == 0 {
            return Err(TilescribeError::validation("Timeouts must be greater than zero"));
        }

        if !(0.0..=1.0).contains(&self.filter.min_alnum_ratio)
            || !(0.0..=1.0).contains(&self.filter.empty_ratio_threshold)
        {
            return Err(TilescribeError::validation(
                "min_alnum_ratio and empty_ratio_threshold must be in [0, 1]",
            ));
        }

        let combine = &self.combine;
        if !combine.max_expansion_ratio.is_finite() || combine.max_expansion_ratio < 1.0 {
            return Err(TilescribeError::validation(format!(
                "max_expansion_ratio must be at least 1.0, got {}",
                combine.max_expansion_ratio
            )));
        }
        if !(0.0..=1.0).contains(&combine.line_similarity_threshold) {
            return Err(TilescribeError::validation(format!(
                "line_similarity_threshold must be in [0, 1], got {}",
                combine.line_similarity_threshold
            )));
        }

        Ok(())
    }
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        TilescribeError::validation_with_source(format!("Failed to read config file {}", path.display()), e)
    })
}
