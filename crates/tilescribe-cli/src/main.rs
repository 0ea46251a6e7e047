//! Tilescribe command-line interface.
//!
//! ```bash
//! tilescribe scan.png
//! tilescribe scan.png --combine generative --output results --save-chunks
//! tilescribe screenshot.webp --no-detect --max-dim 800 --format json
//! tilescribe receipt.jpg --prompt "Transcribe section {chunk_number} of {total_chunks} verbatim"
//! ```
//!
//! Configuration comes from `--config`, else a discovered `tilescribe.{toml,yaml,yml,json}`,
//! else defaults. Flags override whichever was loaded.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tilescribe::chunking::TileExtractor;
use tilescribe::recognition::{ProgressCallback, TokenProgress};
use tilescribe::{
    CombineStrategy, DetectionMode, Image, PipelineConfig, PipelineOutput, RecognitionClient, load_image, run_pipeline,
};
use tracing_subscriber::EnvFilter;

/// Minimum spacing between progress log lines.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "tilescribe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Extract ordered text from large images with a vision model", long_about = None)]
struct Cli {
    /// Image to extract text from
    image: PathBuf,

    /// Configuration file (.toml, .yaml, .yml or .json)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Generate endpoint URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Model used for tiles and the whole-image fallback
    #[arg(long)]
    vision_model: Option<String>,

    /// Model used for generative combination
    #[arg(long)]
    text_model: Option<String>,

    /// Custom per-tile prompt; {chunk_number}, {total_chunks} and {coordinates} are filled in
    #[arg(long, short)]
    prompt: Option<String>,

    /// Largest tile side in pixels
    #[arg(long)]
    max_dim: Option<u32>,

    /// Overlap between neighbouring tiles, as a fraction of the tile side
    #[arg(long)]
    overlap: Option<f64>,

    /// Chunk budget per image
    #[arg(long)]
    max_chunks: Option<usize>,

    /// Skip block detection and tile the whole image
    #[arg(long)]
    no_detect: bool,

    /// Keep detected blocks as they are
    #[arg(long)]
    no_merge: bool,

    /// How per-tile texts are combined
    #[arg(long, value_enum)]
    combine: Option<CombineArg>,

    /// Directory for the text, the records and saved chunks
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Save every recognized tile as PNG (requires --output)
    #[arg(long, requires = "output")]
    save_chunks: bool,

    /// What to print on stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Debug logging
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum CombineArg {
    Deterministic,
    Generative,
}

impl From<CombineArg> for CombineStrategy {
    fn from(arg: CombineArg) -> Self {
        match arg {
            CombineArg::Deterministic => CombineStrategy::Deterministic,
            CombineArg::Generative => CombineStrategy::Generative,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PipelineConfig::discover()
            .context("Failed to load discovered config")?
            .unwrap_or_default(),
    };

    if let Some(endpoint) = &cli.endpoint {
        config.recognition.endpoint = endpoint.clone();
    }
    if let Some(model) = &cli.vision_model {
        config.recognition.vision_model = model.clone();
    }
    if let Some(model) = &cli.text_model {
        config.recognition.text_model = model.clone();
    }
    if let Some(prompt) = &cli.prompt {
        config.recognition.tile_prompt = prompt.clone();
    }
    if let Some(max_dim) = cli.max_dim {
        config.budget.max_dim = max_dim;
    }
    if let Some(overlap) = cli.overlap {
        config.budget.overlap_fraction = overlap;
    }
    if let Some(max_chunks) = cli.max_chunks {
        config.budget.max_total_chunks = max_chunks;
    }
    if cli.no_detect {
        config.detection.mode = DetectionMode::Disabled;
    }
    if cli.no_merge {
        config.merge.enabled = false;
    }
    if let Some(combine) = cli.combine {
        config.combine.strategy = combine.into();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Log token progress through `tracing`, at most once per [`PROGRESS_INTERVAL`].
fn throttled_progress() -> ProgressCallback {
    let last: Mutex<Option<Instant>> = Mutex::new(None);
    Arc::new(move |progress: &TokenProgress| {
        let Ok(mut last) = last.lock() else {
            return;
        };
        let now = Instant::now();
        if last.is_some_and(|at| now.duration_since(at) < PROGRESS_INTERVAL) {
            return;
        }
        *last = Some(now);
        tracing::debug!(
            model = %progress.model,
            tokens = progress.tokens,
            tokens_per_second = progress.tokens_per_second,
            percent = progress.percent,
            "generating"
        );
    })
}

/// Keep `[A-Za-z0-9_.-]`, replace everything else with `_`.
fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') { c } else { '_' })
        .collect();
    if sanitized.is_empty() { "image".to_string() } else { sanitized }
}

fn output_stem(image: &Path) -> String {
    let stem = image.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    sanitize_file_name(&stem)
}

fn persist(dir: &Path, stem: &str, image: &Image, output: &PipelineOutput, save_chunks: bool) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let text_path = dir.join(format!("{}_text.txt", stem));
    std::fs::write(&text_path, &output.document).with_context(|| format!("Failed to write {}", text_path.display()))?;
    tracing::info!(path = %text_path.display(), "saved text");

    let records_path = dir.join(format!("{}_records.json", stem));
    let records = serde_json::to_string_pretty(&output.records)?;
    std::fs::write(&records_path, records).with_context(|| format!("Failed to write {}", records_path.display()))?;
    tracing::info!(path = %records_path.display(), records = output.records.len(), "saved records");

    if save_chunks {
        let chunks_dir = dir.join(format!("{}_chunks", stem));
        std::fs::create_dir_all(&chunks_dir).with_context(|| format!("Failed to create {}", chunks_dir.display()))?;
        let chunks = TileExtractor::new().extract(image, &output.tiles)?;
        for chunk in &chunks {
            let path = chunks_dir.join(format!("chunk_{:03}.png", chunk.index));
            std::fs::write(&path, &chunk.data).with_context(|| format!("Failed to write {}", path.display()))?;
        }
        tracing::info!(path = %chunks_dir.display(), chunks = chunks.len(), "saved chunks");
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let image = load_image(&cli.image, &config.input)
        .with_context(|| format!("Failed to load image {}", cli.image.display()))?;

    let client = RecognitionClient::new(config.recognition.clone())?.with_progress(throttled_progress());
    let output = run_pipeline(&image, &client, &config).await?;

    let client_stats = client.stats();
    tracing::info!(
        requests = client_stats.requests,
        backoffs = client_stats.backoffs,
        failures = client_stats.failures,
        tokens = client_stats.tokens,
        "recognition client totals"
    );

    if let Some(dir) = &cli.output {
        persist(dir, &output_stem(&cli.image), &image, &output, cli.save_chunks)?;
    }

    match cli.format {
        OutputFormat::Text => println!("{}", output.document),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
