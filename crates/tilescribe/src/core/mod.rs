//! Pipeline boundary: configuration, image input and the end-to-end run.
//!
//! Everything that touches the outside world before recognition lives here:
//! - **Configuration**: loading, discovering and validating [`config::PipelineConfig`]
//! - **I/O**: reading files, checking size and format, decoding to RGBA
//! - **Pipeline**: composing detection, planning, recognition and combination
//!
//! # Example
//!
//! ```rust,no_run
//! use tilescribe::core::config::PipelineConfig;
//! use tilescribe::core::pipeline::extract_file;
//!
//! # async fn example() -> tilescribe::Result<()> {
//! let config = PipelineConfig::discover()?.unwrap_or_default();
//! let output = extract_file("scan.png", &config).await?;
//! println!("{}", output.document);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod io;
pub mod pipeline;

pub use config::PipelineConfig;
pub use pipeline::{extract_bytes, extract_file, run_pipeline};
