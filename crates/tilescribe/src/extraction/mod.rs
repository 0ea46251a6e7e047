//! Turning tiles into filtered, ordered text records.
//!
//! - [`filter`]: cleaning, placeholder and noise rejection, per-run deduplication
//! - [`orchestrator`]: sequential recognition with the whole-image fallback

pub mod filter;
pub mod orchestrator;

pub use filter::{FilterOutcome, Rejection, TextFilter, alnum_ratio, clean_text, is_placeholder};
pub use orchestrator::{ExtractionOrchestrator, ExtractionReport, render_tile_prompt};
