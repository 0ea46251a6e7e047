//! Reassembling per-tile text into one document.

pub mod combiner;
pub mod merge;

pub use combiner::{CombinedDocument, TextCombiner, expansion_ratio, text_volume};
pub use merge::{OverlapMerger, levenshtein, line_similarity, normalize_line};
