//! Page layout analysis: finding content blocks and consolidating them.

pub mod detector;
pub mod merger;
pub mod morphology;

pub use detector::BlockDetector;
pub use merger::BlockMerger;
