//! Block consolidation.
//!
//! The detector tends to split a paragraph into several near-touching boxes. The
//! merger folds overlapping or adjacent boxes into their union until the set is
//! stable, so merging an already merged list returns it unchanged.

use crate::core::config::MergeConfig;
use crate::types::{ContentBlock, Rect};

#[derive(Debug, Clone, Default)]
pub struct BlockMerger {
    config: MergeConfig,
}

impl BlockMerger {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// Merge overlapping and adjacent blocks.
    ///
    /// The output is sorted by `(y, x)` and does not depend on input order. With
    /// merging disabled, blocks pass through in their original order.
    pub fn merge(&self, blocks: &[ContentBlock]) -> Vec<ContentBlock> {
        if !self.config.enabled {
            return blocks.to_vec();
        }

        let mut current: Vec<Rect> = blocks.iter().map(|b| b.rect).collect();
        current.sort_by(|a, b| a.reading_order(b));

        let mut passes = 0usize;
        loop {
            passes += 1;
            let (next, changed) = self.fold_pass(&current);
            current = next;
            if !changed {
                break;
            }
        }

        current.sort_by(|a, b| a.reading_order(b));
        tracing::debug!(
            before = blocks.len(),
            after = current.len(),
            passes,
            "merged content blocks"
        );
        current.into_iter().map(ContentBlock::from).collect()
    }

    /// One greedy pass. Reports whether any fold happened.
    fn fold_pass(&self, rects: &[Rect]) -> (Vec<Rect>, bool) {
        let mut merged: Vec<Rect> = Vec::with_capacity(rects.len());
        let mut changed = false;

        for rect in rects {
            match merged.iter_mut().find(|existing| self.should_merge(existing, rect)) {
                Some(existing) => {
                    *existing = existing.union(rect);
                    changed = true;
                }
                None => merged.push(*rect),
            }
        }

        (merged, changed)
    }

    fn should_merge(&self, a: &Rect, b: &Rect) -> bool {
        a.iou(b) >= self.config.iou_threshold || a.gap(b) <= self.config.adjacency_tolerance
    }
}
