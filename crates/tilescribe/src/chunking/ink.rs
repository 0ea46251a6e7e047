//! Ink density scoring and tile selection.
//!
//! A rectangle is downsampled to a small grayscale thumbnail and scored by the share
//! of dark pixels. A rectangle that cannot be sampled scores 1.0.

use crate::chunking::planner::ChunkPlan;
use crate::core::config::ChunkBudgetConfig;
use crate::types::{Image, Rect};
use image::GrayImage;
use image::imageops::{self, FilterType};
use std::cmp::Ordering;

/// Edge length of the scoring thumbnail.
pub const INK_SAMPLE_SIZE: u32 = 48;

/// Thumbnail pixels at or below this brightness count as ink. Downsampling averages
/// thin strokes with the paper around them, so the cut sits well above mid-gray.
pub const INK_BRIGHTNESS_THRESHOLD: u8 = 200;

/// Scores rectangles of one image. The grayscale conversion is done once up front.
pub struct InkScorer {
    gray: GrayImage,
}

impl InkScorer {
    pub fn new(image: &Image) -> Self {
        Self { gray: image.to_luma() }
    }

    /// Dark-pixel fraction of `rect`, in `[0, 1]`.
    pub fn score(&self, rect: Rect) -> f64 {
        let (w, h) = self.gray.dimensions();
        if !rect.fits_within(w, h) {
            tracing::debug!(?rect, "cannot sample rectangle for ink score, assuming full ink");
            return 1.0;
        }

        let region = imageops::crop_imm(&self.gray, rect.x, rect.y, rect.width, rect.height).to_image();
        let thumbnail = imageops::resize(&region, INK_SAMPLE_SIZE, INK_SAMPLE_SIZE, FilterType::Triangle);
        let total = thumbnail.pixels().len();
        if total == 0 {
            return 1.0;
        }

        let dark = thumbnail.pixels().filter(|p| p[0] <= INK_BRIGHTNESS_THRESHOLD).count();
        dark as f64 / total as f64
    }
}

/// Convenience for scoring a single rectangle.
pub fn ink_score(image: &Image, rect: Rect) -> f64 {
    InkScorer::new(image).score(rect)
}

/// Outcome of ink-based selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InkSelection {
    /// Selected tiles in reading order.
    pub tiles: Vec<Rect>,
    /// Blocks that passed the block-level threshold.
    pub kept_blocks: usize,
    /// Blocks rejected as content-free.
    pub skipped_blocks: usize,
}

/// Filter and rank planned tiles by ink density.
///
/// - A block scoring below `min_ink_fraction * block_ink_multiplier` is dropped whole.
/// - Every tile must reach `min_ink_fraction` on its own.
/// - Within a block, tiles are ranked by score and only the best
///   `max_chunks_per_block` are kept (no cap when it is 0).
/// - Whole-image grid tiles only get the per-tile threshold.
pub fn select_tiles(scorer: &InkScorer, plan: &ChunkPlan, budget: &ChunkBudgetConfig) -> InkSelection {
    let block_threshold = budget.min_ink_fraction * budget.block_ink_multiplier;
    let mut selection = InkSelection::default();

    for group in &plan.groups {
        let Some(block) = group.block else {
            selection.tiles.extend(
                group
                    .tiles
                    .iter()
                    .copied()
                    .filter(|tile| scorer.score(*tile) >= budget.min_ink_fraction),
            );
            continue;
        };

        let block_score = scorer.score(block);
        if block_score < block_threshold {
            tracing::debug!(?block, score = block_score, threshold = block_threshold, "skipping block without ink");
            selection.skipped_blocks += 1;
            continue;
        }
        selection.kept_blocks += 1;

        let mut scored: Vec<(Rect, f64)> = if group.is_singleton() {
            vec![(block, block_score)]
        } else {
            group.tiles.iter().map(|tile| (*tile, scorer.score(*tile))).collect()
        };
        scored.retain(|(_, score)| *score >= budget.min_ink_fraction);
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        if budget.max_chunks_per_block > 0 {
            scored.truncate(budget.max_chunks_per_block);
        }
        selection.tiles.extend(scored.into_iter().map(|(tile, _)| tile));
    }

    selection.tiles.sort_by(|a, b| a.reading_order(b));
    selection.tiles.dedup();
    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::planner::PlanGroup;
    use crate::types::PlanStrategy;
    use image::{Rgba, RgbaImage};

    /// White page with dark horizontal "text lines" covering about a third of each area.
    fn page_with_text(width: u32, height: u32, areas: &[Rect]) -> Image {
        let mut buffer = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
        for area in areas {
            for y in area.y..area.bottom() {
                if (y - area.y) % 6 >= 2 {
                    continue;
                }
                for x in area.x..area.right() {
                    buffer.put_pixel(x, y, Rgba([0, 0, 0, 255]));
                }
            }
        }
        Image::from_rgba(buffer).unwrap()
    }

    #[test]
    fn test_blank_rect_scores_zero() {
        let image = page_with_text(200, 200, &[]);
        assert_eq!(ink_score(&image, Rect::new(0, 0, 200, 200)), 0.0);
    }

    #[test]
    fn test_solid_black_scores_one() {
        let image = Image::new(50, 50, [0, 0, 0, 255].repeat(2500)).unwrap();
        assert_eq!(ink_score(&image, Rect::new(0, 0, 50, 50)), 1.0);
    }

    #[test]
    fn test_text_scores_between() {
        let image = page_with_text(300, 300, &[Rect::new(0, 0, 300, 150)]);
        let score = ink_score(&image, Rect::new(0, 0, 300, 300));
        assert!(score > 0.1 && score < 0.9, "score {}", score);
    }

    #[test]
    fn test_unsampleable_rect_is_permissive() {
        let image = page_with_text(100, 100, &[]);
        assert_eq!(ink_score(&image, Rect::new(90, 90, 50, 50)), 1.0);
    }

    #[test]
    fn test_blank_block_is_skipped_whole() {
        let image = page_with_text(1000, 1000, &[Rect::new(0, 0, 400, 300)]);
        let plan = ChunkPlan {
            strategy: PlanStrategy::BlockAware,
            groups: vec![
                PlanGroup {
                    block: Some(Rect::new(0, 0, 400, 300)),
                    tiles: vec![Rect::new(0, 0, 400, 300)],
                },
                PlanGroup {
                    block: Some(Rect::new(500, 500, 400, 400)),
                    tiles: vec![Rect::new(500, 500, 400, 400)],
                },
            ],
        };
        let selection = select_tiles(&InkScorer::new(&image), &plan, &ChunkBudgetConfig::default());

        assert_eq!(selection.tiles, vec![Rect::new(0, 0, 400, 300)]);
        assert_eq!(selection.kept_blocks, 1);
        assert_eq!(selection.skipped_blocks, 1);
    }

    #[test]
    fn test_tiles_are_capped_per_block_keeping_the_inkiest() {
        let image = page_with_text(
            1000,
            200,
            &[Rect::new(0, 0, 250, 200), Rect::new(500, 0, 250, 200), Rect::new(750, 0, 250, 60)],
        );
        let block = Rect::new(0, 0, 1000, 200);
        let tiles: Vec<Rect> = (0..4).map(|i| Rect::new(i * 250, 0, 250, 200)).collect();
        let plan = ChunkPlan {
            strategy: PlanStrategy::BlockAware,
            groups: vec![PlanGroup {
                block: Some(block),
                tiles,
            }],
        };
        let budget = ChunkBudgetConfig {
            max_chunks_per_block: 2,
            ..Default::default()
        };
        let selection = select_tiles(&InkScorer::new(&image), &plan, &budget);

        assert_eq!(selection.tiles, vec![Rect::new(0, 0, 250, 200), Rect::new(500, 0, 250, 200)]);
    }

    #[test]
    fn test_zero_cap_means_unlimited() {
        let image = page_with_text(1000, 200, &[Rect::new(0, 0, 1000, 200)]);
        let tiles: Vec<Rect> = (0..4).map(|i| Rect::new(i * 250, 0, 250, 200)).collect();
        let plan = ChunkPlan {
            strategy: PlanStrategy::BlockAware,
            groups: vec![PlanGroup {
                block: Some(Rect::new(0, 0, 1000, 200)),
                tiles: tiles.clone(),
            }],
        };
        let budget = ChunkBudgetConfig {
            max_chunks_per_block: 0,
            ..Default::default()
        };
        assert_eq!(select_tiles(&InkScorer::new(&image), &plan, &budget).tiles, tiles);
    }

    #[test]
    fn test_grid_tiles_only_need_minimum_ink() {
        let image = page_with_text(400, 200, &[Rect::new(0, 0, 200, 200)]);
        let plan = ChunkPlan {
            strategy: PlanStrategy::WholeImageGrid,
            groups: vec![PlanGroup {
                block: None,
                tiles: vec![Rect::new(0, 0, 200, 200), Rect::new(200, 0, 200, 200)],
            }],
        };
        let selection = select_tiles(&InkScorer::new(&image), &plan, &ChunkBudgetConfig::default());
        assert_eq!(selection.tiles, vec![Rect::new(0, 0, 200, 200)]);
    }
}
