//! Budget-aware chunk planning.
//!
//! Planning happens in stages, stopping at the first one that fits:
//!
//! 1. No blocks: a plain grid over the whole image.
//! 2. Block-aware: blocks small enough stay whole, larger blocks get a local grid.
//! 3. Relaxed: the same with less overlap and larger tiles, when stage 2 exceeds the
//!    chunk budget.
//! 4. Coarse grid: a whole-image grid with large tiles when even the relaxed plan is
//!    more than 20% over budget.
//!
//! Every rectangle a plan holds lies inside the image, and a plan built from a
//! non-empty block list never holds more than `max_total_chunks * 1.2` tiles.

use crate::chunking::grid::{grid_count, grid_of};
use crate::core::config::ChunkBudgetConfig;
use crate::types::{ContentBlock, Image, PlanStrategy, Rect};

/// Factor by which the budget may be exceeded before block-aware planning is abandoned.
pub const BUDGET_SLACK: f64 = 1.2;

/// Growth applied to the coarse tile size until the coarse grid fits the budget.
const COARSE_ESCALATION: f64 = 1.25;

/// Tiles planned for one block, or for the whole image.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanGroup {
    /// The block these tiles subdivide. `None` for whole-image grids.
    pub block: Option<Rect>,
    pub tiles: Vec<Rect>,
}

impl PlanGroup {
    /// Whether the block is kept as a single tile.
    pub fn is_singleton(&self) -> bool {
        matches!(self.block, Some(block) if self.tiles.len() == 1 && self.tiles[0] == block)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    pub strategy: PlanStrategy,
    pub groups: Vec<PlanGroup>,
}

impl ChunkPlan {
    /// All planned rectangles, group by group.
    pub fn rects(&self) -> Vec<Rect> {
        self.groups.iter().flat_map(|g| g.tiles.iter().copied()).collect()
    }

    pub fn tile_count(&self) -> usize {
        self.groups.iter().map(|g| g.tiles.len()).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChunkPlanner {
    budget: ChunkBudgetConfig,
}

impl ChunkPlanner {
    pub fn new(budget: ChunkBudgetConfig) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> &ChunkBudgetConfig {
        &self.budget
    }

    /// Plan tile rectangles for the given blocks.
    pub fn plan(&self, blocks: &[ContentBlock], image: &Image) -> Vec<Rect> {
        self.plan_groups(blocks, image).rects()
    }

    /// Plan tiles, keeping track of which block each tile came from.
    pub fn plan_groups(&self, blocks: &[ContentBlock], image: &Image) -> ChunkPlan {
        let (width, height) = (image.width(), image.height());
        let blocks: Vec<Rect> = blocks.iter().filter_map(|b| b.rect.clamp_to(width, height)).collect();

        if blocks.is_empty() {
            let tiles = grid_of(width, height, self.budget.max_dim, self.budget.overlap_fraction);
            tracing::debug!(tiles = tiles.len(), "no blocks, planning whole-image grid");
            return ChunkPlan {
                strategy: PlanStrategy::WholeImageGrid,
                groups: vec![PlanGroup { block: None, tiles }],
            };
        }

        let max_total = self.budget.max_total_chunks;
        let estimate = self.estimate(&blocks, self.budget.max_dim, self.budget.in_block_overlap);
        if estimate <= max_total {
            tracing::debug!(blocks = blocks.len(), tiles = estimate, "block-aware plan within budget");
            return self.block_plan(&blocks, self.budget.max_dim, self.budget.in_block_overlap, PlanStrategy::BlockAware);
        }

        let relaxed_dim = ((self.budget.max_dim as f64 * self.budget.relaxed_dim_factor).round() as u32).max(1);
        let relaxed_overlap = self.budget.in_block_overlap * self.budget.relaxed_overlap_factor;
        let relaxed = self.estimate(&blocks, relaxed_dim, relaxed_overlap);
        let ceiling = budget_ceiling(max_total);
        tracing::debug!(
            estimate,
            relaxed,
            max_total,
            relaxed_dim,
            relaxed_overlap,
            "chunk estimate over budget, relaxing"
        );

        if relaxed <= ceiling {
            return self.block_plan(&blocks, relaxed_dim, relaxed_overlap, PlanStrategy::Relaxed);
        }

        tracing::warn!(
            relaxed,
            ceiling,
            "relaxed plan still over budget, falling back to coarse grid"
        );
        ChunkPlan {
            strategy: PlanStrategy::CoarseGrid,
            groups: vec![PlanGroup {
                block: None,
                tiles: self.coarse_grid(width, height, ceiling),
            }],
        }
    }

    fn is_singleton(&self, block: &Rect, max_dim: u32) -> bool {
        let limit = max_dim as f64 * self.budget.singleton_dim_factor;
        block.width as f64 <= limit && block.height as f64 <= limit
    }

    fn estimate(&self, blocks: &[Rect], max_dim: u32, overlap: f64) -> usize {
        blocks
            .iter()
            .map(|block| {
                if self.is_singleton(block, max_dim) {
                    1
                } else {
                    grid_count(block.width, block.height, max_dim, overlap)
                }
            })
            .sum()
    }

    fn block_plan(&self, blocks: &[Rect], max_dim: u32, overlap: f64, strategy: PlanStrategy) -> ChunkPlan {
        let groups = blocks
            .iter()
            .map(|block| {
                let tiles = if self.is_singleton(block, max_dim) {
                    vec![*block]
                } else {
                    grid_of(block.width, block.height, max_dim, overlap)
                        .into_iter()
                        .map(|tile| tile.translate(block.x, block.y))
                        .collect()
                };
                PlanGroup {
                    block: Some(*block),
                    tiles,
                }
            })
            .collect();
        ChunkPlan { strategy, groups }
    }

    /// Coarse whole-image grid, with tiles grown until the count fits `ceiling`.
    fn coarse_grid(&self, width: u32, height: u32, ceiling: usize) -> Vec<Rect> {
        let overlap = self.budget.coarse_grid_overlap;
        let mut dim = self.budget.coarse_grid_max_dim.max(1);
        while grid_count(width, height, dim, overlap) > ceiling && dim < width.max(height) {
            dim = ((dim as f64 * COARSE_ESCALATION).ceil() as u32).max(dim + 1);
        }
        if dim != self.budget.coarse_grid_max_dim {
            tracing::debug!(dim, "coarse grid tile size enlarged to fit budget");
        }
        grid_of(width, height, dim, overlap)
    }
}

/// Largest tile count a block-based plan may emit.
fn budget_ceiling(max_total: usize) -> usize {
    ((max_total as f64 * BUDGET_SLACK).floor() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(width: u32, height: u32) -> Image {
        Image::new(width, height, vec![255; (width * height * 4) as usize]).unwrap()
    }

    fn blocks(rects: &[Rect]) -> Vec<ContentBlock> {
        rects.iter().copied().map(ContentBlock::from).collect()
    }

    #[test]
    fn test_no_blocks_uses_whole_image_grid() {
        let planner = ChunkPlanner::default();
        let plan = planner.plan_groups(&[], &image(3000, 4000));

        assert_eq!(plan.strategy, PlanStrategy::WholeImageGrid);
        assert_eq!(plan.rects(), grid_of(3000, 4000, 1024, 0.15));
        assert!(plan.tile_count() >= 12);
    }

    #[test]
    fn test_small_blocks_are_singletons() {
        let planner = ChunkPlanner::default();
        let input = blocks(&[Rect::new(10, 10, 500, 200), Rect::new(10, 400, 1200, 1200)]);
        let plan = planner.plan_groups(&input, &image(2000, 2000));

        assert_eq!(plan.strategy, PlanStrategy::BlockAware);
        assert_eq!(plan.rects(), vec![Rect::new(10, 10, 500, 200), Rect::new(10, 400, 1200, 1200)]);
        assert!(plan.groups.iter().all(PlanGroup::is_singleton));
    }

    #[test]
    fn test_large_block_is_subdivided_in_image_coordinates() {
        let planner = ChunkPlanner::default();
        let input = blocks(&[Rect::new(100, 50, 2500, 800)]);
        let plan = planner.plan_groups(&input, &image(3000, 1000));

        assert_eq!(plan.strategy, PlanStrategy::BlockAware);
        let tiles = plan.rects();
        assert_eq!(tiles.len(), 3);
        assert_eq!(tiles[0], Rect::new(100, 50, 1024, 800));
        assert_eq!(tiles.last().unwrap().right(), 2600);
        for tile in &tiles {
            assert!(tile.x >= 100 && tile.right() <= 2600);
            assert!(tile.y >= 50 && tile.bottom() <= 850);
        }
    }

    #[test]
    fn test_over_budget_plan_is_relaxed() {
        let budget = ChunkBudgetConfig {
            max_total_chunks: 4,
            ..Default::default()
        };
        let planner = ChunkPlanner::new(budget);
        let input = blocks(&[Rect::new(0, 0, 3000, 1500)]);
        let plan = planner.plan_groups(&input, &image(3000, 1500));

        assert_eq!(plan.strategy, PlanStrategy::Relaxed);
        assert!(plan.tile_count() <= 4);
    }

    #[test]
    fn test_far_over_budget_falls_back_to_coarse_grid() {
        let budget = ChunkBudgetConfig {
            max_total_chunks: 5,
            ..Default::default()
        };
        let planner = ChunkPlanner::new(budget);
        let rects: Vec<Rect> = (0..20).map(|i| Rect::new(0, i * 500, 6000, 400)).collect();
        let plan = planner.plan_groups(&blocks(&rects), &image(6000, 10000));

        assert_eq!(plan.strategy, PlanStrategy::CoarseGrid);
        assert!(plan.tile_count() <= 6);
        assert!(plan.rects().iter().all(|r| r.fits_within(6000, 10000)));
    }

    #[test]
    fn test_budget_bound_holds_for_many_layouts() {
        for max_total in [1usize, 3, 10, 40] {
            let budget = ChunkBudgetConfig {
                max_total_chunks: max_total,
                ..Default::default()
            };
            let planner = ChunkPlanner::new(budget);
            let img = image(4000, 5000);
            let layouts = [
                vec![Rect::new(0, 0, 4000, 5000)],
                (0..12).map(|i| Rect::new(0, i * 400, 3900, 350)).collect::<Vec<_>>(),
                (0..30).map(|i| Rect::new((i % 5) * 800, (i / 5) * 800, 700, 700)).collect(),
            ];
            for layout in layouts {
                let rects = planner.plan(&blocks(&layout), &img);
                let ceiling = (max_total as f64 * 1.2).floor().max(1.0) as usize;
                assert!(
                    rects.len() <= ceiling,
                    "{} tiles for budget {}",
                    rects.len(),
                    max_total
                );
                assert!(rects.iter().all(|r| r.fits_within(4000, 5000)));
            }
        }
    }

    #[test]
    fn test_out_of_bounds_blocks_are_clamped() {
        let planner = ChunkPlanner::default();
        let input = blocks(&[Rect::new(900, 900, 500, 500)]);
        let rects = planner.plan(&input, &image(1000, 1000));
        assert_eq!(rects, vec![Rect::new(900, 900, 100, 100)]);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let planner = ChunkPlanner::default();
        let input = blocks(&[Rect::new(0, 0, 2000, 3000), Rect::new(2100, 0, 800, 800)]);
        let img = image(3000, 3000);
        let first = planner.plan(&input, &img);
        let second = planner.plan(&input, &img);
        assert_eq!(first, second);
    }
}
