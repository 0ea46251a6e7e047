//! Tile planning and preparation.
//!
//! Turns content blocks into a bounded list of overlapping tiles:
//! - **Grid** (`grid`): the shared overlapping-grid primitive
//! - **Planner** (`planner`): block-aware planning under a chunk budget
//! - **Ink** (`ink`): dark-pixel scoring used to drop empty blocks and rank tiles
//! - **Tiles** (`tiles`): cropping and PNG encoding of the selected rectangles

pub mod grid;
pub mod ink;
pub mod planner;
pub mod tiles;

pub use grid::{grid_count, grid_of};
pub use ink::{InkScorer, InkSelection, ink_score, select_tiles};
pub use planner::{ChunkPlan, ChunkPlanner, PlanGroup};
pub use tiles::TileExtractor;
