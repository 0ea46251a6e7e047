//! Overlapping tile grid.

use crate::types::Rect;

/// Tile origins along one axis.
///
/// The last origin is clamped so the final tile ends exactly at `extent`.
fn axis_positions(extent: u32, tile: u32, step: u32) -> Vec<u32> {
    let mut positions = Vec::new();
    let mut pos = 0u32;
    loop {
        let clamped = pos.min(extent - tile);
        if positions.last() != Some(&clamped) {
            positions.push(clamped);
        }
        if pos + tile >= extent {
            break;
        }
        pos += step;
    }
    positions
}

/// Cover a `width` x `height` area with tiles of at most `max_dim` per edge.
///
/// Consecutive tiles share `overlap` of the tile size. The last row and column are
/// pulled back inside the area instead of overhanging it, and duplicates are
/// removed. Rows are emitted top to bottom, tiles left to right within a row.
/// Identical arguments always produce identical output.
///
/// # Example
///
/// ```rust
/// use tilescribe::grid_of;
///
/// let tiles = grid_of(3000, 4000, 1024, 0.15);
/// assert_eq!(tiles.len(), 20);
/// assert!(tiles.iter().all(|t| t.fits_within(3000, 4000)));
/// ```
pub fn grid_of(width: u32, height: u32, max_dim: u32, overlap: f64) -> Vec<Rect> {
    let Some(layout) = GridLayout::new(width, height, max_dim, overlap) else {
        return Vec::new();
    };

    let mut tiles = Vec::with_capacity(layout.xs.len() * layout.ys.len());
    for &y in &layout.ys {
        for &x in &layout.xs {
            tiles.push(Rect::new(x, y, layout.tile_w, layout.tile_h));
        }
    }
    tiles
}

/// Number of tiles [`grid_of`] would produce, without building them.
pub fn grid_count(width: u32, height: u32, max_dim: u32, overlap: f64) -> usize {
    GridLayout::new(width, height, max_dim, overlap).map_or(0, |layout| layout.xs.len() * layout.ys.len())
}

struct GridLayout {
    tile_w: u32,
    tile_h: u32,
    xs: Vec<u32>,
    ys: Vec<u32>,
}

impl GridLayout {
    fn new(width: u32, height: u32, max_dim: u32, overlap: f64) -> Option<Self> {
        if width == 0 || height == 0 || max_dim == 0 {
            return None;
        }
        let overlap = if overlap.is_finite() { overlap.clamp(0.0, 0.95) } else { 0.0 };

        let tile_w = max_dim.min(width);
        let tile_h = max_dim.min(height);
        let step_x = ((tile_w as f64 * (1.0 - overlap)).floor() as u32).max(1);
        let step_y = ((tile_h as f64 * (1.0 - overlap)).floor() as u32).max(1);

        Some(Self {
            tile_w,
            tile_h,
            xs: axis_positions(width, tile_w, step_x),
            ys: axis_positions(height, tile_h, step_y),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_page_grid_scenario() {
        let tiles = grid_of(3000, 4000, 1024, 0.15);
        assert_eq!(tiles.len(), 20);
        assert!(tiles.len() >= 12);

        let xs: Vec<u32> = tiles.iter().take(4).map(|t| t.x).collect();
        assert_eq!(xs, vec![0, 870, 1740, 1976]);

        let last = tiles.last().unwrap();
        assert_eq!(last.right(), 3000);
        assert_eq!(last.bottom(), 4000);
    }

    #[test]
    fn test_grid_covers_every_pixel() {
        let (w, h) = (1000, 700);
        let tiles = grid_of(w, h, 300, 0.2);
        let mut covered = vec![false; (w * h) as usize];
        for tile in &tiles {
            assert!(tile.fits_within(w, h));
            for y in tile.y..tile.bottom() {
                for x in tile.x..tile.right() {
                    covered[(y * w + x) as usize] = true;
                }
            }
        }
        assert!(covered.iter().all(|&c| c));
    }

    #[test]
    fn test_grid_is_deterministic() {
        let first = grid_of(2500, 1800, 700, 0.1);
        let second = grid_of(2500, 1800, 700, 0.1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_small_area_is_single_tile() {
        assert_eq!(grid_of(500, 400, 1024, 0.15), vec![Rect::new(0, 0, 500, 400)]);
    }

    #[test]
    fn test_exact_multiple_has_no_duplicate_tail() {
        let tiles = grid_of(2000, 1000, 1000, 0.0);
        assert_eq!(tiles, vec![Rect::new(0, 0, 1000, 1000), Rect::new(1000, 0, 1000, 1000)]);
    }

    #[test]
    fn test_tiles_are_unique() {
        let tiles = grid_of(1030, 1030, 1024, 0.5);
        let unique: std::collections::HashSet<_> = tiles.iter().collect();
        assert_eq!(unique.len(), tiles.len());
    }

    #[test]
    fn test_grid_count_matches_grid() {
        for (w, h, d, o) in [(3000, 4000, 1024, 0.15), (640, 480, 256, 0.3), (10, 5000, 100, 0.0)] {
            assert_eq!(grid_count(w, h, d, o), grid_of(w, h, d, o).len());
        }
    }

    #[test]
    fn test_degenerate_inputs_yield_nothing() {
        assert!(grid_of(0, 100, 50, 0.1).is_empty());
        assert!(grid_of(100, 100, 0, 0.1).is_empty());
    }
}
