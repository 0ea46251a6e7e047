//! Core data model shared by every pipeline stage.
//!
//! Coordinates are always absolute pixel coordinates of the source [`Image`] with the
//! origin at the top-left corner. A [`Rect`] is half-open: it covers
//! `x..x + width` horizontally and `y..y + height` vertically.

use crate::error::{Result, TilescribeError};
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::io::Cursor;

/// Text returned when a run produced no usable text.
///
/// "No text found" is a valid terminal outcome, not an error.
pub const EMPTY_RESULT_MARKER: &str = "[no text found]";

/// A decoded raster image with a 4-channel interleaved (RGBA8) pixel buffer.
///
/// Immutable once constructed. The pipeline invocation that creates it owns it
/// exclusively; it is dropped when the run ends.
#[derive(Debug, Clone)]
pub struct Image {
    buffer: RgbaImage,
}

impl Image {
    /// Build an image from raw RGBA8 pixels.
    ///
    /// # Errors
    ///
    /// Returns `TilescribeError::Validation` if a dimension is zero or the buffer
    /// length is not `width * height * 4`.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(TilescribeError::validation(format!(
                "Image dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }

        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(TilescribeError::validation(format!(
                "Pixel buffer length {} does not match {}x{}x4 = {}",
                pixels.len(),
                width,
                height,
                expected
            )));
        }

        let buffer = RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| TilescribeError::validation("Pixel buffer rejected by image container"))?;
        Ok(Self { buffer })
    }

    /// Wrap an already-decoded RGBA buffer.
    pub fn from_rgba(buffer: RgbaImage) -> Result<Self> {
        if buffer.width() == 0 || buffer.height() == 0 {
            return Err(TilescribeError::validation(format!(
                "Image dimensions must be non-zero, got {}x{}",
                buffer.width(),
                buffer.height()
            )));
        }
        Ok(Self { buffer })
    }

    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }

    /// Raw interleaved RGBA bytes.
    pub fn pixels(&self) -> &[u8] {
        self.buffer.as_raw()
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.buffer
    }

    /// Rectangle covering the whole image.
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width(), self.height())
    }

    /// Grayscale view with alpha composited onto white.
    ///
    /// Transparent regions read as paper, never as ink.
    pub fn to_luma(&self) -> GrayImage {
        let mut gray = GrayImage::new(self.width(), self.height());
        for (dst, src) in gray.pixels_mut().zip(self.buffer.pixels()) {
            let luma = (299 * src[0] as u32 + 587 * src[1] as u32 + 114 * src[2] as u32) / 1000;
            let alpha = src[3] as u32;
            *dst = Luma([((luma * alpha + 255 * (255 - alpha)) / 255) as u8]);
        }
        gray
    }

    /// Composite alpha onto white and encode as an opaque RGB PNG.
    ///
    /// This is the single-page representation sent by the whole-image fallback.
    pub fn flatten_to_png(&self) -> Result<Vec<u8>> {
        let mut flat = RgbImage::new(self.width(), self.height());
        for (dst, src) in flat.pixels_mut().zip(self.buffer.pixels()) {
            let alpha = src[3] as u32;
            let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
            *dst = Rgb([blend(src[0]), blend(src[1]), blend(src[2])]);
        }

        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(flat)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| TilescribeError::image_processing_with_source("Failed to encode flattened image", e))?;
        Ok(bytes)
    }
}

/// Axis-aligned rectangle in absolute image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Build from exclusive corner coordinates. Returns `None` for empty rectangles.
    pub fn from_corners(x0: u32, y0: u32, x1: u32, y1: u32) -> Option<Self> {
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the rectangle lies fully inside a `width` x `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        !self.is_empty() && self.right() <= width && self.bottom() <= height
    }

    /// Clip to a `width` x `height` image. Returns `None` if nothing remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let x0 = self.x.min(width);
        let y0 = self.y.min(height);
        let x1 = self.right().min(width);
        let y1 = self.bottom().min(height);
        Self::from_corners(x0, y0, x1, y1)
    }

    /// Shift by an offset, used to move block-local tiles into image coordinates.
    pub fn translate(&self, dx: u32, dy: u32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Rect) -> Self {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let x1 = self.right().max(other.right());
        let y1 = self.bottom().max(other.bottom());
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }

    pub fn intersection(&self, other: &Rect) -> Option<Self> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        Self::from_corners(x0, y0, x1, y1)
    }

    /// Intersection over union in `[0, 1]`.
    pub fn iou(&self, other: &Rect) -> f64 {
        let inter = self.intersection(other).map_or(0, |r| r.area());
        if inter == 0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        inter as f64 / union as f64
    }

    /// Chebyshev gap between two rectangles: 0 when they touch or overlap.
    pub fn gap(&self, other: &Rect) -> u32 {
        let horizontal = if self.right() <= other.x {
            other.x - self.right()
        } else if other.right() <= self.x {
            self.x - other.right()
        } else {
            0
        };
        let vertical = if self.bottom() <= other.y {
            other.y - self.bottom()
        } else if other.bottom() <= self.y {
            self.y - other.bottom()
        } else {
            0
        };
        horizontal.max(vertical)
    }

    /// Reading order: top-to-bottom, then left-to-right.
    pub fn reading_order(&self, other: &Rect) -> Ordering {
        (self.y, self.x, self.height, self.width).cmp(&(other.y, other.x, other.height, other.width))
    }
}

/// A detected region of interest. Produced by the block detector, consolidated by the
/// block merger and read-only afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentBlock {
    pub rect: Rect,
}

impl ContentBlock {
    pub const fn new(rect: Rect) -> Self {
        Self { rect }
    }
}

impl From<Rect> for ContentBlock {
    fn from(rect: Rect) -> Self {
        Self { rect }
    }
}

/// An encoded tile ready for recognition.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Independently encoded image bytes (PNG) of just this tile.
    pub data: Vec<u8>,
    /// Assignment order. Not meaningful once records are sorted by position.
    pub index: usize,
    /// Absolute position in the source image.
    pub position: Rect,
}

/// Recognized text for one chunk that survived the pre-filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub text: String,
    pub position: Rect,
}

/// How the chunk plan was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStrategy {
    /// No blocks: plain grid over the whole image.
    WholeImageGrid,
    /// Per-block tiling within budget.
    BlockAware,
    /// Per-block tiling after relaxing overlap and tile size.
    Relaxed,
    /// Budget still exceeded: coarse grid over the whole image.
    CoarseGrid,
}

/// How the final document was assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationMethod {
    /// No qualifying records, or too little text to combine.
    Empty,
    /// Exactly one record, returned unchanged.
    Single,
    /// Line-overlap merge chosen by configuration.
    Deterministic,
    /// Generative merge accepted by the expansion guard.
    Generative,
    /// Generative merge rejected or failed; line-overlap merge used instead.
    DeterministicFallback,
}

/// Counters describing one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub detected_blocks: usize,
    pub merged_blocks: usize,
    pub inked_blocks: usize,
    pub plan_strategy: Option<PlanStrategy>,
    pub planned_tiles: usize,
    pub selected_tiles: usize,
    pub chunks_succeeded: usize,
    pub chunks_failed: usize,
    pub chunks_rejected: usize,
    pub chunks_duplicate: usize,
    /// The whole-image fallback call was made.
    pub fallback_attempted: bool,
    /// The fallback text replaced the per-chunk records.
    pub fallback_used: bool,
    pub combination: Option<CombinationMethod>,
    pub expansion_ratio: Option<f64>,
    pub tokens: u64,
}

/// Final output of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    /// The combined document, or [`EMPTY_RESULT_MARKER`].
    pub document: String,
    /// Filtered per-chunk records in reading order.
    pub records: Vec<ExtractionRecord>,
    /// Tiles sent to recognition, in reading order.
    pub tiles: Vec<Rect>,
    pub stats: PipelineStats,
}

impl PipelineOutput {
    /// Whether the run ended without usable text.
    pub fn is_empty(&self) -> bool {
        self.document == EMPTY_RESULT_MARKER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_rejects_wrong_buffer_length() {
        let result = Image::new(4, 4, vec![0; 10]);
        assert!(matches!(result, Err(TilescribeError::Validation { .. })));
    }

    #[test]
    fn test_image_rejects_zero_dimension() {
        assert!(Image::new(0, 4, Vec::new()).is_err());
    }

    #[test]
    fn test_image_accessors() {
        let image = Image::new(3, 2, vec![255; 24]).unwrap();
        assert_eq!(image.width(), 3);
        assert_eq!(image.height(), 2);
        assert_eq!(image.pixels().len(), 24);
        assert_eq!(image.bounds(), Rect::new(0, 0, 3, 2));
    }

    #[test]
    fn test_flatten_to_png_is_opaque() {
        let mut pixels = vec![0u8; 2 * 2 * 4];
        pixels[3] = 0;
        let image = Image::new(2, 2, pixels).unwrap();
        let png = image.flatten_to_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert!(!decoded.color().has_alpha());
        assert_eq!(decoded.to_rgb8().get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_to_luma_treats_transparency_as_white() {
        let mut pixels = vec![0u8; 8];
        pixels[3] = 255;
        let image = Image::new(2, 1, pixels).unwrap();
        let gray = image.to_luma();
        assert_eq!(gray.get_pixel(0, 0)[0], 0);
        assert_eq!(gray.get_pixel(1, 0)[0], 255);
    }

    #[test]
    fn test_rect_union_and_intersection() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(5, 5, 10, 10);
        assert_eq!(a.union(&b), Rect::new(0, 0, 15, 15));
        assert_eq!(a.intersection(&b), Some(Rect::new(5, 5, 5, 5)));
        assert_eq!(a.intersection(&Rect::new(20, 20, 1, 1)), None);
    }

    #[test]
    fn test_rect_iou() {
        let a = Rect::new(0, 0, 10, 10);
        assert!((a.iou(&a) - 1.0).abs() < f64::EPSILON);
        let b = Rect::new(5, 0, 10, 10);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-9);
        assert_eq!(a.iou(&Rect::new(30, 30, 5, 5)), 0.0);
    }

    #[test]
    fn test_rect_gap() {
        let a = Rect::new(0, 0, 10, 10);
        assert_eq!(a.gap(&Rect::new(14, 0, 5, 5)), 4);
        assert_eq!(a.gap(&Rect::new(0, 13, 5, 5)), 3);
        assert_eq!(a.gap(&Rect::new(5, 5, 10, 10)), 0);
        assert_eq!(a.gap(&Rect::new(10, 0, 5, 5)), 0);
    }

    #[test]
    fn test_rect_clamp_to() {
        let r = Rect::new(90, 90, 20, 20);
        assert_eq!(r.clamp_to(100, 100), Some(Rect::new(90, 90, 10, 10)));
        assert_eq!(Rect::new(100, 0, 5, 5).clamp_to(100, 100), None);
    }

    #[test]
    fn test_reading_order_sorts_by_y_then_x() {
        let mut rects = vec![Rect::new(50, 10, 5, 5), Rect::new(0, 10, 5, 5), Rect::new(80, 0, 5, 5)];
        rects.sort_by(|a, b| a.reading_order(b));
        assert_eq!(
            rects,
            vec![Rect::new(80, 0, 5, 5), Rect::new(0, 10, 5, 5), Rect::new(50, 10, 5, 5)]
        );
    }
}
