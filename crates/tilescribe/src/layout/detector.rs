//! Content block detection.
//!
//! Grayscale, blur, Otsu binarization with content as foreground, a wide and short
//! rectangular closing that fuses glyphs into text blocks, then the bounding boxes of
//! the external contours. Detection never fails from the caller's point of view: any
//! internal error yields an empty block list and the planner falls back to a grid.

use crate::core::config::{DetectionConfig, DetectionMode};
use crate::layout::morphology::close_rect;
use crate::types::{ContentBlock, Image, Rect};
use crate::{Result, TilescribeError};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::contrast::otsu_level;
use imageproc::filter::gaussian_blur_f32;

/// Finds probable content regions on a page.
#[derive(Debug, Clone, Default)]
pub struct BlockDetector {
    config: DetectionConfig,
}

/// Analysis copy of the page plus what is needed to map boxes back.
struct Prepared {
    gray: GrayImage,
    scale: f64,
    /// Width of the analysed page before padding.
    analysed_width: u32,
}

impl BlockDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Detect content blocks, sorted top to bottom.
    ///
    /// Returns an empty list when detection is disabled, when the page is blank, and
    /// when anything goes wrong internally.
    pub fn detect(&self, image: &Image) -> Vec<ContentBlock> {
        if self.config.mode == DetectionMode::Disabled {
            tracing::debug!("block detection disabled");
            return Vec::new();
        }

        match self.try_detect(image) {
            Ok(blocks) => {
                tracing::debug!(count = blocks.len(), "detected content blocks");
                blocks
            }
            Err(e) => {
                tracing::warn!(error = %e, "block detection failed, continuing without blocks");
                Vec::new()
            }
        }
    }

    fn try_detect(&self, image: &Image) -> Result<Vec<ContentBlock>> {
        let prepared = self.prepare(image)?;
        let padded = pad_with_white(&prepared.gray, self.config.padding)?;

        let blurred = if self.config.blur_sigma > 0.0 {
            gaussian_blur_f32(&padded, self.config.blur_sigma)
        } else {
            padded
        };

        let (lo, hi) = blurred
            .pixels()
            .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
        if hi.saturating_sub(lo) < self.config.min_contrast {
            tracing::debug!(min = lo, max = hi, "page has no contrast, treating as blank");
            return Ok(Vec::new());
        }

        let level = otsu_level(&blurred);
        let mut binary = blurred;
        for p in binary.pixels_mut() {
            *p = Luma([if p[0] <= level { 255 } else { 0 }]);
        }

        let kernel_w = ((prepared.analysed_width as f64 * self.config.kernel_width_ratio).round() as u32).max(3);
        let kernel_h = self.config.kernel_height.max(1);
        let closed = close_rect(&binary, kernel_w, kernel_h);

        let mut blocks: Vec<ContentBlock> = find_contours::<u32>(&closed)
            .into_iter()
            .filter(|contour| contour.parent.is_none())
            .filter_map(|contour| {
                let (mut x0, mut y0, mut x1, mut y1) = (u32::MAX, u32::MAX, 0u32, 0u32);
                for point in &contour.points {
                    x0 = x0.min(point.x);
                    y0 = y0.min(point.y);
                    x1 = x1.max(point.x);
                    y1 = y1.max(point.y);
                }
                if x0 > x1 || y0 > y1 {
                    return None;
                }
                self.to_source_rect(x0, y0, x1 + 1, y1 + 1, prepared.scale, image)
            })
            .filter(|rect| self.keeps(rect, image))
            .map(ContentBlock::from)
            .collect();

        blocks.sort_by(|a, b| a.rect.reading_order(&b.rect));
        Ok(blocks)
    }

    /// Grayscale copy, downscaled when the page is very tall.
    fn prepare(&self, image: &Image) -> Result<Prepared> {
        let gray = image.to_luma();
        let (w, h) = gray.dimensions();

        let tall = h as f64 / w as f64 > self.config.tall_aspect_ratio;
        if !tall || h <= self.config.max_analysis_height {
            return Ok(Prepared {
                gray,
                scale: 1.0,
                analysed_width: w,
            });
        }

        let scale = self.config.max_analysis_height as f64 / h as f64;
        let new_w = ((w as f64 * scale).round() as u32).max(1);
        let new_h = self.config.max_analysis_height.max(1);
        tracing::debug!(
            from_width = w,
            from_height = h,
            to_width = new_w,
            to_height = new_h,
            "downscaling tall page for analysis"
        );

        Ok(Prepared {
            gray: imageops::resize(&gray, new_w, new_h, FilterType::Triangle),
            scale,
            analysed_width: new_w,
        })
    }

    /// Undo padding and downscale, then clamp to the source image.
    fn to_source_rect(&self, x0: u32, y0: u32, x1: u32, y1: u32, scale: f64, image: &Image) -> Option<Rect> {
        let pad = self.config.padding;
        let unpad = |v: u32| v.saturating_sub(pad) as f64;

        let sx0 = (unpad(x0) / scale).floor() as u32;
        let sy0 = (unpad(y0) / scale).floor() as u32;
        let sx1 = (unpad(x1) / scale).ceil() as u32;
        let sy1 = (unpad(y1) / scale).ceil() as u32;

        Rect::from_corners(sx0, sy0, sx1, sy1)?.clamp_to(image.width(), image.height())
    }

    fn keeps(&self, rect: &Rect, image: &Image) -> bool {
        if rect.width < self.config.min_block_width || rect.height < self.config.min_block_height {
            return false;
        }
        let covers_width = rect.width as f64 >= image.width() as f64 * self.config.full_page_fraction;
        let covers_height = rect.height as f64 >= image.height() as f64 * self.config.full_page_fraction;
        !(covers_width && covers_height)
    }
}

fn pad_with_white(gray: &GrayImage, padding: u32) -> Result<GrayImage> {
    let (w, h) = gray.dimensions();
    let grow = padding
        .checked_mul(2)
        .ok_or_else(|| TilescribeError::image_processing("Detection padding overflows"))?;
    let (pw, ph) = match (w.checked_add(grow), h.checked_add(grow)) {
        (Some(pw), Some(ph)) => (pw, ph),
        _ => return Err(TilescribeError::image_processing("Padded page size overflows")),
    };

    let mut padded = GrayImage::from_pixel(pw, ph, Luma([255]));
    imageops::replace(&mut padded, gray, padding as i64, padding as i64);
    Ok(padded)
}
