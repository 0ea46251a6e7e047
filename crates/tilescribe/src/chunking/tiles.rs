//! Tile cropping and encoding.

use crate::types::{Chunk, Image, Rect};
use crate::{Result, TilescribeError};
use image::imageops;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Crops planned rectangles out of an image and encodes them losslessly as PNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct TileExtractor;

impl TileExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Encode exactly the pixels of `rect` as PNG.
    ///
    /// # Errors
    ///
    /// Returns `TilescribeError::Validation` if `rect` is empty or leaves the image.
    pub fn crop(&self, image: &Image, rect: Rect) -> Result<Vec<u8>> {
        if !rect.fits_within(image.width(), image.height()) {
            return Err(TilescribeError::validation(format!(
                "Tile {:?} is outside the {}x{} image",
                rect,
                image.width(),
                image.height()
            )));
        }

        let tile = imageops::crop_imm(image.as_rgba(), rect.x, rect.y, rect.width, rect.height).to_image();
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(tile)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| TilescribeError::image_processing_with_source(format!("Failed to encode tile {:?}", rect), e))?;
        Ok(bytes)
    }

    /// Build chunks for `rects`, indexed in the given order.
    pub fn extract(&self, image: &Image, rects: &[Rect]) -> Result<Vec<Chunk>> {
        rects
            .iter()
            .enumerate()
            .map(|(index, rect)| {
                Ok(Chunk {
                    data: self.crop(image, *rect)?,
                    index,
                    position: *rect,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Image {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[x as u8, y as u8, (x ^ y) as u8, 255]);
            }
        }
        Image::new(width, height, pixels).unwrap()
    }

    #[test]
    fn test_crop_preserves_exact_pixels() {
        let image = gradient(64, 48);
        let rect = Rect::new(10, 5, 20, 30);
        let png = TileExtractor::new().crop(&image, rect).unwrap();

        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (20, 30));
        for (x, y, pixel) in decoded.enumerate_pixels() {
            assert_eq!(pixel, image.as_rgba().get_pixel(rect.x + x, rect.y + y));
        }
    }

    #[test]
    fn test_crop_rejects_out_of_bounds() {
        let image = gradient(32, 32);
        let result = TileExtractor::new().crop(&image, Rect::new(20, 20, 20, 20));
        assert!(matches!(result, Err(TilescribeError::Validation { .. })));
    }

    #[test]
    fn test_extract_assigns_indices_in_order() {
        let image = gradient(40, 40);
        let rects = [Rect::new(20, 20, 10, 10), Rect::new(0, 0, 10, 10)];
        let chunks = TileExtractor::new().extract(&image, &rects).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].position, rects[0]);
        assert_eq!(chunks[1].index, 1);
        assert!(!chunks[1].data.is_empty());
    }
}
