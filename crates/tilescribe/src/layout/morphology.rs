//! Binary morphology with rectangular structuring elements.
//!
//! Rectangles are separable, so dilation runs as a horizontal pass followed by a
//! vertical pass, each a sliding-window count that is linear in the image size
//! regardless of kernel width. Foreground is any non-zero pixel; outputs are 0 or 255.

use image::GrayImage;

/// Horizontal binary dilation.
///
/// Each output pixel is 255 if any input pixel in the window
/// `[x - (k - 1) / 2, x + k / 2]` of the same row is non-zero.
fn dilate_horizontal(input: &[u8], output: &mut [u8], w: usize, h: usize, kernel_w: usize) {
    if kernel_w <= 1 {
        for (dst, src) in output.iter_mut().zip(input) {
            *dst = if *src > 0 { 255 } else { 0 };
        }
        return;
    }
    let reach_left = (kernel_w - 1) / 2;
    let reach_right = kernel_w / 2;

    for (src, dst) in input.chunks_exact(w).zip(output.chunks_exact_mut(w)).take(h) {
        let mut count = src[..=reach_right.min(w - 1)].iter().filter(|&&p| p > 0).count();

        for x in 0..w {
            dst[x] = if count > 0 { 255 } else { 0 };

            let entering = x + reach_right + 1;
            if entering < w && src[entering] > 0 {
                count += 1;
            }
            if x >= reach_left && src[x - reach_left] > 0 {
                count -= 1;
            }
        }
    }
}

/// Vertical binary dilation, column by column.
fn dilate_vertical(input: &[u8], output: &mut [u8], w: usize, h: usize, kernel_h: usize) {
    if kernel_h <= 1 {
        for (dst, src) in output.iter_mut().zip(input) {
            *dst = if *src > 0 { 255 } else { 0 };
        }
        return;
    }
    let reach_up = (kernel_h - 1) / 2;
    let reach_down = kernel_h / 2;

    for x in 0..w {
        let mut count = (0..=reach_down.min(h - 1)).filter(|&y| input[y * w + x] > 0).count();

        for y in 0..h {
            output[y * w + x] = if count > 0 { 255 } else { 0 };

            let entering = y + reach_down + 1;
            if entering < h && input[entering * w + x] > 0 {
                count += 1;
            }
            if y >= reach_up && input[(y - reach_up) * w + x] > 0 {
                count -= 1;
            }
        }
    }
}

/// Dilate with a `kernel_w` x `kernel_h` rectangle.
pub fn dilate_rect(image: &GrayImage, kernel_w: u32, kernel_h: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }
    let (wu, hu) = (w as usize, h as usize);

    let mut horizontal = vec![0u8; wu * hu];
    dilate_horizontal(image.as_raw(), &mut horizontal, wu, hu, kernel_w as usize);

    let mut out = vec![0u8; wu * hu];
    dilate_vertical(&horizontal, &mut out, wu, hu, kernel_h as usize);

    GrayImage::from_raw(w, h, out).unwrap_or_else(|| GrayImage::new(w, h))
}

/// Erode with a `kernel_w` x `kernel_h` rectangle.
///
/// Computed as the complement of dilating the complement, so pixels outside the
/// image behave as foreground and shapes touching the border do not shrink.
pub fn erode_rect(image: &GrayImage, kernel_w: u32, kernel_h: u32) -> GrayImage {
    let inverted = invert(image);
    let dilated = dilate_rect(&inverted, kernel_w, kernel_h);
    invert(&dilated)
}

/// Closing: dilation followed by erosion. Bridges gaps narrower than the kernel.
pub fn close_rect(image: &GrayImage, kernel_w: u32, kernel_h: u32) -> GrayImage {
    let dilated = dilate_rect(image, kernel_w, kernel_h);
    erode_rect(&dilated, kernel_w, kernel_h)
}

fn invert(image: &GrayImage) -> GrayImage {
    let mut out = image.clone();
    for p in out.pixels_mut() {
        p.0[0] = if p.0[0] > 0 { 0 } else { 255 };
    }
    out
}
