//! Edge extraction over the refined mask.
//!
//! Two edge maps are combined into the displayed mask:
//!
//! 1. the **morphological gradient** of the mask (3x3 dilation minus 3x3
//!    erosion), a thin band along every region boundary;
//! 2. a **gradient-magnitude edge map** of the enhanced image (Sobel,
//!    non-maximum suppression, two-threshold hysteresis), intersected
//!    with the mask so only edges inside the selected tissue survive.
//!
//! The displayed mask becomes the pixel-wise maximum of the two edge
//! maps. The region fill is dropped so the in-region edges stay visible:
//! unioned with the filled mask they would be hidden under it.
//!
//! The gradient-magnitude detector is implemented here instead of
//! calling `imageproc::edges::canny` because that function always
//! pre-blurs (the image has already been denoised) and its hysteresis
//! step walks off the image border
//! (<https://github.com/image-rs/imageproc/issues/705>).

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

use crate::segment::FOREGROUND;

/// `tan(22.5°)`, the boundary between horizontal and diagonal gradient
/// directions.
const TAN_22_5: f32 = 0.414_213_57;
/// `tan(67.5°)`, the boundary between diagonal and vertical directions.
const TAN_67_5: f32 = 2.414_213_6;

/// Morphological gradient: `dilate₃ₓ₃(mask) - erode₃ₓ₃(mask)`.
#[must_use = "returns the boundary band"]
pub fn morphological_gradient(mask: &GrayImage) -> GrayImage {
    let dilated = imageproc::morphology::dilate(mask, Norm::LInf, 1);
    let eroded = imageproc::morphology::erode(mask, Norm::LInf, 1);
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([dilated
            .get_pixel(x, y)
            .0[0]
            .saturating_sub(eroded.get_pixel(x, y).0[0])])
    })
}

/// Binary edge map of `image`: 255 on edges, 0 elsewhere.
///
/// Gradients use the 3x3 Sobel operator with L1 magnitude
/// (`|gx| + |gy|`). Pixels that are not a local maximum along the
/// gradient direction are suppressed. Pixels above `high` seed edges;
/// pixels above `low` join an edge when 8-connected to one.
///
/// `low` is clamped to at most `high`.
#[must_use = "returns the binary edge map"]
pub fn gradient_edges(image: &GrayImage, low: f32, high: f32) -> GrayImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }
    let low = low.min(high);

    let gx = horizontal_sobel(image);
    let gy = vertical_sobel(image);
    let magnitude: Vec<f32> = gx
        .pixels()
        .zip(gy.pixels())
        .map(|(a, b)| f32::from(a.0[0].unsigned_abs()) + f32::from(b.0[0].unsigned_abs()))
        .collect();

    let thinned = non_maximum_suppression(&magnitude, &gx, &gy, w, h);
    hysteresis(&thinned, w, h, low, high)
}

/// Keep only pixels whose magnitude is a local maximum across the edge.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn non_maximum_suppression(
    magnitude: &[f32],
    gx: &imageproc::definitions::Image<Luma<i16>>,
    gy: &imageproc::definitions::Image<Luma<i16>>,
    w: u32,
    h: u32,
) -> Vec<f32> {
    let width = i64::from(w);
    let height = i64::from(h);
    let at = |x: i64, y: i64| -> f32 {
        if x < 0 || y < 0 || x >= width || y >= height {
            0.0
        } else {
            magnitude[(y * width + x) as usize]
        }
    };

    let mut out = vec![0.0; magnitude.len()];
    for y in 0..h {
        for x in 0..w {
            let (xi, yi) = (i64::from(x), i64::from(y));
            let m = at(xi, yi);
            if m <= 0.0 {
                continue;
            }
            let dx = f32::from(gx.get_pixel(x, y).0[0]);
            let dy = f32::from(gy.get_pixel(x, y).0[0]);
            let (ax, ay) = (dx.abs(), dy.abs());

            let (before, after) = if ay <= ax * TAN_22_5 {
                (at(xi - 1, yi), at(xi + 1, yi))
            } else if ay > ax * TAN_67_5 {
                (at(xi, yi - 1), at(xi, yi + 1))
            } else if (dx > 0.0) == (dy > 0.0) {
                (at(xi - 1, yi - 1), at(xi + 1, yi + 1))
            } else {
                (at(xi + 1, yi - 1), at(xi - 1, yi + 1))
            };

            // Strict on one side so a plateau two pixels wide keeps exactly one.
            if m > before && m >= after {
                out[(y * w + x) as usize] = m;
            }
        }
    }
    out
}

/// Two-threshold edge tracking with an explicit stack.
///
/// Every neighbour coordinate is bounds-checked before it is read.
fn hysteresis(thinned: &[f32], w: u32, h: u32, low: f32, high: f32) -> GrayImage {
    let mut out = GrayImage::new(w, h);
    let mut stack = Vec::new();
    let index = |x: u32, y: u32| (y * w + x) as usize;

    for y in 0..h {
        for x in 0..w {
            if thinned[index(x, y)] <= high || out.get_pixel(x, y).0[0] != 0 {
                continue;
            }
            out.put_pixel(x, y, Luma([FOREGROUND]));
            stack.push((x, y));

            while let Some((cx, cy)) = stack.pop() {
                for ny in cy.saturating_sub(1)..=(cy + 1).min(h - 1) {
                    for nx in cx.saturating_sub(1)..=(cx + 1).min(w - 1) {
                        if out.get_pixel(nx, ny).0[0] == 0 && thinned[index(nx, ny)] > low {
                            out.put_pixel(nx, ny, Luma([FOREGROUND]));
                            stack.push((nx, ny));
                        }
                    }
                }
            }
        }
    }
    out
}

/// Pixel-wise maximum of two same-sized images.
#[must_use = "returns the merged image"]
pub fn union(a: &GrayImage, b: &GrayImage) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        Luma([a.get_pixel(x, y).0[0].max(b.get_pixel(x, y).0[0])])
    })
}

/// Pixel-wise minimum of two same-sized images.
#[must_use = "returns the intersected image"]
pub fn intersect(a: &GrayImage, b: &GrayImage) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        Luma([a.get_pixel(x, y).0[0].min(b.get_pixel(x, y).0[0])])
    })
}

/// Edge view of `mask`: its boundary band plus the gradient edges of
/// `enhanced` that fall inside it.
///
/// This is step 6 in the pipeline, run only when edges are enabled.
#[must_use = "returns the edge mask"]
pub fn extract(mask: &GrayImage, enhanced: &GrayImage, low: f32, high: f32) -> GrayImage {
    if mask.width() == 0 || mask.height() == 0 {
        return mask.clone();
    }
    let boundary = morphological_gradient(mask);
    let interior = intersect(&gradient_edges(enhanced, low, high), mask);
    union(&boundary, &interior)
}
