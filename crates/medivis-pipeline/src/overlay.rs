//! Color overlay of the mask onto the enhanced image.
//!
//! The grayscale image is expanded to RGB, then every mask-positive
//! pixel is blended toward the mode color:
//!
//! ```text
//! out = round(0.4 × color + 0.6 × base)
//! ```
//!
//! Pixels outside the mask keep the base value. An empty mask returns
//! the RGB base untouched.

use image::{GrayImage, Rgb, RgbImage};

use crate::types::OverlayColor;

/// Weight of the overlay color in the blend.
pub const COLOR_WEIGHT: f32 = 0.4;
/// Weight of the grayscale base in the blend.
pub const BASE_WEIGHT: f32 = 1.0 - COLOR_WEIGHT;

/// Expand a grayscale image to three identical channels.
#[must_use = "returns the RGB image"]
pub fn to_rgb(image: &GrayImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    })
}

/// Blend `color` onto `base` wherever `mask` is non-zero.
///
/// This is the last pipeline step.
#[must_use = "returns the overlay image"]
pub fn composite(base: &GrayImage, mask: &GrayImage, color: OverlayColor) -> RgbImage {
    let rgb = to_rgb(base);
    if mask.pixels().all(|p| p.0[0] == 0) {
        return rgb;
    }

    RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let pixel = *rgb.get_pixel(x, y);
        if mask.get_pixel(x, y).0[0] == 0 {
            return pixel;
        }
        let mut out = [0u8; 3];
        for (channel, (&c, &b)) in out.iter_mut().zip(color.0.iter().zip(pixel.0.iter())) {
            *channel = blend(c, b);
        }
        Rgb(out)
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn blend(color: u8, base: u8) -> u8 {
    f32::from(color)
        .mul_add(COLOR_WEIGHT, f32::from(base) * BASE_WEIGHT)
        .round()
        .clamp(0.0, 255.0) as u8
}
