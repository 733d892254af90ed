//! Non-local means denoising for 8-bit grayscale images.
//!
//! Each output pixel is a weighted average of the pixels in a square
//! search window around it. The weight of a candidate pixel depends on
//! how similar its surrounding patch is to the patch around the target
//! pixel:
//!
//! ```text
//! d²(p, q) = mean over patch offsets o of (I(p + o) - I(q + o))²
//! w(p, q)  = exp(-d²(p, q) / h²)
//! ```
//!
//! Flat noisy regions average over many similar patches and get
//! smoothed; edges only find similar patches along the edge and keep
//! their contrast. Out-of-bounds reads clamp to the nearest edge pixel.
//!
//! The learned denoiser falls back to this filter when a model is
//! unavailable or fails.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

/// Non-local means parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NlmParams {
    /// Filter strength. Larger values smooth more aggressively.
    pub h: f32,
    /// Patch half-size. The compared patches are
    /// `(2r + 1) × (2r + 1)` pixels.
    pub patch_radius: u32,
    /// Search window half-size.
    pub search_radius: u32,
}

impl NlmParams {
    /// Default filter strength.
    pub const DEFAULT_H: f32 = 10.0;
    /// Default patch half-size (5x5 patches).
    pub const DEFAULT_PATCH_RADIUS: u32 = 2;
    /// Default search half-size (11x11 window).
    pub const DEFAULT_SEARCH_RADIUS: u32 = 5;
}

impl Default for NlmParams {
    fn default() -> Self {
        Self {
            h: Self::DEFAULT_H,
            patch_radius: Self::DEFAULT_PATCH_RADIUS,
            search_radius: Self::DEFAULT_SEARCH_RADIUS,
        }
    }
}

/// Denoise `image` with non-local means.
///
/// A non-positive or non-finite `h` disables filtering and returns a copy.
#[must_use = "returns the denoised image"]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap
)]
pub fn denoise(image: &GrayImage, params: &NlmParams) -> GrayImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 || !(params.h.is_finite() && params.h > 0.0) {
        return image.clone();
    }

    let data = image.as_raw();
    let width = i64::from(w);
    let height = i64::from(h);
    let at = |x: i64, y: i64| -> i32 {
        let cx = x.clamp(0, width - 1);
        let cy = y.clamp(0, height - 1);
        i32::from(data[(cy * width + cx) as usize])
    };

    let pr = i64::from(params.patch_radius);
    let sr = i64::from(params.search_radius);
    let patch_area = ((2 * pr + 1) * (2 * pr + 1)) as f32;
    let inv_h2 = 1.0 / (params.h * params.h);

    GrayImage::from_fn(w, h, |x, y| {
        let px = i64::from(x);
        let py = i64::from(y);

        let mut weight_sum = 0.0f32;
        let mut value_sum = 0.0f32;
        for dy in -sr..=sr {
            for dx in -sr..=sr {
                let qx = px + dx;
                let qy = py + dy;
                if qx < 0 || qy < 0 || qx >= width || qy >= height {
                    continue;
                }

                let mut ssd = 0i64;
                for oy in -pr..=pr {
                    for ox in -pr..=pr {
                        let d = at(px + ox, py + oy) - at(qx + ox, qy + oy);
                        ssd += i64::from(d * d);
                    }
                }
                let distance = ssd as f32 / patch_area;
                let weight = (-distance * inv_h2).exp();
                weight_sum += weight;
                value_sum += weight * at(qx, qy) as f32;
            }
        }

        // The centre pixel always contributes weight 1, so the sum is
        // never zero.
        let value = value_sum / weight_sum;
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Deterministic pseudo-noise in `[-amp, amp]`.
    fn noise(x: u32, y: u32, amp: i32) -> i32 {
        let v = (x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663)) % 1000;
        (v as i32 * (2 * amp + 1) / 1000) - amp
    }

    fn variance(image: &GrayImage) -> f64 {
        let n = f64::from(image.width() * image.height());
        let mean = image.pixels().map(|p| f64::from(p.0[0])).sum::<f64>() / n;
        image
            .pixels()
            .map(|p| (f64::from(p.0[0]) - mean).powi(2))
            .sum::<f64>()
            / n
    }

    #[test]
    fn dimensions_preserved() {
        let img = GrayImage::from_fn(13, 7, |x, y| Luma([((x * 11 + y * 5) % 256) as u8]));
        assert_eq!(denoise(&img, &NlmParams::default()).dimensions(), (13, 7));
    }

    #[test]
    fn constant_image_unchanged() {
        let img = GrayImage::from_pixel(16, 16, Luma([77]));
        assert_eq!(denoise(&img, &NlmParams::default()), img);
    }

    #[test]
    fn reduces_noise_in_flat_region() {
        let img = GrayImage::from_fn(32, 32, |x, y| {
            Luma([(128 + noise(x, y, 6)).clamp(0, 255) as u8])
        });
        let out = denoise(&img, &NlmParams::default());
        assert!(
            variance(&out) < variance(&img),
            "variance {} should drop below {}",
            variance(&out),
            variance(&img),
        );
    }

    #[test]
    fn preserves_strong_edge() {
        // Left half dark, right half bright; contrast far above h.
        let img = GrayImage::from_fn(24, 24, |x, _| Luma([if x < 12 { 40 } else { 210 }]));
        let out = denoise(&img, &NlmParams::default());
        assert!(out.get_pixel(11, 12).0[0] < 60);
        assert!(out.get_pixel(12, 12).0[0] > 190);
    }

    #[test]
    fn deterministic() {
        let img = GrayImage::from_fn(20, 20, |x, y| {
            Luma([(100 + noise(x, y, 20)).clamp(0, 255) as u8])
        });
        let params = NlmParams::default();
        assert_eq!(denoise(&img, &params), denoise(&img, &params));
    }

    #[test]
    fn zero_strength_is_identity() {
        let img = GrayImage::from_fn(8, 8, |x, y| Luma([(x * 30 + y) as u8]));
        let params = NlmParams {
            h: 0.0,
            ..NlmParams::default()
        };
        assert_eq!(denoise(&img, &params), img);
    }
}
