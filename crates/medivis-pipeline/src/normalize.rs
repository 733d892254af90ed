//! Linear intensity rescale into the canonical 8-bit domain.
//!
//! The minimum input sample maps to 0 and the maximum to 255, with
//! linear interpolation (rounded to nearest) in between:
//!
//! ```text
//! out = round((v - min) × 255 / (max - min))
//! ```
//!
//! This is the first pipeline stage. Every later stage assumes pixel
//! values in `[0, 255]`.

use image::{GrayImage, ImageBuffer, Luma, Primitive};

/// Stretch a single-channel image so its range spans `[0, 255]`.
///
/// Generic over the sample type so both the loader's calibrated `f32`
/// buffers and already-8-bit images go through the same code.
///
/// A constant image (`min == max`) is degenerate: there is no range to
/// stretch, so the input is returned unchanged. Values outside the
/// 8-bit domain are clamped, since 8-bit is the only representation the
/// rest of the pipeline accepts.
///
/// Non-finite samples (NaN, ±inf) are ignored when computing the range
/// and map to 0.
#[must_use = "returns the normalized image"]
pub fn stretch<P>(image: &ImageBuffer<Luma<P>, Vec<P>>) -> GrayImage
where
    P: Primitive + Into<f64>,
{
    let Some((min, max)) = finite_range(image) else {
        return GrayImage::new(image.width(), image.height());
    };

    if max <= min {
        return GrayImage::from_fn(image.width(), image.height(), |x, y| {
            Luma([to_u8(image.get_pixel(x, y).0[0].into())])
        });
    }

    let scale = 255.0 / (max - min);
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let v: f64 = image.get_pixel(x, y).0[0].into();
        if v.is_finite() {
            Luma([to_u8((v - min) * scale)])
        } else {
            Luma([0])
        }
    })
}

/// Minimum and maximum over all finite samples, or `None` when the
/// image has no finite sample at all.
pub fn finite_range<P>(image: &ImageBuffer<Luma<P>, Vec<P>>) -> Option<(f64, f64)>
where
    P: Primitive + Into<f64>,
{
    image
        .pixels()
        .map(|p| -> f64 { p.0[0].into() })
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((v.min(lo), v.max(hi))),
        })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u8(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawImage;

    fn min_max(image: &GrayImage) -> (u8, u8) {
        let min = image.pixels().map(|p| p.0[0]).min().unwrap_or(0);
        let max = image.pixels().map(|p| p.0[0]).max().unwrap_or(0);
        (min, max)
    }

    #[test]
    fn calibrated_range_maps_to_full_byte_range() {
        // Hounsfield-like values: air to dense bone.
        let raw = RawImage::from_fn(10, 10, |x, y| Luma([-1000.0 + (x + 10 * y) as f32 * 40.0]));
        let out = stretch(&raw);
        assert_eq!(min_max(&out), (0, 255));
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(9, 9).0[0], 255);
    }

    #[test]
    fn narrow_gray_range_is_stretched() {
        let img = GrayImage::from_fn(4, 1, |x, _| Luma([100 + x as u8 * 10]));
        let out = stretch(&img);
        let values: Vec<u8> = out.pixels().map(|p| p.0[0]).collect();
        assert_eq!(values, vec![0, 85, 170, 255]);
    }

    #[test]
    fn constant_image_is_returned_unchanged() {
        let img = GrayImage::from_pixel(100, 100, Luma([128]));
        let out = stretch(&img);
        assert_eq!(out, img);
    }

    #[test]
    fn constant_calibrated_image_is_clamped() {
        let raw = RawImage::from_pixel(3, 3, Luma([-500.0]));
        let out = stretch(&raw);
        assert!(out.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn mapping_is_monotone() {
        let raw = RawImage::from_fn(16, 16, |x, y| Luma([((x * 7 + y * 13) % 37) as f32 * 3.5]));
        let out = stretch(&raw);
        for (a, b) in raw.pixels().zip(out.pixels()) {
            for (c, d) in raw.pixels().zip(out.pixels()) {
                if a.0[0] < c.0[0] {
                    assert!(b.0[0] <= d.0[0]);
                }
            }
        }
    }

    #[test]
    fn non_finite_samples_do_not_poison_range() {
        let mut raw = RawImage::from_fn(3, 1, |x, _| Luma([x as f32 * 10.0]));
        raw.put_pixel(1, 0, Luma([f32::NAN]));
        let out = stretch(&raw);
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(1, 0).0[0], 0);
        assert_eq!(out.get_pixel(2, 0).0[0], 255);
    }

    #[test]
    fn sixteen_bit_input() {
        let img: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(2, 1, |x, _| Luma([if x == 0 { 1024 } else { 4095 }]));
        let out = stretch(&img);
        assert_eq!(min_max(&out), (0, 255));
    }

    #[test]
    fn output_dimensions_preserved() {
        let raw = RawImage::from_fn(17, 31, |x, _| Luma([x as f32]));
        let out = stretch(&raw);
        assert_eq!(out.dimensions(), (17, 31));
    }
}
