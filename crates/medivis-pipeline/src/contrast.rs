//! Histogram-based contrast enhancement.
//!
//! Two mutually exclusive variants:
//!
//! - **Global** equalization remaps every pixel through one lookup table
//!   built from the whole-image cumulative histogram. The lowest occupied
//!   intensity maps to 0 and the highest to 255.
//! - **CLAHE** splits the image into a fixed grid of tiles, equalizes
//!   each tile with a clipped histogram, and bilinearly interpolates
//!   between the four nearest tile lookup tables so tile seams do not
//!   show. The clip limit bounds how much any single intensity bin can
//!   be amplified, which keeps sensor noise in flat regions from being
//!   blown up.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// Number of intensity bins for 8-bit images.
const BINS: usize = 256;

/// CLAHE parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaheParams {
    /// Tiles per axis. The image is divided into `grid × grid` tiles.
    pub grid: u32,
    /// Clip limit as a multiple of the uniform bin height
    /// (`tile_area / 256`).
    pub clip_limit: f32,
}

impl ClaheParams {
    /// Default tiles per axis.
    pub const DEFAULT_GRID: u32 = 8;
    /// Default clip limit.
    pub const DEFAULT_CLIP_LIMIT: f32 = 2.0;

    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the grid is zero or
    /// the clip limit is not a positive finite number.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.grid == 0 {
            return Err(PipelineError::InvalidConfig(
                "CLAHE grid must be at least 1".to_string(),
            ));
        }
        if !(self.clip_limit.is_finite() && self.clip_limit > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "CLAHE clip limit must be positive, got {}",
                self.clip_limit,
            )));
        }
        Ok(())
    }
}

impl Default for ClaheParams {
    fn default() -> Self {
        Self {
            grid: Self::DEFAULT_GRID,
            clip_limit: Self::DEFAULT_CLIP_LIMIT,
        }
    }
}

/// Apply the configured contrast enhancement.
///
/// This is step 2 in the pipeline, between normalization and denoising.
#[must_use = "returns the enhanced image"]
pub fn enhance(image: &GrayImage, adaptive: bool, clahe: &ClaheParams) -> GrayImage {
    if adaptive {
        equalize_clahe(image, clahe)
    } else {
        equalize_global(image)
    }
}

/// Global histogram equalization.
///
/// ```text
/// lut[v] = round((cdf[v] - cdf_min) × 255 / (total - cdf_min))
/// ```
///
/// where `cdf_min` is the count of the lowest occupied bin. A constant
/// image has no spread to redistribute and is returned unchanged.
#[must_use = "returns the equalized image"]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn equalize_global(image: &GrayImage) -> GrayImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    let hist = imageproc::stats::histogram(image);
    let counts = &hist.channels[0];
    let total: u64 = counts.iter().map(|&c| u64::from(c)).sum();
    let cdf_min = counts.iter().copied().find(|&c| c > 0).map_or(0, u64::from);
    if total == cdf_min {
        return image.clone();
    }

    let scale = 255.0 / (total - cdf_min) as f64;
    let mut lut = [0u8; BINS];
    let mut cumulative = 0u64;
    for (entry, &count) in lut.iter_mut().zip(counts.iter()) {
        cumulative += u64::from(count);
        *entry = (cumulative.saturating_sub(cdf_min) as f64 * scale)
            .round()
            .clamp(0.0, 255.0) as u8;
    }
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([lut[usize::from(image.get_pixel(x, y).0[0])]])
    })
}

/// Contrast Limited Adaptive Histogram Equalization over a
/// `grid × grid` tile layout.
///
/// Tile bounds are `i × len / grid`, so tile sizes along an axis differ
/// by at most one pixel. An axis shorter than the grid gets one tile per
/// pixel. A zero grid is treated as 1.
#[must_use = "returns the equalized image"]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn equalize_clahe(image: &GrayImage, params: &ClaheParams) -> GrayImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }

    let grid = params.grid.max(1);
    let col_spans = tile_spans(w, grid);
    let row_spans = tile_spans(h, grid);
    let cols = col_spans.len();

    let mut luts = Vec::with_capacity(cols * row_spans.len());
    for &(y0, y1) in &row_spans {
        for &(x0, x1) in &col_spans {
            let area = (x1 - x0) * (y1 - y0);

            let mut hist = [0u32; BINS];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[usize::from(image.get_pixel(x, y).0[0])] += 1;
                }
            }
            let clip = ((params.clip_limit * area as f32 / BINS as f32) as u32).max(1);
            clip_histogram(&mut hist, clip);
            luts.push(tile_lut(&hist, area));
        }
    }

    let x_weights = interpolation_weights(&col_spans, w);
    let y_weights = interpolation_weights(&row_spans, h);
    let lut_at = |tx: usize, ty: usize| &luts[ty * cols + tx];

    GrayImage::from_fn(w, h, |x, y| {
        let v = usize::from(image.get_pixel(x, y).0[0]);
        let (tx0, tx1, ax) = x_weights[x as usize];
        let (ty0, ty1, ay) = y_weights[y as usize];

        let v00 = f32::from(lut_at(tx0, ty0)[v]);
        let v10 = f32::from(lut_at(tx1, ty0)[v]);
        let v01 = f32::from(lut_at(tx0, ty1)[v]);
        let v11 = f32::from(lut_at(tx1, ty1)[v]);

        let top_row = v00.mul_add(1.0 - ax, v10 * ax);
        let bottom_row = v01.mul_add(1.0 - ax, v11 * ax);
        let value = top_row.mul_add(1.0 - ay, bottom_row * ay);
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

/// Split `len` pixels into `min(grid, len)` contiguous `[start, end)`
/// spans.
#[allow(clippy::cast_possible_truncation)]
fn tile_spans(len: u32, grid: u32) -> Vec<(u32, u32)> {
    let tiles = u64::from(grid.min(len));
    let bound = |i: u64| (i * u64::from(len) / tiles) as u32;
    (0..tiles).map(|i| (bound(i), bound(i + 1))).collect()
}

/// For every coordinate along an axis: the two tiles whose centers
/// bracket it and the weight of the second one.
///
/// Coordinates before the first center or past the last one use that
/// tile alone.
#[allow(clippy::cast_precision_loss)]
fn interpolation_weights(spans: &[(u32, u32)], len: u32) -> Vec<(usize, usize, f32)> {
    let centers: Vec<f32> = spans
        .iter()
        .map(|&(start, end)| (start + end - 1) as f32 / 2.0)
        .collect();
    let last = centers.len().saturating_sub(1);

    (0..len)
        .map(|p| {
            let p = p as f32;
            match centers.iter().rposition(|&c| c <= p) {
                None => (0, 0, 0.0),
                Some(i) if i >= last => (last, last, 0.0),
                Some(i) => (i, i + 1, (p - centers[i]) / (centers[i + 1] - centers[i])),
            }
        })
        .collect()
}

/// Clip every bin at `clip` and spread the excess evenly over all bins.
fn clip_histogram(hist: &mut [u32; BINS], clip: u32) {
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    let per_bin = excess / BINS as u32;
    #[allow(clippy::cast_possible_truncation)]
    let remainder = (excess % BINS as u32) as usize;
    for bin in hist.iter_mut() {
        *bin += per_bin;
    }
    if remainder > 0 {
        // Spread the leftover one count at a time across the full range.
        let step = (BINS / remainder).max(1);
        for bin in hist.iter_mut().step_by(step).take(remainder) {
            *bin += 1;
        }
    }
}

/// Lookup table mapping each intensity to its scaled cumulative count.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn tile_lut(hist: &[u32; BINS], area: u32) -> [u8; BINS] {
    let scale = 255.0 / area.max(1) as f32;
    let mut lut = [0u8; BINS];
    let mut cumulative = 0u32;
    for (entry, &count) in lut.iter_mut().zip(hist.iter()) {
        cumulative += count;
        *entry = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}
