//! Mode-dependent threshold classification.
//!
//! Each [`SegmentationMode`] selects one rule over the enhanced image:
//!
//! | mode         | foreground when              |
//! |--------------|------------------------------|
//! | `Manual`     | `manual_low ≤ p ≤ manual_high` |
//! | `Bone`       | `p > bone`                   |
//! | `Lung`       | `p < lung`                   |
//! | `SoftTissue` | `soft_low ≤ p ≤ soft_high`   |
//!
//! Foreground pixels are 255, background 0. Lung is an inverted
//! threshold: it selects dark, air-filled regions.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::types::{PipelineError, SegmentationMode};

/// Foreground value in every mask.
pub const FOREGROUND: u8 = 255;

/// Per-mode threshold parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Manual band lower bound (inclusive).
    pub manual_low: u8,
    /// Manual band upper bound (inclusive).
    pub manual_high: u8,
    /// Bone: pixels strictly above this are foreground.
    pub bone: u8,
    /// Lung: pixels strictly below this are foreground.
    pub lung: u8,
    /// Soft tissue band lower bound (inclusive).
    pub soft_low: u8,
    /// Soft tissue band upper bound (inclusive).
    pub soft_high: u8,
}

impl Thresholds {
    /// Default lower bound of the manual band.
    pub const DEFAULT_MANUAL_LOW: u8 = 50;
    /// Default upper bound of the manual band.
    pub const DEFAULT_MANUAL_HIGH: u8 = 200;
    /// Default bone cutoff.
    pub const DEFAULT_BONE: u8 = 200;
    /// Default lung cutoff.
    pub const DEFAULT_LUNG: u8 = 60;
    /// Default lower bound of the soft tissue band.
    pub const DEFAULT_SOFT_LOW: u8 = 90;
    /// Default upper bound of the soft tissue band.
    pub const DEFAULT_SOFT_HIGH: u8 = 160;

    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if a band's lower bound
    /// exceeds its upper bound.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.manual_low > self.manual_high {
            return Err(PipelineError::InvalidConfig(format!(
                "manual band is empty ({} > {})",
                self.manual_low, self.manual_high,
            )));
        }
        if self.soft_low > self.soft_high {
            return Err(PipelineError::InvalidConfig(format!(
                "soft tissue band is empty ({} > {})",
                self.soft_low, self.soft_high,
            )));
        }
        Ok(())
    }

    /// Whether `value` is foreground under `mode`.
    #[must_use]
    pub const fn classify(&self, mode: SegmentationMode, value: u8) -> bool {
        match mode {
            SegmentationMode::Manual => value >= self.manual_low && value <= self.manual_high,
            SegmentationMode::Bone => value > self.bone,
            SegmentationMode::Lung => value < self.lung,
            SegmentationMode::SoftTissue => value >= self.soft_low && value <= self.soft_high,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            manual_low: Self::DEFAULT_MANUAL_LOW,
            manual_high: Self::DEFAULT_MANUAL_HIGH,
            bone: Self::DEFAULT_BONE,
            lung: Self::DEFAULT_LUNG,
            soft_low: Self::DEFAULT_SOFT_LOW,
            soft_high: Self::DEFAULT_SOFT_HIGH,
        }
    }
}

/// Classify every pixel of `image` under `mode`.
///
/// This is step 4 in the pipeline, after denoising.
#[must_use = "returns the binary mask"]
pub fn segment(image: &GrayImage, mode: SegmentationMode, thresholds: &Thresholds) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y).0[0];
        Luma([if thresholds.classify(mode, v) { FOREGROUND } else { 0 }])
    })
}

/// Number of foreground pixels in a mask.
#[must_use]
pub fn foreground_count(mask: &GrayImage) -> u64 {
    mask.pixels().filter(|p| p.0[0] != 0).count() as u64
}
