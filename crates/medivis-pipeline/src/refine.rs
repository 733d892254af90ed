//! Morphological cleanup of the raw segmentation mask.
//!
//! Bone masks are **closed** (dilate then erode) so fragmented cortical
//! regions merge into contiguous shapes. Every other mode is **opened**
//! (erode then dilate) to remove isolated noise specks. Opening never
//! adds foreground and closing never removes it.
//!
//! When refinement is disabled the mask is not simply passed through:
//! [`UnrefinedPolicy`] decides what replaces it. The default,
//! [`UnrefinedPolicy::CrudeThreshold`], re-thresholds the enhanced image
//! with a single global cut so the difference between refined and
//! unrefined output is plainly visible.

use std::fmt;

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use serde::{Deserialize, Serialize};

use crate::segment::FOREGROUND;
use crate::types::{PipelineConfig, SegmentationMode};

/// Square structuring element size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelSize {
    /// 3x3 square.
    #[default]
    Three,
    /// 5x5 square.
    Five,
}

impl KernelSize {
    /// Chebyshev radius of the square element.
    #[must_use]
    pub const fn radius(self) -> u8 {
        match self {
            Self::Three => 1,
            Self::Five => 2,
        }
    }
}

impl fmt::Display for KernelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Three => write!(f, "3x3"),
            Self::Five => write!(f, "5x5"),
        }
    }
}

/// What the mask becomes when morphological refinement is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnrefinedPolicy {
    /// Replace the mask of Bone, Lung and SoftTissue with
    /// `enhanced > threshold`. Manual keeps its band mask.
    ///
    /// This is a different, coarser segmentation rather than the raw
    /// mask without cleanup.
    CrudeThreshold {
        /// Global cut applied to the enhanced image.
        threshold: u8,
    },
    /// Keep the raw segmentation mask.
    Passthrough,
}

impl UnrefinedPolicy {
    /// Global cut used by the default policy.
    pub const DEFAULT_CRUDE_THRESHOLD: u8 = 150;
}

impl Default for UnrefinedPolicy {
    fn default() -> Self {
        Self::CrudeThreshold {
            threshold: Self::DEFAULT_CRUDE_THRESHOLD,
        }
    }
}

/// Morphological opening with a square element.
#[must_use = "returns the opened mask"]
pub fn open(mask: &GrayImage, kernel: KernelSize) -> GrayImage {
    imageproc::morphology::open(mask, Norm::LInf, kernel.radius())
}

/// Morphological closing with a square element.
#[must_use = "returns the closed mask"]
pub fn close(mask: &GrayImage, kernel: KernelSize) -> GrayImage {
    imageproc::morphology::close(mask, Norm::LInf, kernel.radius())
}

/// Refine `mask` according to `config`.
///
/// `enhanced` is only read by [`UnrefinedPolicy::CrudeThreshold`].
/// This is step 5 in the pipeline, after segmentation.
#[must_use = "returns the refined mask"]
pub fn refine(mask: &GrayImage, enhanced: &GrayImage, config: &PipelineConfig) -> GrayImage {
    if mask.width() == 0 || mask.height() == 0 {
        return mask.clone();
    }

    if config.use_morphology_refine {
        return match config.mode {
            SegmentationMode::Bone => close(mask, config.refine_kernel),
            SegmentationMode::Manual | SegmentationMode::Lung | SegmentationMode::SoftTissue => {
                open(mask, config.refine_kernel)
            }
        };
    }

    match (config.unrefined_policy, config.mode) {
        (UnrefinedPolicy::Passthrough, _)
        | (UnrefinedPolicy::CrudeThreshold { .. }, SegmentationMode::Manual) => mask.clone(),
        (UnrefinedPolicy::CrudeThreshold { threshold }, _) => {
            GrayImage::from_fn(enhanced.width(), enhanced.height(), |x, y| {
                let v = enhanced.get_pixel(x, y).0[0];
                Luma([if v > threshold { FOREGROUND } else { 0 }])
            })
        }
    }
}
