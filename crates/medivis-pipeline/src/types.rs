//! Shared types for the medivis image processing pipeline.

use std::fmt;
use std::str::FromStr;

use image::{ImageBuffer, Luma};
use serde::{Deserialize, Serialize};

use crate::contrast::ClaheParams;
use crate::refine::{KernelSize, UnrefinedPolicy};
use crate::segment::Thresholds;

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can reference the
/// overlay without depending on `image` directly.
pub use image::RgbImage;

/// Calibrated single-channel intensity buffer as handed over by the
/// image loader, before normalization.
///
/// Samples may take any finite range (e.g. Hounsfield-like values in
/// `-1000..3000`). The Normalizer maps them into the 8-bit domain.
pub type RawImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of any image buffer.
    #[must_use]
    pub fn of<P: image::Pixel>(image: &ImageBuffer<P, Vec<P::Subpixel>>) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Total number of pixels.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Returns `true` if either axis is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Tissue class selected for segmentation.
///
/// Exactly one mode is active per pipeline run. The mode picks both the
/// threshold rule (see [`crate::segment`]) and the overlay color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SegmentationMode {
    /// Band-pass over a user-chosen intensity window.
    #[default]
    Manual,
    /// Brightest tissue class: single upper threshold.
    Bone,
    /// Air-filled regions: inverted threshold selecting dark pixels.
    Lung,
    /// Mid-intensity band.
    SoftTissue,
}

impl SegmentationMode {
    /// All modes, in presentation order.
    pub const ALL: [Self; 4] = [Self::Manual, Self::Bone, Self::Lung, Self::SoftTissue];

    /// Overlay color bound to this mode.
    #[must_use]
    pub const fn overlay_color(self) -> OverlayColor {
        match self {
            Self::Manual => OverlayColor::YELLOW,
            Self::Bone => OverlayColor::RED,
            Self::Lung => OverlayColor::BLUE,
            Self::SoftTissue => OverlayColor::GREEN,
        }
    }
}

impl fmt::Display for SegmentationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("Manual"),
            Self::Bone => f.write_str("Bone"),
            Self::Lung => f.write_str("Lung"),
            Self::SoftTissue => f.write_str("SoftTissue"),
        }
    }
}

impl FromStr for SegmentationMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "manual" => Ok(Self::Manual),
            "bone" => Ok(Self::Bone),
            "lung" => Ok(Self::Lung),
            "softtissue" | "tissue" => Ok(Self::SoftTissue),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown segmentation mode '{other}'"
            ))),
        }
    }
}

/// Fixed RGB color washed over the region of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayColor(pub [u8; 3]);

impl OverlayColor {
    /// Manual mode.
    pub const YELLOW: Self = Self([255, 255, 0]);
    /// Bone mode.
    pub const RED: Self = Self([255, 0, 0]);
    /// Lung mode.
    pub const BLUE: Self = Self([0, 0, 255]);
    /// Soft tissue mode.
    pub const GREEN: Self = Self([0, 255, 0]);
}

/// Configuration for one pipeline run.
///
/// A `PipelineConfig` is an immutable snapshot: the pipeline reads it
/// once and never writes back. Callers that drive the pipeline from
/// interactive state build a fresh value per run.
///
/// All parameters have defaults; [`validate`](Self::validate) checks
/// the cross-field invariants before a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Tile-adaptive (CLAHE) instead of global histogram equalization.
    pub use_adaptive_contrast: bool,

    /// Attempt the learned denoiser before the classical fallback.
    /// When `false`, a fixed small-kernel blur is applied instead.
    pub use_learned_denoise: bool,

    /// Morphological cleanup of the raw mask. When `false`, the
    /// [`unrefined_policy`](Self::unrefined_policy) decides the mask.
    pub use_morphology_refine: bool,

    /// Merge boundary and in-region edge maps into the displayed mask.
    pub show_edges: bool,

    /// Active tissue class.
    pub mode: SegmentationMode,

    /// Per-mode threshold parameters.
    pub thresholds: Thresholds,

    /// CLAHE parameters, used when `use_adaptive_contrast` is `true`.
    pub clahe: ClaheParams,

    /// Structuring element used for opening/closing.
    pub refine_kernel: KernelSize,

    /// What the mask becomes when refinement is disabled.
    pub unrefined_policy: UnrefinedPolicy,

    /// Hysteresis low threshold for the gradient-magnitude edge map.
    pub edge_low: f32,

    /// Hysteresis high threshold for the gradient-magnitude edge map.
    pub edge_high: f32,
}

impl PipelineConfig {
    /// Default hysteresis low threshold.
    pub const DEFAULT_EDGE_LOW: f32 = 50.0;
    /// Default hysteresis high threshold.
    pub const DEFAULT_EDGE_HIGH: f32 = 150.0;

    /// Check cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] describing the first
    /// violated invariant.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.thresholds.validate()?;
        self.clahe.validate()?;
        if !(self.edge_low.is_finite() && self.edge_high.is_finite()) {
            return Err(PipelineError::InvalidConfig(
                "edge thresholds must be finite".to_string(),
            ));
        }
        if self.edge_low < 0.0 || self.edge_low > self.edge_high {
            return Err(PipelineError::InvalidConfig(format!(
                "edge thresholds must satisfy 0 <= low <= high (low={}, high={})",
                self.edge_low, self.edge_high,
            )));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            use_adaptive_contrast: false,
            use_learned_denoise: false,
            use_morphology_refine: true,
            show_edges: false,
            mode: SegmentationMode::default(),
            thresholds: Thresholds::default(),
            clahe: ClaheParams::default(),
            refine_kernel: KernelSize::default(),
            unrefined_policy: UnrefinedPolicy::default(),
            edge_low: Self::DEFAULT_EDGE_LOW,
            edge_high: Self::DEFAULT_EDGE_HIGH,
        }
    }
}

/// The four images handed to the presentation layer and the
/// persistence sink. All share the same dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutput {
    /// Input after range normalization.
    pub original: GrayImage,
    /// Contrast-enhanced, denoised image.
    pub enhanced: GrayImage,
    /// Final binary mask (values 0 or 255).
    pub mask: GrayImage,
    /// Mode color blended over `enhanced` on mask pixels.
    pub overlay: RgbImage,
}

impl PipelineOutput {
    /// Shared dimensions of the four images.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::of(&self.original)
    }
}

/// Result of running the pipeline with all intermediate stage outputs
/// preserved.
///
/// Each field captures the output of one logical pipeline stage so a
/// viewer can show every step of the chain.
#[derive(Debug, Clone)]
pub struct StagedResult {
    /// Stage 1: normalized input.
    pub original: GrayImage,
    /// Stage 2: histogram-equalized image (global or CLAHE).
    pub equalized: GrayImage,
    /// Stage 3: denoised image, the "enhanced" output.
    pub enhanced: GrayImage,
    /// Which denoising path produced `enhanced`.
    pub denoise_path: crate::denoise::DenoisePath,
    /// Stage 4: raw threshold mask.
    pub segmented: GrayImage,
    /// Stage 5: mask after morphological refinement (or the unrefined
    /// policy).
    pub refined: GrayImage,
    /// Stage 6: final mask, with edges merged when enabled.
    pub mask: GrayImage,
    /// Stage 7: color overlay.
    pub overlay: RgbImage,
    /// Mode the run was configured with.
    pub mode: SegmentationMode,
    /// Image dimensions in pixels.
    pub dimensions: Dimensions,
}

impl StagedResult {
    /// Drop the intermediates, keeping the four presentation images.
    #[must_use]
    pub fn into_output(self) -> PipelineOutput {
        PipelineOutput {
            original: self.original,
            enhanced: self.enhanced,
            mask: self.mask,
            overlay: self.overlay,
        }
    }
}

/// Errors produced by the pipeline crate.
///
/// The pipeline itself never fails once it has a non-empty image; the
/// only error is rejecting a configuration before a run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_of_buffer() {
        let img = GrayImage::new(17, 31);
        let dims = Dimensions::of(&img);
        assert_eq!(
            dims,
            Dimensions {
                width: 17,
                height: 31
            }
        );
        assert_eq!(dims.pixel_count(), 17 * 31);
        assert!(!dims.is_empty());
        assert_eq!(dims.to_string(), "17x31");
    }

    #[test]
    fn zero_axis_is_empty() {
        assert!(
            Dimensions {
                width: 0,
                height: 5
            }
            .is_empty()
        );
    }

    #[test]
    fn mode_colors() {
        assert_eq!(SegmentationMode::Manual.overlay_color().0, [255, 255, 0]);
        assert_eq!(SegmentationMode::Bone.overlay_color().0, [255, 0, 0]);
        assert_eq!(SegmentationMode::Lung.overlay_color().0, [0, 0, 255]);
        assert_eq!(SegmentationMode::SoftTissue.overlay_color().0, [0, 255, 0]);
    }

    #[test]
    fn mode_parses_loosely() {
        assert_eq!(
            "soft-tissue".parse::<SegmentationMode>().unwrap(),
            SegmentationMode::SoftTissue
        );
        assert_eq!(
            "BONE".parse::<SegmentationMode>().unwrap(),
            SegmentationMode::Bone
        );
        assert!("liver".parse::<SegmentationMode>().is_err());
    }

    #[test]
    fn mode_display_round_trips() {
        for mode in SegmentationMode::ALL {
            assert_eq!(mode.to_string().parse::<SegmentationMode>().unwrap(), mode);
        }
    }

    #[test]
    fn pipeline_config_defaults() {
        let config = PipelineConfig::default();
        assert!(!config.use_adaptive_contrast);
        assert!(!config.use_learned_denoise);
        assert!(config.use_morphology_refine);
        assert!(!config.show_edges);
        assert_eq!(config.mode, SegmentationMode::Manual);
        assert!((config.edge_low - 50.0).abs() < f32::EPSILON);
        assert!((config.edge_high - 150.0).abs() < f32::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_edge_thresholds_rejected() {
        let config = PipelineConfig {
            edge_low: 200.0,
            edge_high: 100.0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn config_json_round_trip() {
        let config = PipelineConfig {
            mode: SegmentationMode::Lung,
            show_edges: true,
            ..PipelineConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "mode": "Bone", "show_edges": true }"#).unwrap();
        assert_eq!(config.mode, SegmentationMode::Bone);
        assert!(config.show_edges);
        assert!(config.use_morphology_refine);
        assert_eq!(config.thresholds, Thresholds::default());
    }

    #[test]
    fn error_invalid_config_display() {
        let err = PipelineError::InvalidConfig("low > high".to_string());
        assert_eq!(err.to_string(), "invalid pipeline configuration: low > high");
    }
}
