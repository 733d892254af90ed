//! Noise reduction stage.
//!
//! Two paths, selected by [`PipelineConfig::use_learned_denoise`](crate::types::PipelineConfig):
//!
//! - **Smoothed**: a fixed Gaussian blur equivalent to a 5x5 kernel.
//! - **Learned**: the configured [`DenoiseModel`]. When no model is
//!   configured, or the model reports a failure, the stage runs
//!   non-local means instead. This fallback is silent to the caller
//!   except for the [`DenoisePath`] recorded in the result and a
//!   `tracing` event.
//!
//! A model may return an image whose dimensions differ from the input;
//! it is resized back with bilinear (triangle) interpolation so every
//! later stage sees the input dimensions.

use std::fmt;

use image::GrayImage;
use image::imageops::FilterType;

use crate::model::{DenoiseModel, ModelFailure, ModelOutcome};
use crate::nlm::{self, NlmParams};

/// Gaussian sigma for the smoothed path.
///
/// Matches the sigma a 5x5 Gaussian kernel gets when sigma is derived
/// from the kernel size (`0.3 × ((5 - 1) × 0.5 - 1) + 0.8`).
pub const SMOOTHING_SIGMA: f32 = 1.1;

/// Which denoising path produced the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenoisePath {
    /// Fixed Gaussian smoothing.
    Smoothed,
    /// The learned model's output (resized if needed).
    Learned,
    /// Non-local means, because the learned path failed.
    Fallback(ModelFailure),
}

impl fmt::Display for DenoisePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Smoothed => write!(f, "gaussian"),
            Self::Learned => write!(f, "learned"),
            Self::Fallback(reason) => write!(f, "non-local means ({reason})"),
        }
    }
}

/// Output of the denoising stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenoiseOutput {
    /// The denoised image, always the same dimensions as the input.
    pub image: GrayImage,
    /// Which path produced it.
    pub path: DenoisePath,
}

/// Noise reduction with an optional learned model.
///
/// Holds the model for the lifetime of the processing session so it is
/// loaded once, not per image.
#[derive(Default)]
pub struct Denoiser {
    model: Option<Box<dyn DenoiseModel>>,
    nlm: NlmParams,
}

impl Denoiser {
    /// A denoiser without a learned model. The learned path always
    /// falls back to non-local means.
    #[must_use]
    pub fn classical() -> Self {
        Self::default()
    }

    /// A denoiser backed by `model`.
    #[must_use]
    pub fn with_model(model: impl DenoiseModel + 'static) -> Self {
        Self {
            model: Some(Box::new(model)),
            nlm: NlmParams::default(),
        }
    }

    /// Override the non-local means parameters used by the fallback.
    #[must_use]
    pub fn with_nlm_params(mut self, nlm: NlmParams) -> Self {
        self.nlm = nlm;
        self
    }

    /// Name of the configured model, if any.
    #[must_use]
    pub fn model_name(&self) -> Option<&str> {
        self.model.as_deref().map(|m| m.name())
    }

    /// Denoise `image`.
    ///
    /// With `learned == false` this is a Gaussian blur. Otherwise the
    /// model runs, and any failure falls through to non-local means.
    #[must_use = "returns the denoised image"]
    pub fn denoise(&self, image: &GrayImage, learned: bool) -> DenoiseOutput {
        if !learned {
            return DenoiseOutput {
                image: smooth(image),
                path: DenoisePath::Smoothed,
            };
        }

        let outcome = self
            .model
            .as_deref()
            .map_or(ModelOutcome::Failed(ModelFailure::NotLoaded), |m| m.infer(image));

        match outcome {
            ModelOutcome::Succeeded(out) if out.width() > 0 && out.height() > 0 => {
                let (w, h) = image.dimensions();
                let out = if out.dimensions() == (w, h) {
                    out
                } else {
                    tracing::debug!(
                        from_w = out.width(),
                        from_h = out.height(),
                        to_w = w,
                        to_h = h,
                        "resizing model output to input dimensions",
                    );
                    image::imageops::resize(&out, w, h, FilterType::Triangle)
                };
                DenoiseOutput {
                    image: out,
                    path: DenoisePath::Learned,
                }
            }
            ModelOutcome::Succeeded(out) => self.fall_back(
                image,
                ModelFailure::ShapeMismatch(format!("{}x{}", out.width(), out.height())),
            ),
            ModelOutcome::Failed(failure) => self.fall_back(image, failure),
        }
    }

    fn fall_back(&self, image: &GrayImage, failure: ModelFailure) -> DenoiseOutput {
        match &failure {
            ModelFailure::NotLoaded => {
                tracing::debug!("no denoising model, using non-local means");
            }
            other => {
                tracing::warn!(reason = %other, "learned denoising failed, using non-local means");
            }
        }
        DenoiseOutput {
            image: nlm::denoise(image, &self.nlm),
            path: DenoisePath::Fallback(failure),
        }
    }
}

impl fmt::Debug for Denoiser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Denoiser")
            .field("model", &self.model_name())
            .field("nlm", &self.nlm)
            .finish()
    }
}

/// Gaussian blur used by the non-learned path.
#[must_use = "returns the smoothed image"]
pub fn smooth(image: &GrayImage) -> GrayImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    imageproc::filter::gaussian_blur_f32(image, SMOOTHING_SIGMA)
}
