//! Learned denoising model seam.
//!
//! The pipeline does not depend on any particular inference runtime.
//! A model is anything implementing [`DenoiseModel`]; its single method
//! reports success or failure as a value ([`ModelOutcome`]) rather than
//! by panicking or returning an error the caller must handle. The
//! [`Denoiser`](crate::denoise::Denoiser) matches on the outcome and runs
//! the classical fallback on the `Failed` branch.
//!
//! With the `onnx` feature enabled, [`OnnxDenoiseModel`] runs a
//! DnCNN-style ONNX network through ONNX Runtime.

use image::GrayImage;

#[cfg(feature = "onnx")]
mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::OnnxDenoiseModel;

/// Why the learned path did not produce an image.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelFailure {
    /// No model was configured for this run.
    #[error("no denoising model loaded")]
    NotLoaded,

    /// The model file could not be read or parsed.
    #[error("failed to load denoising model: {0}")]
    Load(String),

    /// The input could not be converted into the model's input format.
    #[error("model rejected input: {0}")]
    InvalidInput(String),

    /// The model produced an output that cannot be read back as a
    /// single-channel image.
    #[error("model output has unusable shape: {0}")]
    ShapeMismatch(String),

    /// Inference itself failed.
    #[error("model inference failed: {0}")]
    Runtime(String),
}

/// Two-outcome result of one model invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelOutcome {
    /// The model produced an image. Its dimensions may differ from the
    /// input (e.g. internal resampling); the caller resizes.
    Succeeded(GrayImage),
    /// The model could not produce an image.
    Failed(ModelFailure),
}

/// A learned single-image denoiser.
///
/// Implementations must not panic: every failure is reported as
/// [`ModelOutcome::Failed`].
pub trait DenoiseModel {
    /// Short human-readable model name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Denoise one 8-bit grayscale image.
    fn infer(&self, image: &GrayImage) -> ModelOutcome;
}
