//! medivis-pipeline: Pure medical image processing pipeline (sans-IO).
//!
//! Turns one calibrated single-channel image into an enhanced grayscale
//! image, a binary region-of-interest mask and a color overlay through:
//! normalize -> equalize -> denoise -> segment -> refine ->
//! (edges) -> composite.
//!
//! This crate has **no I/O dependencies**. It operates on in-memory
//! buffers and returns structured data. Decoding files and writing
//! results lives in `medivis-io`.

pub mod contrast;
pub mod denoise;
pub mod diagnostics;
pub mod edge;
pub mod model;
pub mod nlm;
pub mod normalize;
pub mod overlay;
pub mod pipeline;
pub mod refine;
pub mod segment;
pub mod types;

pub use denoise::{DenoisePath, Denoiser};
pub use model::{DenoiseModel, ModelFailure, ModelOutcome};
pub use pipeline::Pipeline;
pub use refine::{KernelSize, UnrefinedPolicy};
pub use segment::Thresholds;
pub use types::{
    Dimensions, OverlayColor, PipelineConfig, PipelineError, PipelineOutput, RawImage,
    SegmentationMode, StagedResult,
};

#[cfg(feature = "onnx")]
pub use model::OnnxDenoiseModel;

/// Run the full pipeline and return the four presentation images.
///
/// # Pipeline steps
///
/// 1. Linear range normalization to `[0, 255]`
/// 2. Global or adaptive (CLAHE) histogram equalization
/// 3. Denoising: Gaussian, or learned with non-local-means fallback
/// 4. Mode-dependent threshold segmentation
/// 5. Morphological refinement (or the unrefined policy)
/// 6. Optional edge merge
/// 7. Color overlay
///
/// Returns `None` when the input has zero width or height. Every other
/// input produces output: learned-model failures fall back silently.
#[must_use]
pub fn process(
    raw: RawImage,
    config: &PipelineConfig,
    denoiser: &Denoiser,
) -> Option<PipelineOutput> {
    process_staged(raw, config, denoiser).map(StagedResult::into_output)
}

/// Run the full pipeline, preserving every intermediate stage output.
///
/// Returns `None` when the input has zero width or height.
#[must_use]
pub fn process_staged(
    raw: RawImage,
    config: &PipelineConfig,
    denoiser: &Denoiser,
) -> Option<StagedResult> {
    let staged = Pipeline::new(raw, config.clone())?
        .normalize()
        .equalize()
        .denoise(denoiser)
        .segment()
        .refine()
        .extract_edges()
        .composite()
        .into_result();
    Some(staged)
}
