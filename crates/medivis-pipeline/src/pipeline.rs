//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process_staged`] which runs the entire pipeline in one
//! call, [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use medivis_pipeline::{Denoiser, Pipeline, PipelineConfig, RawImage};
//! # fn run(raw: RawImage) -> Option<()> {
//! let denoiser = Denoiser::classical();
//! let staged = Pipeline::new(raw, PipelineConfig::default())?
//!     .normalize()
//!     .equalize()
//!     .denoise(&denoiser)
//!     .segment()
//!     .refine()
//!     .extract_edges()
//!     .composite()
//!     .into_result();
//! # let _ = staged;
//! # Some(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state,
//! carrying all previously computed intermediates. Skipping a stage or
//! calling them out of order does not compile. No stage can fail: the
//! only rejected input is a zero-sized image, caught by
//! [`Pipeline::new`].

use crate::denoise::{DenoisePath, Denoiser};
use crate::diagnostics::StageMetrics;
use crate::segment::foreground_count;
use crate::types::{Dimensions, GrayImage, PipelineConfig, RawImage, RgbImage, StagedResult};

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Call [`normalize`](Self::normalize) to advance.
#[must_use = "pipeline stages are consumed by advancing — call .normalize() to continue"]
pub struct Pending {
    config: PipelineConfig,
    raw: RawImage,
}

impl Pending {
    /// The calibrated input image.
    #[must_use]
    pub const fn raw(&self) -> &RawImage {
        &self.raw
    }

    /// The configuration snapshot for this run.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stretch the input to `[0, 255]` and advance to [`Normalized`].
    pub fn normalize(self) -> Normalized {
        let input_range = crate::normalize::finite_range(&self.raw);
        let original = crate::normalize::stretch(&self.raw);
        tracing::debug!(
            width = original.width(),
            height = original.height(),
            ?input_range,
            "normalized input",
        );
        Normalized {
            dimensions: Dimensions::of(&original),
            config: self.config,
            original,
            input_range,
        }
    }
}

// ───────────────────────── Stage 1: Normalized ───────────────────────

/// Pipeline state after range normalization.
#[must_use = "pipeline stages are consumed by advancing — call .equalize() to continue"]
pub struct Normalized {
    config: PipelineConfig,
    dimensions: Dimensions,
    original: GrayImage,
    input_range: Option<(f64, f64)>,
}

impl Normalized {
    /// The normalized 8-bit image.
    #[must_use]
    pub const fn original(&self) -> &GrayImage {
        &self.original
    }

    /// Apply global or adaptive histogram equalization.
    pub fn equalize(self) -> Equalized {
        let equalized = crate::contrast::enhance(
            &self.original,
            self.config.use_adaptive_contrast,
            &self.config.clahe,
        );
        tracing::debug!(adaptive = self.config.use_adaptive_contrast, "equalized contrast");
        Equalized {
            config: self.config,
            dimensions: self.dimensions,
            original: self.original,
            equalized,
        }
    }
}

// ───────────────────────── Stage 2: Equalized ────────────────────────

/// Pipeline state after contrast enhancement.
#[must_use = "pipeline stages are consumed by advancing — call .denoise() to continue"]
pub struct Equalized {
    config: PipelineConfig,
    dimensions: Dimensions,
    original: GrayImage,
    equalized: GrayImage,
}

impl Equalized {
    /// The contrast-enhanced image.
    #[must_use]
    pub const fn equalized(&self) -> &GrayImage {
        &self.equalized
    }

    /// Reduce noise with `denoiser`.
    ///
    /// The learned path is attempted only when
    /// `config.use_learned_denoise` is set.
    pub fn denoise(self, denoiser: &Denoiser) -> Denoised {
        let out = denoiser.denoise(&self.equalized, self.config.use_learned_denoise);
        tracing::debug!(path = %out.path, "denoised");
        Denoised {
            config: self.config,
            dimensions: self.dimensions,
            original: self.original,
            equalized: self.equalized,
            enhanced: out.image,
            denoise_path: out.path,
            model: denoiser.model_name().map(str::to_string),
        }
    }
}

// ───────────────────────── Stage 3: Denoised ─────────────────────────

/// Pipeline state after noise reduction.
#[must_use = "pipeline stages are consumed by advancing — call .segment() to continue"]
pub struct Denoised {
    config: PipelineConfig,
    dimensions: Dimensions,
    original: GrayImage,
    equalized: GrayImage,
    enhanced: GrayImage,
    denoise_path: DenoisePath,
    model: Option<String>,
}

impl Denoised {
    /// The enhanced (equalized and denoised) image.
    #[must_use]
    pub const fn enhanced(&self) -> &GrayImage {
        &self.enhanced
    }

    /// Which denoising path produced the enhanced image.
    #[must_use]
    pub const fn denoise_path(&self) -> &DenoisePath {
        &self.denoise_path
    }

    /// Threshold the enhanced image under the configured mode.
    pub fn segment(self) -> Segmented {
        let segmented =
            crate::segment::segment(&self.enhanced, self.config.mode, &self.config.thresholds);
        tracing::debug!(
            mode = %self.config.mode,
            foreground = foreground_count(&segmented),
            "segmented",
        );
        Segmented {
            config: self.config,
            dimensions: self.dimensions,
            original: self.original,
            equalized: self.equalized,
            enhanced: self.enhanced,
            denoise_path: self.denoise_path,
            segmented,
        }
    }
}

// ───────────────────────── Stage 4: Segmented ────────────────────────

/// Pipeline state after threshold classification.
#[must_use = "pipeline stages are consumed by advancing — call .refine() to continue"]
pub struct Segmented {
    config: PipelineConfig,
    dimensions: Dimensions,
    original: GrayImage,
    equalized: GrayImage,
    enhanced: GrayImage,
    denoise_path: DenoisePath,
    segmented: GrayImage,
}

impl Segmented {
    /// The raw threshold mask.
    #[must_use]
    pub const fn segmented(&self) -> &GrayImage {
        &self.segmented
    }

    /// Apply morphological refinement or the unrefined policy.
    pub fn refine(self) -> Refined {
        let refined = crate::refine::refine(&self.segmented, &self.enhanced, &self.config);
        tracing::debug!(
            enabled = self.config.use_morphology_refine,
            foreground = foreground_count(&refined),
            "refined mask",
        );
        Refined {
            config: self.config,
            dimensions: self.dimensions,
            original: self.original,
            equalized: self.equalized,
            enhanced: self.enhanced,
            denoise_path: self.denoise_path,
            segmented: self.segmented,
            refined,
        }
    }
}

// ───────────────────────── Stage 5: Refined ──────────────────────────

/// Pipeline state after mask refinement.
#[must_use = "pipeline stages are consumed by advancing — call .extract_edges() to continue"]
pub struct Refined {
    config: PipelineConfig,
    dimensions: Dimensions,
    original: GrayImage,
    equalized: GrayImage,
    enhanced: GrayImage,
    denoise_path: DenoisePath,
    segmented: GrayImage,
    refined: GrayImage,
}

impl Refined {
    /// The refined mask.
    #[must_use]
    pub const fn refined(&self) -> &GrayImage {
        &self.refined
    }

    /// Replace the mask with its edge view (boundary band plus in-mask
    /// gradient edges) when `config.show_edges` is set; otherwise the
    /// refined mask passes through.
    pub fn extract_edges(self) -> EdgesExtracted {
        let mask = if self.config.show_edges {
            let mask = crate::edge::extract(
                &self.refined,
                &self.enhanced,
                self.config.edge_low,
                self.config.edge_high,
            );
            tracing::debug!(foreground = foreground_count(&mask), "merged edges");
            mask
        } else {
            self.refined.clone()
        };
        EdgesExtracted {
            config: self.config,
            dimensions: self.dimensions,
            original: self.original,
            equalized: self.equalized,
            enhanced: self.enhanced,
            denoise_path: self.denoise_path,
            segmented: self.segmented,
            refined: self.refined,
            mask,
        }
    }
}

// ───────────────────────── Stage 6: EdgesExtracted ───────────────────

/// Pipeline state holding the final mask.
#[must_use = "pipeline stages are consumed by advancing — call .composite() to continue"]
pub struct EdgesExtracted {
    config: PipelineConfig,
    dimensions: Dimensions,
    original: GrayImage,
    equalized: GrayImage,
    enhanced: GrayImage,
    denoise_path: DenoisePath,
    segmented: GrayImage,
    refined: GrayImage,
    mask: GrayImage,
}

impl EdgesExtracted {
    /// The final mask.
    #[must_use]
    pub const fn mask(&self) -> &GrayImage {
        &self.mask
    }

    /// Blend the mode color onto the enhanced image.
    pub fn composite(self) -> Composited {
        let overlay = crate::overlay::composite(
            &self.enhanced,
            &self.mask,
            self.config.mode.overlay_color(),
        );
        Composited {
            config: self.config,
            dimensions: self.dimensions,
            original: self.original,
            equalized: self.equalized,
            enhanced: self.enhanced,
            denoise_path: self.denoise_path,
            segmented: self.segmented,
            refined: self.refined,
            mask: self.mask,
            overlay,
        }
    }
}

// ───────────────────────── Stage 7: Composited ───────────────────────

/// Final pipeline state.
#[must_use = "call .into_result() to take the outputs"]
pub struct Composited {
    config: PipelineConfig,
    dimensions: Dimensions,
    original: GrayImage,
    equalized: GrayImage,
    enhanced: GrayImage,
    denoise_path: DenoisePath,
    segmented: GrayImage,
    refined: GrayImage,
    mask: GrayImage,
    overlay: RgbImage,
}

impl Composited {
    /// The color overlay.
    #[must_use]
    pub const fn overlay(&self) -> &RgbImage {
        &self.overlay
    }

    /// Image dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Consume the pipeline and return the full [`StagedResult`].
    #[must_use]
    pub fn into_result(self) -> StagedResult {
        StagedResult {
            original: self.original,
            equalized: self.equalized,
            enhanced: self.enhanced,
            denoise_path: self.denoise_path,
            segmented: self.segmented,
            refined: self.refined,
            mask: self.mask,
            overlay: self.overlay,
            mode: self.config.mode,
            dimensions: self.dimensions,
        }
    }
}

// ──────────────────── PipelineStage trait + Stage enum ────────────────

/// Total number of stages in the pipeline, including [`Pending`].
pub const STAGE_COUNT: usize = 8;

/// Trait implemented by every pipeline stage, enabling uniform iteration.
pub trait PipelineStage: Sized {
    /// Human-readable name of this stage (e.g. `"source"`, `"denoise"`).
    const NAME: &str;

    /// Zero-based index of this stage (`0` for Pending through `7` for
    /// Composited).
    const INDEX: usize;

    /// Metrics describing the work done to reach this stage.
    ///
    /// `None` for [`Pending`], and for [`EdgesExtracted`] when edge
    /// extraction was disabled.
    fn metrics(&self) -> Option<StageMetrics>;

    /// Advance to the next stage, or `None` at the final stage.
    fn next(self, denoiser: &Denoiser) -> Option<Stage>;

    /// Run all remaining stages and return the [`StagedResult`].
    fn complete(self, denoiser: &Denoiser) -> StagedResult;
}

impl PipelineStage for Pending {
    const NAME: &str = "source";
    const INDEX: usize = 0;

    fn metrics(&self) -> Option<StageMetrics> {
        None
    }

    fn next(self, _denoiser: &Denoiser) -> Option<Stage> {
        Some(self.normalize().into())
    }

    fn complete(self, denoiser: &Denoiser) -> StagedResult {
        self.normalize().complete(denoiser)
    }
}

impl PipelineStage for Normalized {
    const NAME: &str = "normalize";
    const INDEX: usize = 1;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Normalize {
            width: self.dimensions.width,
            height: self.dimensions.height,
            input_min: self.input_range.map(|(lo, _)| lo),
            input_max: self.input_range.map(|(_, hi)| hi),
        })
    }

    fn next(self, _denoiser: &Denoiser) -> Option<Stage> {
        Some(self.equalize().into())
    }

    fn complete(self, denoiser: &Denoiser) -> StagedResult {
        self.equalize().complete(denoiser)
    }
}

impl PipelineStage for Equalized {
    const NAME: &str = "equalize";
    const INDEX: usize = 2;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Equalize {
            adaptive: self.config.use_adaptive_contrast,
            grid: self.config.clahe.grid,
            clip_limit: self.config.clahe.clip_limit,
        })
    }

    fn next(self, denoiser: &Denoiser) -> Option<Stage> {
        Some(self.denoise(denoiser).into())
    }

    fn complete(self, denoiser: &Denoiser) -> StagedResult {
        self.denoise(denoiser).complete(denoiser)
    }
}

impl PipelineStage for Denoised {
    const NAME: &str = "denoise";
    const INDEX: usize = 3;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Denoise {
            requested_learned: self.config.use_learned_denoise,
            path: self.denoise_path.to_string(),
            model: self.model.clone(),
        })
    }

    fn next(self, _denoiser: &Denoiser) -> Option<Stage> {
        Some(self.segment().into())
    }

    fn complete(self, denoiser: &Denoiser) -> StagedResult {
        self.segment().complete(denoiser)
    }
}

impl PipelineStage for Segmented {
    const NAME: &str = "segment";
    const INDEX: usize = 4;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Segment {
            mode: self.config.mode,
            foreground_pixels: foreground_count(&self.segmented),
            total_pixels: self.dimensions.pixel_count(),
        })
    }

    fn next(self, _denoiser: &Denoiser) -> Option<Stage> {
        Some(self.refine().into())
    }

    fn complete(self, denoiser: &Denoiser) -> StagedResult {
        self.refine().complete(denoiser)
    }
}

impl PipelineStage for Refined {
    const NAME: &str = "refine";
    const INDEX: usize = 5;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Refine {
            enabled: self.config.use_morphology_refine,
            kernel: self.config.refine_kernel,
            foreground_before: foreground_count(&self.segmented),
            foreground_after: foreground_count(&self.refined),
        })
    }

    fn next(self, _denoiser: &Denoiser) -> Option<Stage> {
        Some(self.extract_edges().into())
    }

    fn complete(self, denoiser: &Denoiser) -> StagedResult {
        self.extract_edges().complete(denoiser)
    }
}

impl PipelineStage for EdgesExtracted {
    const NAME: &str = "edges";
    const INDEX: usize = 6;

    fn metrics(&self) -> Option<StageMetrics> {
        self.config.show_edges.then(|| StageMetrics::Edges {
            low_threshold: self.config.edge_low,
            high_threshold: self.config.edge_high,
            foreground_before: foreground_count(&self.refined),
            foreground_after: foreground_count(&self.mask),
        })
    }

    fn next(self, _denoiser: &Denoiser) -> Option<Stage> {
        Some(self.composite().into())
    }

    fn complete(self, denoiser: &Denoiser) -> StagedResult {
        self.composite().complete(denoiser)
    }
}

impl PipelineStage for Composited {
    const NAME: &str = "composite";
    const INDEX: usize = 7;

    fn metrics(&self) -> Option<StageMetrics> {
        Some(StageMetrics::Composite {
            color: self.config.mode.overlay_color().0,
            blended_pixels: foreground_count(&self.mask),
        })
    }

    fn next(self, _denoiser: &Denoiser) -> Option<Stage> {
        None
    }

    fn complete(self, _denoiser: &Denoiser) -> StagedResult {
        self.into_result()
    }
}

/// Enum wrapping all pipeline stages for uniform, loopable access.
///
/// ```rust
/// # use medivis_pipeline::{Denoiser, Pipeline, PipelineConfig, RawImage};
/// # use medivis_pipeline::pipeline::{Advance, Stage};
/// # fn run(raw: RawImage) -> Option<()> {
/// let denoiser = Denoiser::classical();
/// let mut stage: Stage = Pipeline::new(raw, PipelineConfig::default())?.into();
/// loop {
///     match stage.advance(&denoiser) {
///         Advance::Next(next) => stage = next,
///         Advance::Complete(done) => { stage = done; break; }
///     }
/// }
/// let result = stage.complete(&denoiser);
/// # let _ = result;
/// # Some(())
/// # }
/// ```
#[must_use]
pub enum Stage {
    /// See [`Pending`].
    Pending(Pending),
    /// See [`Normalized`].
    Normalized(Normalized),
    /// See [`Equalized`].
    Equalized(Equalized),
    /// See [`Denoised`].
    Denoised(Denoised),
    /// See [`Segmented`].
    Segmented(Segmented),
    /// See [`Refined`].
    Refined(Refined),
    /// See [`EdgesExtracted`].
    EdgesExtracted(EdgesExtracted),
    /// See [`Composited`].
    Composited(Composited),
}

/// Result of [`Stage::advance`]: either the next stage or the
/// completed final stage returned unchanged.
#[must_use]
pub enum Advance {
    /// The pipeline advanced to this next stage.
    Next(Stage),
    /// The pipeline was already at the final stage.
    Complete(Stage),
}

/// Delegate a method call to whichever `Stage` variant is active.
macro_rules! delegate {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            Self::Pending(s) => s.$method($($arg),*),
            Self::Normalized(s) => s.$method($($arg),*),
            Self::Equalized(s) => s.$method($($arg),*),
            Self::Denoised(s) => s.$method($($arg),*),
            Self::Segmented(s) => s.$method($($arg),*),
            Self::Refined(s) => s.$method($($arg),*),
            Self::EdgesExtracted(s) => s.$method($($arg),*),
            Self::Composited(s) => s.$method($($arg),*),
        }
    };
}

impl Stage {
    /// Human-readable name of the current stage.
    #[must_use]
    pub fn name(&self) -> &'static str {
        delegate!(self, name)
    }

    /// Zero-based index of the current stage.
    #[must_use]
    pub fn index(&self) -> usize {
        delegate!(self, index)
    }

    /// Stage-specific metrics for diagnostics.
    #[must_use]
    pub fn metrics(&self) -> Option<StageMetrics> {
        delegate!(self, metrics)
    }

    /// Whether the pipeline is at the final stage.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Composited(_))
    }

    /// Advance to the next stage, or `None` if already complete (the
    /// final stage is consumed).
    pub fn next(self, denoiser: &Denoiser) -> Option<Self> {
        delegate!(self, next, denoiser)
    }

    /// Advance to the next stage, returning `self` unchanged if
    /// already complete.
    pub fn advance(self, denoiser: &Denoiser) -> Advance {
        match self {
            Self::Pending(s) => Advance::Next(s.normalize().into()),
            Self::Normalized(s) => Advance::Next(s.equalize().into()),
            Self::Equalized(s) => Advance::Next(s.denoise(denoiser).into()),
            Self::Denoised(s) => Advance::Next(s.segment().into()),
            Self::Segmented(s) => Advance::Next(s.refine().into()),
            Self::Refined(s) => Advance::Next(s.extract_edges().into()),
            Self::EdgesExtracted(s) => Advance::Next(s.composite().into()),
            done @ Self::Composited(_) => Advance::Complete(done),
        }
    }

    /// Run all remaining stages to completion.
    #[must_use]
    pub fn complete(self, denoiser: &Denoiser) -> StagedResult {
        delegate!(self, complete, denoiser)
    }
}

// The `PipelineStage` associated constants aren't reachable through
// `self`, so the macro goes through this helper.
trait StageMetadata {
    fn name(&self) -> &'static str;
    fn index(&self) -> usize;
}

impl<T: PipelineStage> StageMetadata for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn index(&self) -> usize {
        T::INDEX
    }
}

macro_rules! impl_from_stage {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Stage {
                fn from(s: $variant) -> Self {
                    Self::$variant(s)
                }
            }
        )*
    };
}

impl_from_stage!(
    Pending,
    Normalized,
    Equalized,
    Denoised,
    Segmented,
    Refined,
    EdgesExtracted,
    Composited,
);

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental image processing pipeline.
///
/// Created via [`Pipeline::new`], which stores the input image and
/// config without doing any processing.
pub struct Pipeline;

impl Pipeline {
    /// Start a pipeline run.
    ///
    /// Returns `None` when the image has zero width or height: there is
    /// nothing to process and no output to present.
    #[allow(clippy::new_ret_no_self)]
    #[must_use = "pipeline stages are consumed by advancing — call .normalize() to continue"]
    pub fn new(raw: RawImage, config: PipelineConfig) -> Option<Pending> {
        if raw.width() == 0 || raw.height() == 0 {
            tracing::debug!("empty input, nothing to process");
            return None;
        }
        Some(Pending { config, raw })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use image::Luma;

    use super::*;
    use crate::types::SegmentationMode;

    /// Dark background with a bright square, like a bone cross-section.
    fn bright_square() -> RawImage {
        RawImage::from_fn(60, 60, |x, y| {
            let inside = (20..40).contains(&x) && (20..40).contains(&y);
            Luma([if inside { 1500.0 } else { -800.0 }])
        })
    }

    fn bone_config() -> PipelineConfig {
        PipelineConfig {
            mode: SegmentationMode::Bone,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(Pipeline::new(RawImage::new(0, 10), PipelineConfig::default()).is_none());
        assert!(Pipeline::new(RawImage::new(10, 0), PipelineConfig::default()).is_none());
    }

    #[test]
    fn typed_chain_produces_all_intermediates() {
        let denoiser = Denoiser::classical();
        let result = Pipeline::new(bright_square(), bone_config())
            .unwrap()
            .normalize()
            .equalize()
            .denoise(&denoiser)
            .segment()
            .refine()
            .extract_edges()
            .composite()
            .into_result();
        let dims = (60, 60);
        assert_eq!(result.original.dimensions(), dims);
        assert_eq!(result.equalized.dimensions(), dims);
        assert_eq!(result.enhanced.dimensions(), dims);
        assert_eq!(result.segmented.dimensions(), dims);
        assert_eq!(result.refined.dimensions(), dims);
        assert_eq!(result.mask.dimensions(), dims);
        assert_eq!(result.overlay.dimensions(), dims);
        assert_eq!(result.mode, SegmentationMode::Bone);
        assert_eq!(result.denoise_path, DenoisePath::Smoothed);
    }

    #[test]
    fn stage_accessors_expose_intermediates() {
        let denoiser = Denoiser::classical();
        let normalized = Pipeline::new(bright_square(), bone_config()).unwrap().normalize();
        assert_eq!(normalized.original().get_pixel(0, 0).0[0], 0);
        assert_eq!(normalized.original().get_pixel(30, 30).0[0], 255);

        let denoised = normalized.equalize().denoise(&denoiser);
        assert_eq!(denoised.denoise_path(), &DenoisePath::Smoothed);
        let segmented = denoised.segment();
        assert!(segmented.segmented().get_pixel(30, 30).0[0] == 255);
        assert!(segmented.segmented().get_pixel(2, 2).0[0] == 0);
    }

    #[test]
    fn edges_pass_through_when_disabled() {
        let denoiser = Denoiser::classical();
        let refined = Pipeline::new(bright_square(), bone_config())
            .unwrap()
            .normalize()
            .equalize()
            .denoise(&denoiser)
            .segment()
            .refine();
        let expected = refined.refined().clone();
        let extracted = refined.extract_edges();
        assert_eq!(extracted.mask(), &expected);
        assert!(extracted.metrics().is_none());
    }

    #[test]
    fn stage_loop_matches_typed_chain() {
        let denoiser = Denoiser::classical();
        let typed = Pipeline::new(bright_square(), bone_config())
            .unwrap()
            .complete(&denoiser);

        let mut stage: Stage = Pipeline::new(bright_square(), bone_config()).unwrap().into();
        let mut names = vec![stage.name()];
        loop {
            match stage.advance(&denoiser) {
                Advance::Next(next) => {
                    names.push(next.name());
                    stage = next;
                }
                Advance::Complete(done) => {
                    stage = done;
                    break;
                }
            }
        }
        assert!(stage.is_complete());
        assert_eq!(stage.index(), STAGE_COUNT - 1);
        assert_eq!(
            names,
            vec![
                "source",
                "normalize",
                "equalize",
                "denoise",
                "segment",
                "refine",
                "edges",
                "composite"
            ]
        );
        let looped = stage.complete(&denoiser);
        assert_eq!(looped.mask, typed.mask);
        assert_eq!(looped.overlay, typed.overlay);
    }

    #[test]
    fn next_returns_none_at_end() {
        let denoiser = Denoiser::classical();
        let mut stage: Stage = Pipeline::new(bright_square(), bone_config()).unwrap().into();
        let mut steps = 0;
        while let Some(next) = stage.next(&denoiser) {
            steps += 1;
            if next.is_complete() {
                assert!(next.next(&denoiser).is_none());
                break;
            }
            stage = next;
        }
        assert_eq!(steps, STAGE_COUNT - 1);
    }

    #[test]
    fn metrics_report_mode_and_counts() {
        let denoiser = Denoiser::classical();
        let segmented = Pipeline::new(bright_square(), bone_config())
            .unwrap()
            .normalize()
            .equalize()
            .denoise(&denoiser)
            .segment();
        match segmented.metrics() {
            Some(StageMetrics::Segment {
                mode,
                foreground_pixels,
                total_pixels,
            }) => {
                assert_eq!(mode, SegmentationMode::Bone);
                assert!(foreground_pixels > 0);
                assert_eq!(total_pixels, 3600);
            }
            other => panic!("unexpected metrics: {other:?}"),
        }
    }
}
