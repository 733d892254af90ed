//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! These diagnostics are permanent instrumentation intended for
//! parameter experimentation (thresholds, CLAHE, kernel size). A run
//! through [`process_staged_with_diagnostics`] collects them alongside
//! the pipeline results.
//!
//! The pipeline crate reads no clock of its own: time comes from a
//! caller-supplied [`Clock`], so runs stay deterministic under test.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::denoise::Denoiser;
use crate::pipeline::{Advance, Pipeline, STAGE_COUNT, Stage};
use crate::refine::KernelSize;
use crate::segment::foreground_count;
use crate::types::{PipelineConfig, RawImage, SegmentationMode, StagedResult};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Time source for stage timing.
pub trait Clock {
    /// Opaque timestamp.
    type Instant;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Executed stages in order. Skipped optional stages (edges when
    /// disabled) are absent.
    pub stages: Vec<StageDiagnostics>,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary of the run.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Stage name (e.g. `"denoise"`).
    pub stage: String,
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Range normalization.
    Normalize {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
        /// Smallest finite input sample, if any.
        input_min: Option<f64>,
        /// Largest finite input sample, if any.
        input_max: Option<f64>,
    },
    /// Histogram equalization.
    Equalize {
        /// Whether CLAHE was used instead of global equalization.
        adaptive: bool,
        /// CLAHE tiles per axis.
        grid: u32,
        /// CLAHE clip limit.
        clip_limit: f32,
    },
    /// Noise reduction.
    Denoise {
        /// Whether the learned path was requested.
        requested_learned: bool,
        /// Path that produced the image.
        path: String,
        /// Name of the configured model, if any.
        model: Option<String>,
    },
    /// Threshold segmentation.
    Segment {
        /// Active mode.
        mode: SegmentationMode,
        /// Foreground pixels in the raw mask.
        foreground_pixels: u64,
        /// Total pixel count.
        total_pixels: u64,
    },
    /// Mask refinement.
    Refine {
        /// Whether morphological refinement ran.
        enabled: bool,
        /// Structuring element size.
        kernel: KernelSize,
        /// Foreground pixels before refinement.
        foreground_before: u64,
        /// Foreground pixels after refinement.
        foreground_after: u64,
    },
    /// Edge extraction.
    Edges {
        /// Hysteresis low threshold.
        low_threshold: f32,
        /// Hysteresis high threshold.
        high_threshold: f32,
        /// Foreground pixels before merging edges.
        foreground_before: u64,
        /// Foreground pixels after merging edges.
        foreground_after: u64,
    },
    /// Overlay composition.
    Composite {
        /// Overlay color.
        color: [u8; 3],
        /// Pixels tinted with the overlay color.
        blended_pixels: u64,
    },
}

/// High-level summary for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Image width in pixels.
    pub image_width: u32,
    /// Image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Active mode.
    pub mode: SegmentationMode,
    /// Denoising path that ran.
    pub denoise_path: String,
    /// Foreground pixels in the final mask.
    pub mask_pixels: u64,
}

impl PipelineSummary {
    /// Fraction of the image covered by the final mask, in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mask_coverage(&self) -> f64 {
        if self.pixel_count == 0 {
            0.0
        } else {
            self.mask_pixels as f64 / self.pixel_count as f64
        }
    }
}

impl PipelineDiagnostics {
    /// Diagnostics for the stage called `name`, if it ran.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageDiagnostics> {
        self.stages.iter().find(|s| s.stage == name)
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels)  Mode: {}",
            self.summary.image_width,
            self.summary.image_height,
            self.summary.pixel_count,
            self.summary.mode,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for diag in &self.stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{:<24} {ms:>8.3}ms {pct:>9.1}%  {details}", diag.stage));
        }

        lines.push(String::new());
        lines.push(format!(
            "Denoise: {}  |  Mask pixels: {} ({:.1}%)",
            self.summary.denoise_path,
            self.summary.mask_pixels,
            self.summary.mask_coverage() * 100.0,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Normalize {
            width,
            height,
            input_min,
            input_max,
        } => match (input_min, input_max) {
            (Some(lo), Some(hi)) => format!("{width}x{height} range=[{lo:.1}, {hi:.1}]"),
            _ => format!("{width}x{height} no finite samples"),
        },
        StageMetrics::Equalize {
            adaptive,
            grid,
            clip_limit,
        } => {
            if *adaptive {
                format!("clahe grid={grid} clip={clip_limit:.1}")
            } else {
                "global".to_string()
            }
        }
        StageMetrics::Denoise {
            path,
            model,
            ..
        } => match model {
            Some(name) => format!("{path} model={name}"),
            None => path.clone(),
        },
        StageMetrics::Segment {
            mode,
            foreground_pixels,
            total_pixels,
        } => format!(
            "{mode} foreground={foreground_pixels} ({:.1}%)",
            percent(*foreground_pixels, *total_pixels),
        ),
        StageMetrics::Refine {
            enabled,
            kernel,
            foreground_before,
            foreground_after,
        } => {
            if *enabled {
                format!("{kernel} {foreground_before}->{foreground_after} px")
            } else {
                format!("unrefined {foreground_before}->{foreground_after} px")
            }
        }
        StageMetrics::Edges {
            low_threshold,
            high_threshold,
            foreground_before,
            foreground_after,
        } => format!(
            "low={low_threshold:.1} high={high_threshold:.1} {foreground_before}->{foreground_after} px",
        ),
        StageMetrics::Composite {
            color,
            blended_pixels,
        } => format!(
            "rgb({},{},{}) blended={blended_pixels}",
            color[0], color[1], color[2],
        ),
    }
}

/// Run the full pipeline, timing every stage with `clock`.
///
/// Returns `None` for a zero-sized input, like [`crate::process_staged`].
pub fn process_staged_with_diagnostics<C: Clock>(
    raw: RawImage,
    config: &PipelineConfig,
    denoiser: &Denoiser,
    clock: &C,
) -> Option<(StagedResult, PipelineDiagnostics)> {
    let total_start = clock.now();
    let mut stage: Stage = Pipeline::new(raw, config.clone())?.into();
    let mut stages = Vec::with_capacity(STAGE_COUNT);

    loop {
        let start = clock.now();
        match stage.advance(denoiser) {
            Advance::Next(next) => {
                let duration = clock.elapsed(&start);
                if let Some(metrics) = next.metrics() {
                    stages.push(StageDiagnostics {
                        stage: next.name().to_string(),
                        duration,
                        metrics,
                    });
                }
                stage = next;
            }
            Advance::Complete(done) => {
                stage = done;
                break;
            }
        }
    }

    let total_duration = clock.elapsed(&total_start);
    let result = stage.complete(denoiser);
    let summary = PipelineSummary {
        image_width: result.dimensions.width,
        image_height: result.dimensions.height,
        pixel_count: result.dimensions.pixel_count(),
        mode: result.mode,
        denoise_path: result.denoise_path.to_string(),
        mask_pixels: foreground_count(&result.mask),
    };

    Some((
        result,
        PipelineDiagnostics {
            stages,
            total_duration,
            summary,
        },
    ))
}
