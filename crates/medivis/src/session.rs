//! Viewer session state and its transitions.
//!
//! The viewer is a small state machine: the current file index, the
//! pipeline toggles, and two flags telling the driver what to do next.
//! [`apply_action`] is pure; the driver runs the pipeline whenever
//! `needs_run` is set and saves whenever `save_requested` is set.

use std::fmt;
use std::str::FromStr;

use medivis_pipeline::{PipelineConfig, SegmentationMode};

/// One user intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Switch the segmentation mode.
    SelectMode(SegmentationMode),
    /// Flip between global equalization and CLAHE.
    ToggleAdaptiveContrast,
    /// Flip between non-local means and the learned denoiser.
    ToggleLearnedDenoise,
    /// Turn morphological mask refinement on or off.
    ToggleMorphologyRefine,
    /// Show or hide edges in the mask.
    ToggleEdges,
    /// Move to the next file, if any.
    NextFile,
    /// Move to the previous file, if any.
    PreviousFile,
    /// Ask for the results on screen to be saved.
    RequestSave,
    /// Emitted by the driver once a requested save has been attempted.
    SaveCompleted,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelectMode(mode) => write!(f, "mode={mode}"),
            Self::ToggleAdaptiveContrast => f.write_str("clahe"),
            Self::ToggleLearnedDenoise => f.write_str("learned"),
            Self::ToggleMorphologyRefine => f.write_str("morphology"),
            Self::ToggleEdges => f.write_str("edges"),
            Self::NextFile => f.write_str("next"),
            Self::PreviousFile => f.write_str("prev"),
            Self::RequestSave => f.write_str("save"),
            Self::SaveCompleted => f.write_str("saved"),
        }
    }
}

/// Parses the `--action` syntax: `mode=<mode>`, `clahe`, `learned`,
/// `morphology`, `edges`, `next`, `prev` or `save`.
///
/// `SaveCompleted` is driver-internal and has no textual form.
impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(mode) = s.strip_prefix("mode=") {
            return mode
                .parse()
                .map(Self::SelectMode)
                .map_err(|e| e.to_string());
        }
        match s {
            "clahe" => Ok(Self::ToggleAdaptiveContrast),
            "learned" => Ok(Self::ToggleLearnedDenoise),
            "morphology" => Ok(Self::ToggleMorphologyRefine),
            "edges" => Ok(Self::ToggleEdges),
            "next" => Ok(Self::NextFile),
            "prev" | "previous" => Ok(Self::PreviousFile),
            "save" => Ok(Self::RequestSave),
            other => Err(format!(
                "unknown action '{other}' (expected mode=<mode>, clahe, learned, \
                 morphology, edges, next, prev or save)"
            )),
        }
    }
}

/// Everything the viewer remembers between runs.
#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    config: PipelineConfig,
    file_count: usize,
    index: usize,
    /// The displayed results are stale.
    pub needs_run: bool,
    /// The user asked for the current results to be written out.
    pub save_requested: bool,
}

impl AppState {
    /// Fresh session over `file_count` files, starting at `index`
    /// (clamped to the last file).
    ///
    /// The first file always needs a run.
    #[must_use]
    pub fn new(config: PipelineConfig, file_count: usize, index: usize) -> Self {
        Self {
            config,
            file_count,
            index: index.min(file_count.saturating_sub(1)),
            needs_run: true,
            save_requested: false,
        }
    }

    /// Position of the current file in sorted order.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Number of files in the session.
    #[must_use]
    pub const fn file_count(&self) -> usize {
        self.file_count
    }

    /// Active segmentation mode.
    #[must_use]
    pub const fn mode(&self) -> SegmentationMode {
        self.config.mode
    }

    /// Immutable configuration for the next run.
    #[must_use]
    pub fn config_snapshot(&self) -> PipelineConfig {
        self.config.clone()
    }

    /// Mark the current results as fresh.
    #[must_use]
    pub const fn ran(mut self) -> Self {
        self.needs_run = false;
        self
    }
}

/// Apply `action` to `state`.
///
/// Every toggle and mode change sets `needs_run`. Navigation clamps at
/// both ends and only sets `needs_run` when the index actually moves.
/// Selecting the active mode again is a no-op.
#[must_use]
pub fn apply_action(mut state: AppState, action: Action) -> AppState {
    let config = &mut state.config;
    match action {
        Action::SelectMode(mode) => {
            if config.mode != mode {
                config.mode = mode;
                state.needs_run = true;
            }
        }
        Action::ToggleAdaptiveContrast => {
            config.use_adaptive_contrast = !config.use_adaptive_contrast;
            state.needs_run = true;
        }
        Action::ToggleLearnedDenoise => {
            config.use_learned_denoise = !config.use_learned_denoise;
            state.needs_run = true;
        }
        Action::ToggleMorphologyRefine => {
            config.use_morphology_refine = !config.use_morphology_refine;
            state.needs_run = true;
        }
        Action::ToggleEdges => {
            config.show_edges = !config.show_edges;
            state.needs_run = true;
        }
        Action::NextFile => {
            if state.index + 1 < state.file_count {
                state.index += 1;
                state.needs_run = true;
            }
        }
        Action::PreviousFile => {
            if state.index > 0 {
                state.index -= 1;
                state.needs_run = true;
            }
        }
        Action::RequestSave => state.save_requested = true,
        Action::SaveCompleted => state.save_requested = false,
    }
    state
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn settled(file_count: usize) -> AppState {
        AppState::new(PipelineConfig::default(), file_count, 0).ran()
    }

    #[test]
    fn new_session_needs_run() {
        let state = AppState::new(PipelineConfig::default(), 3, 0);
        assert!(state.needs_run);
        assert!(!state.save_requested);
    }

    #[test]
    fn start_index_clamped() {
        assert_eq!(AppState::new(PipelineConfig::default(), 3, 10).index(), 2);
        assert_eq!(AppState::new(PipelineConfig::default(), 0, 4).index(), 0);
    }

    #[test]
    fn toggles_flip_and_request_run() {
        let state = apply_action(settled(1), Action::ToggleAdaptiveContrast);
        assert!(state.needs_run);
        assert!(state.config_snapshot().use_adaptive_contrast);

        let state = apply_action(state.ran(), Action::ToggleAdaptiveContrast);
        assert!(state.needs_run);
        assert!(!state.config_snapshot().use_adaptive_contrast);

        let state = apply_action(settled(1), Action::ToggleMorphologyRefine);
        assert!(!state.config_snapshot().use_morphology_refine);
        let state = apply_action(state, Action::ToggleEdges);
        assert!(state.config_snapshot().show_edges);
        let state = apply_action(state, Action::ToggleLearnedDenoise);
        assert!(state.config_snapshot().use_learned_denoise);
    }

    #[test]
    fn selecting_active_mode_is_noop() {
        let state = apply_action(settled(1), Action::SelectMode(SegmentationMode::Manual));
        assert!(!state.needs_run);

        let state = apply_action(state, Action::SelectMode(SegmentationMode::Lung));
        assert!(state.needs_run);
        assert_eq!(state.mode(), SegmentationMode::Lung);
    }

    #[test]
    fn navigation_clamps_at_both_ends() {
        let state = apply_action(settled(2), Action::PreviousFile);
        assert_eq!(state.index(), 0);
        assert!(!state.needs_run);

        let state = apply_action(state, Action::NextFile);
        assert_eq!(state.index(), 1);
        assert!(state.needs_run);

        let state = apply_action(state.ran(), Action::NextFile);
        assert_eq!(state.index(), 1);
        assert!(!state.needs_run);
    }

    #[test]
    fn save_request_round_trip() {
        let state = apply_action(settled(1), Action::RequestSave);
        assert!(state.save_requested);
        assert!(!state.needs_run);
        let state = apply_action(state, Action::SaveCompleted);
        assert!(!state.save_requested);
    }

    #[test]
    fn snapshot_is_detached() {
        let state = settled(1);
        let snapshot = state.config_snapshot();
        let state = apply_action(state, Action::ToggleEdges);
        assert!(!snapshot.show_edges);
        assert!(state.config_snapshot().show_edges);
    }

    #[test]
    fn actions_parse() {
        assert_eq!("next".parse::<Action>().unwrap(), Action::NextFile);
        assert_eq!("prev".parse::<Action>().unwrap(), Action::PreviousFile);
        assert_eq!(
            "mode=soft-tissue".parse::<Action>().unwrap(),
            Action::SelectMode(SegmentationMode::SoftTissue)
        );
        assert!("mode=brain".parse::<Action>().is_err());
        assert!("saved".parse::<Action>().is_err());
    }

    #[test]
    fn display_parses_back() {
        for action in [
            Action::SelectMode(SegmentationMode::Bone),
            Action::ToggleEdges,
            Action::PreviousFile,
            Action::RequestSave,
        ] {
            assert_eq!(action.to_string().parse::<Action>().unwrap(), action);
        }
    }
}
