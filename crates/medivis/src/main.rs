//! medivis: headless driver for the medical image viewer pipeline.
//!
//! Loads a directory of slices (or a single file), runs the pipeline on
//! the selected image, prints per-stage diagnostics and optionally saves
//! the four result images. A scripted sequence of `--action` values
//! replays what an interactive viewer would do: switch modes, flip
//! toggles, move between files, save.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin medivis -- [OPTIONS] <INPUT>
//! ```
//!
//! # Example
//!
//! ```text
//! medivis scans/ --mode bone --clahe --action next --action mode=lung --action save
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod logging;
mod session;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use medivis_io::OutputSink;
use medivis_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use medivis_pipeline::{Denoiser, PipelineConfig, PipelineOutput, SegmentationMode};

use crate::session::{Action, AppState, apply_action};

/// Enhance, segment and overlay single-channel medical images.
///
/// Runs the pipeline on one image of INPUT and prints per-stage timing
/// and mask statistics.
#[derive(Parser)]
#[command(name = "medivis", version)]
struct Cli {
    /// Directory of images (PNG, TIFF, BMP, JPEG, DICOM), or a single
    /// image.
    input: PathBuf,

    /// Index of the first image to show, in sorted file order.
    #[arg(long, default_value_t = 0)]
    index: usize,

    /// Segmentation mode (manual, bone, lung, soft-tissue).
    #[arg(long, default_value_t = SegmentationMode::Manual)]
    mode: SegmentationMode,

    /// Use tile-adaptive (CLAHE) contrast enhancement.
    #[arg(long)]
    clahe: bool,

    /// Try the learned denoiser, falling back to non-local means.
    #[arg(long)]
    learned_denoise: bool,

    /// Skip morphological mask refinement.
    #[arg(long)]
    no_morphology: bool,

    /// Merge edge maps into the mask.
    #[arg(long)]
    edges: bool,

    /// ONNX denoising model (requires the `onnx` feature).
    ///
    /// Defaults to `dncnn.onnx` in the working directory when that file
    /// exists.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// Missing fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,

    /// Directory saved results are written to.
    #[arg(long, default_value = medivis_io::DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Save the results shown after the last action.
    #[arg(long)]
    save: bool,

    /// Action to replay after the first run (repeatable): mode=<mode>,
    /// clahe, learned, morphology, edges, next, prev, save.
    #[arg(long = "action")]
    actions: Vec<Action>,

    /// Output diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.  Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        PipelineConfig {
            mode: cli.mode,
            use_adaptive_contrast: cli.clahe,
            use_learned_denoise: cli.learned_denoise,
            use_morphology_refine: !cli.no_morphology,
            show_edges: cli.edges,
            ..PipelineConfig::default()
        }
    };
    config
        .validate()
        .map_err(|e| format!("Invalid configuration: {e}"))?;
    Ok(config)
}

/// Files named by `input`: the sorted images of a directory, or the
/// path itself.
fn input_files(input: &Path) -> Result<Vec<PathBuf>, medivis_io::LoadError> {
    if input.is_dir() {
        medivis_io::list_images(input)
    } else {
        Ok(vec![input.to_path_buf()])
    }
}

/// Model file tried when `--model` is not given.
#[cfg(any(feature = "onnx", test))]
const DEFAULT_MODEL: &str = "dncnn.onnx";

/// The model to load: `explicit` if given, else `default` if it exists.
#[cfg(any(feature = "onnx", test))]
fn resolve_model(explicit: Option<&Path>, default: &Path) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => default.is_file().then(|| default.to_path_buf()),
    }
}

#[cfg(feature = "onnx")]
fn build_denoiser(model: Option<&Path>) -> Denoiser {
    let Some(path) = resolve_model(model, Path::new(DEFAULT_MODEL)) else {
        tracing::debug!("no denoising model; learned denoising will fall back");
        return Denoiser::classical();
    };
    match medivis_pipeline::OnnxDenoiseModel::load(&path) {
        Ok(model) => Denoiser::with_model(model),
        Err(e) => {
            tracing::warn!(path = %path.display(), "{e}; learned denoising will fall back");
            Denoiser::classical()
        }
    }
}

#[cfg(not(feature = "onnx"))]
fn build_denoiser(model: Option<&Path>) -> Denoiser {
    if let Some(path) = model {
        tracing::warn!(
            path = %path.display(),
            "built without the `onnx` feature; ignoring --model",
        );
    }
    Denoiser::classical()
}

/// What the driver keeps between runs.
struct Driver<'a> {
    cli: &'a Cli,
    files: Vec<PathBuf>,
    denoiser: Denoiser,
    sink: OutputSink,
    /// Results currently "on screen", with the file they came from.
    shown: Option<(PathBuf, PipelineOutput)>,
}

impl Driver<'_> {
    /// Run the pipeline on the current file.
    ///
    /// A file that fails to load is skipped with a warning; the
    /// previous results stay on screen.
    fn run(&mut self, state: &AppState) -> Result<(), String> {
        let Some(path) = self.files.get(state.index()) else {
            return Ok(());
        };
        let raw = match medivis_io::load_raw(path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("{e}");
                return Ok(());
            }
        };

        let config = state.config_snapshot();
        eprintln!(
            "[{}/{}] {} ({})",
            state.index() + 1,
            state.file_count(),
            path.display(),
            config.mode,
        );
        let Some((staged, diagnostics)) =
            medivis_pipeline::diagnostics::process_staged_with_diagnostics(
                raw,
                &config,
                &self.denoiser,
                &StdClock,
            )
        else {
            tracing::warn!(path = %path.display(), "image is empty; nothing to process");
            return Ok(());
        };

        self.print(&diagnostics)?;
        self.shown = Some((path.clone(), staged.into_output()));
        Ok(())
    }

    fn print(&self, diagnostics: &PipelineDiagnostics) -> Result<(), String> {
        if self.cli.json {
            let json = serde_json::to_string_pretty(diagnostics)
                .map_err(|e| format!("Error serializing diagnostics: {e}"))?;
            println!("{json}");
        } else {
            println!("{}", diagnostics.report());
        }
        Ok(())
    }

    /// Write the results on screen. Failures are logged and leave the
    /// results untouched.
    fn save(&self) {
        let Some((path, output)) = &self.shown else {
            tracing::warn!("no results to save");
            return;
        };
        match self.sink.save(path, output) {
            Ok(files) => {
                for file in files.paths() {
                    eprintln!("Saved {}", file.display());
                }
            }
            Err(e) => tracing::warn!("{e}"),
        }
    }

    /// Run and save as the state asks, then clear both requests.
    fn settle(&mut self, mut state: AppState) -> Result<AppState, String> {
        if state.needs_run {
            self.run(&state)?;
            state = state.ran();
        }
        if state.save_requested {
            self.save();
            state = apply_action(state, Action::SaveCompleted);
        }
        Ok(state)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let files = match input_files(&cli.input) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(count = files.len(), input = %cli.input.display(), "found images");

    let mut state = AppState::new(config, files.len(), cli.index);
    let mut driver = Driver {
        cli: &cli,
        denoiser: build_denoiser(cli.model.as_deref()),
        sink: OutputSink::new(cli.output_dir.clone()),
        files,
        shown: None,
    };

    let mut actions = cli.actions.clone();
    if cli.save {
        actions.push(Action::RequestSave);
    }

    for action in std::iter::once(None).chain(actions.into_iter().map(Some)) {
        if let Some(action) = action {
            tracing::debug!(%action, "applying action");
            state = apply_action(state, action);
        }
        state = match driver.settle(state) {
            Ok(state) => state,
            Err(msg) => {
                eprintln!("{msg}");
                return ExitCode::FAILURE;
            }
        };
    }

    if driver.shown.is_none() {
        eprintln!("No image could be processed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("medivis").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flags_build_config() {
        let cli = parse(&["scans", "--mode", "bone", "--clahe", "--no-morphology", "--edges"]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.mode, SegmentationMode::Bone);
        assert!(config.use_adaptive_contrast);
        assert!(!config.use_morphology_refine);
        assert!(config.show_edges);
        assert!(!config.use_learned_denoise);
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = parse(&[
            "scans",
            "--mode",
            "bone",
            "--config-json",
            r#"{"mode":"Lung","show_edges":true}"#,
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.mode, SegmentationMode::Lung);
        assert!(config.show_edges);
        assert!(config.use_morphology_refine);
    }

    #[test]
    fn invalid_json_config_rejected() {
        let cli = parse(&["scans", "--config-json", r#"{"edge_low":200,"edge_high":10}"#]);
        let err = config_from_cli(&cli).unwrap_err();
        assert!(err.starts_with("Invalid configuration"));

        let cli = parse(&["scans", "--config-json", "{not json"]);
        assert!(config_from_cli(&cli).unwrap_err().starts_with("Error parsing"));
    }

    #[test]
    fn actions_repeatable() {
        let cli = parse(&["scans", "--action", "next", "--action", "mode=lung", "--save"]);
        assert_eq!(
            cli.actions,
            vec![Action::NextFile, Action::SelectMode(SegmentationMode::Lung)]
        );
        assert!(cli.save);
        assert_eq!(cli.output_dir, PathBuf::from("medivis_output"));
    }

    #[test]
    fn unknown_mode_rejected() {
        let args = ["medivis", "scans", "--mode", "brain"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn explicit_model_wins() {
        let dir = tempfile::tempdir().unwrap();
        let default = dir.path().join(DEFAULT_MODEL);
        std::fs::write(&default, b"weights").unwrap();
        let explicit = Path::new("custom.onnx");
        assert_eq!(
            resolve_model(Some(explicit), &default),
            Some(PathBuf::from("custom.onnx"))
        );
    }

    #[test]
    fn default_model_used_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let default = dir.path().join(DEFAULT_MODEL);
        assert_eq!(resolve_model(None, &default), None);

        std::fs::write(&default, b"weights").unwrap();
        assert_eq!(resolve_model(None, &default), Some(default));
    }

    #[test]
    fn single_file_input() {
        let files = input_files(Path::new("does/not/exist.png")).unwrap();
        assert_eq!(files, vec![PathBuf::from("does/not/exist.png")]);
    }
}
