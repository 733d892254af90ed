//! medivis-io: filesystem edge of the medivis pipeline.
//!
//! Decodes images from disk into the calibrated buffers
//! `medivis-pipeline` consumes, and writes its results back out as PNG.
//! All processing stays in the pipeline crate.

pub mod loader;
pub mod sink;

pub use loader::{LoadError, list_images, load_dicom, load_raw};
pub use sink::{DEFAULT_OUTPUT_DIR, OutputSink, PersistError, SavedFiles, ensure_dir};
