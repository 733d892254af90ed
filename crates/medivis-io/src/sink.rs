//! Persisting pipeline results as PNG files.
//!
//! One saved run produces four files next to each other in the output
//! directory, named after the input stem:
//!
//! ```text
//! <stem>_1_original.png
//! <stem>_2_processed.png
//! <stem>_3_mask.png
//! <stem>_4_final.png
//! ```

use std::path::{Path, PathBuf};

use image::ImageFormat;
use medivis_pipeline::PipelineOutput;

/// Directory results go to when none is given.
pub const DEFAULT_OUTPUT_DIR: &str = "medivis_output";

/// Why a result could not be written.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// The output directory could not be created.
    #[error("failed to create {}: {source}", path.display())]
    CreateDir {
        /// Directory that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A PNG could not be encoded or written.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// File that failed.
        path: PathBuf,
        /// Underlying encoder error.
        #[source]
        source: image::ImageError,
    },
}

/// Create `path` and any missing parents.
///
/// Succeeds if the directory already exists.
///
/// # Errors
///
/// Returns [`PersistError::CreateDir`] if the directory cannot be
/// created, for example because a file already has that name.
pub fn ensure_dir(path: &Path) -> Result<(), PersistError> {
    std::fs::create_dir_all(path).map_err(|source| PersistError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Paths written by one [`OutputSink::save`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFiles {
    /// `<stem>_1_original.png`: the input rescaled to 8 bits.
    pub original: PathBuf,
    /// `<stem>_2_processed.png`: the enhanced, denoised image.
    pub processed: PathBuf,
    /// `<stem>_3_mask.png`: the binary mask.
    pub mask: PathBuf,
    /// `<stem>_4_final.png`: the color overlay.
    pub overlay: PathBuf,
}

impl SavedFiles {
    fn for_stem(dir: &Path, stem: &str) -> Self {
        let file = |suffix: &str| dir.join(format!("{stem}_{suffix}.png"));
        Self {
            original: file("1_original"),
            processed: file("2_processed"),
            mask: file("3_mask"),
            overlay: file("4_final"),
        }
    }

    /// All four paths, in file-number order.
    #[must_use]
    pub fn paths(&self) -> [&Path; 4] {
        [
            self.original.as_path(),
            self.processed.as_path(),
            self.mask.as_path(),
            self.overlay.as_path(),
        ]
    }
}

/// Writes pipeline results into one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSink {
    dir: PathBuf,
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_DIR)
    }
}

impl OutputSink {
    /// Sink writing into `dir`; nothing is created until the first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory results are written to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the four images of `output`, named after `source`.
    ///
    /// `source` is usually the input path; only its file stem is used.
    /// The output directory is created on demand. Existing files with
    /// the same names are overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError`] if the directory cannot be created or
    /// any image cannot be written. Files written before the failure
    /// are left in place.
    pub fn save(&self, source: &Path, output: &PipelineOutput) -> Result<SavedFiles, PersistError> {
        ensure_dir(&self.dir)?;
        let stem = source
            .file_stem()
            .map_or_else(|| "image".into(), |s| s.to_string_lossy());
        let files = SavedFiles::for_stem(&self.dir, &stem);

        write_png(&output.original, &files.original)?;
        write_png(&output.enhanced, &files.processed)?;
        write_png(&output.mask, &files.mask)?;
        write_png(&output.overlay, &files.overlay)?;

        tracing::info!(
            dir = %self.dir.display(),
            stem = %stem,
            "saved results",
        );
        Ok(files)
    }
}

fn write_png<P>(
    image: &image::ImageBuffer<P, Vec<P::Subpixel>>,
    path: &Path,
) -> Result<(), PersistError>
where
    P: image::PixelWithColorType,
    [P::Subpixel]: image::EncodableLayout,
{
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|source| PersistError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::{GrayImage, Luma, Rgb, RgbImage};

    use super::*;

    fn sample_output() -> PipelineOutput {
        PipelineOutput {
            original: GrayImage::from_fn(6, 4, |x, _| Luma([(x * 40) as u8])),
            enhanced: GrayImage::from_pixel(6, 4, Luma([90])),
            mask: GrayImage::from_fn(6, 4, |x, _| Luma([if x < 3 { 255 } else { 0 }])),
            overlay: RgbImage::from_pixel(6, 4, Rgb([162, 60, 60])),
        }
    }

    #[test]
    fn ensure_dir_creates_nested_and_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn ensure_dir_fails_on_file() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("taken");
        std::fs::write(&file, b"x").unwrap();
        let err = ensure_dir(&file).unwrap_err();
        assert!(matches!(err, PersistError::CreateDir { .. }));
    }

    #[test]
    fn save_writes_four_named_files() {
        let root = tempfile::tempdir().unwrap();
        let sink = OutputSink::new(root.path().join("out"));
        let files = sink
            .save(Path::new("/scans/chest_042.tif"), &sample_output())
            .unwrap();

        let names: Vec<_> = files
            .paths()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "chest_042_1_original.png",
                "chest_042_2_processed.png",
                "chest_042_3_mask.png",
                "chest_042_4_final.png",
            ]
        );
        assert!(files.paths().iter().all(|p| p.is_file()));
    }

    #[test]
    fn saved_images_read_back_unchanged() {
        let root = tempfile::tempdir().unwrap();
        let sink = OutputSink::new(root.path());
        let output = sample_output();
        let files = sink.save(Path::new("slice.png"), &output).unwrap();

        let mask = image::open(&files.mask).unwrap().to_luma8();
        assert_eq!(mask, output.mask);
        let overlay = image::open(&files.overlay).unwrap().to_rgb8();
        assert_eq!(overlay, output.overlay);
    }

    #[test]
    fn default_sink_uses_default_dir() {
        assert_eq!(OutputSink::default().dir(), Path::new(DEFAULT_OUTPUT_DIR));
    }
}
