//! Loading calibrated single-channel images from disk.
//!
//! DICOM slices (`.dcm`, `.ima`) are decoded with `dicom-pixeldata`.
//! The modality LUT (rescale slope and intercept) is applied, so a CT
//! slice arrives in Hounsfield units, `-1024` for air and so on.
//!
//! Any other raster the `image` crate decodes (PNG, TIFF, BMP, JPEG) is
//! accepted too. Grayscale samples keep their stored values: a 16-bit
//! slice arrives as `0..=65535`, not rescaled to `[0, 1]`. Color images
//! are reduced to luma first.

use std::path::{Path, PathBuf};

use dicom_pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder};
use image::{DynamicImage, ImageBuffer, Luma, Primitive};
use medivis_pipeline::RawImage;

/// Extensions of DICOM files (lowercase).
pub const DICOM_EXTENSIONS: &[&str] = &["dcm", "ima"];

/// File extensions [`list_images`] picks up (lowercase).
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["dcm", "ima", "png", "tif", "tiff", "bmp", "jpg", "jpeg"];

/// Why an image could not be loaded.
///
/// The caller treats any of these as "no image at this index": the
/// pipeline does not run for it.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The file or directory could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a decodable image.
    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        /// Path that failed.
        path: PathBuf,
        /// Underlying decoder error.
        #[source]
        source: image::ImageError,
    },

    /// The file is not a readable DICOM object.
    #[error("failed to read DICOM {}: {source}", path.display())]
    DicomRead {
        /// Path that failed.
        path: PathBuf,
        /// Underlying parser error.
        #[source]
        source: dicom_object::ReadError,
    },

    /// The DICOM object has no decodable pixel data.
    #[error("failed to decode DICOM pixels of {}: {source}", path.display())]
    DicomPixels {
        /// Path that failed.
        path: PathBuf,
        /// Underlying pixel decoder error.
        #[source]
        source: dicom_pixeldata::Error,
    },

    /// The DICOM object stores more than one sample per pixel.
    #[error("{} has {samples} samples per pixel, expected 1", path.display())]
    NotGrayscale {
        /// Path of the color object.
        path: PathBuf,
        /// Samples per pixel found.
        samples: u16,
    },

    /// The image decoded to zero width or height.
    #[error("{} contains an empty image", path.display())]
    Empty {
        /// Path of the empty image.
        path: PathBuf,
    },

    /// A directory contains no supported image files.
    #[error("no supported images in {}", dir.display())]
    NoImages {
        /// Directory that was scanned.
        dir: PathBuf,
    },
}

/// Load `path` as a calibrated single-channel image.
///
/// DICOM files are recognized by extension; see [`load_dicom`].
///
/// # Errors
///
/// Returns [`LoadError::Io`] if the file cannot be opened,
/// [`LoadError::Decode`] if it is not a supported image, and
/// [`LoadError::Empty`] if it has zero width or height. DICOM files add
/// the errors of [`load_dicom`].
pub fn load_raw(path: &Path) -> Result<RawImage, LoadError> {
    if has_extension(path, DICOM_EXTENSIONS) {
        return load_dicom(path);
    }

    let io_err = |source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    };
    let decoded = image::ImageReader::open(path)
        .map_err(io_err)?
        .with_guessed_format()
        .map_err(io_err)?
        .decode()
        .map_err(|source| LoadError::Decode {
            path: path.to_path_buf(),
            source,
        })?;

    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(LoadError::Empty {
            path: path.to_path_buf(),
        });
    }

    let raw = to_raw(decoded);
    tracing::debug!(
        path = %path.display(),
        width = raw.width(),
        height = raw.height(),
        "loaded image",
    );
    Ok(raw)
}

/// Load the first frame of a single-channel DICOM object in modality
/// units (rescale slope and intercept applied).
///
/// # Errors
///
/// Returns [`LoadError::DicomRead`] if the file cannot be parsed,
/// [`LoadError::DicomPixels`] if its pixel data cannot be decoded,
/// [`LoadError::NotGrayscale`] for color objects, and
/// [`LoadError::Empty`] for zero rows or columns.
pub fn load_dicom(path: &Path) -> Result<RawImage, LoadError> {
    let pixels_err = |source| LoadError::DicomPixels {
        path: path.to_path_buf(),
        source,
    };
    let object = dicom_object::open_file(path).map_err(|source| LoadError::DicomRead {
        path: path.to_path_buf(),
        source,
    })?;
    let decoded = object.decode_pixel_data().map_err(pixels_err)?;

    let samples = decoded.samples_per_pixel();
    if samples != 1 {
        return Err(LoadError::NotGrayscale {
            path: path.to_path_buf(),
            samples,
        });
    }
    let (width, height) = (decoded.columns(), decoded.rows());
    if width == 0 || height == 0 {
        return Err(LoadError::Empty {
            path: path.to_path_buf(),
        });
    }

    let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::Default);
    let values: Vec<f32> = decoded
        .to_vec_frame_with_options(0, &options)
        .map_err(pixels_err)?;
    let raw = RawImage::from_raw(width, height, values).ok_or_else(|| LoadError::Empty {
        path: path.to_path_buf(),
    })?;
    tracing::debug!(path = %path.display(), width, height, "loaded DICOM slice");
    Ok(raw)
}

/// Convert a decoded image to calibrated `f32` samples.
///
/// Single-channel buffers are converted sample by sample. Everything
/// else goes through luma conversion at its own bit depth.
#[must_use]
pub fn to_raw(image: DynamicImage) -> RawImage {
    match image {
        DynamicImage::ImageLuma8(buf) => widen(&buf),
        DynamicImage::ImageLuma16(buf) => widen(&buf),
        DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => image.to_luma32f(),
        DynamicImage::ImageLumaA16(_)
        | DynamicImage::ImageRgb16(_)
        | DynamicImage::ImageRgba16(_) => widen(&image.to_luma16()),
        other => widen(&other.to_luma8()),
    }
}

fn widen<P>(buf: &ImageBuffer<Luma<P>, Vec<P>>) -> RawImage
where
    P: Primitive + Into<f32>,
{
    RawImage::from_fn(buf.width(), buf.height(), |x, y| {
        Luma([buf.get_pixel(x, y).0[0].into()])
    })
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.contains(&e.to_ascii_lowercase().as_str()))
}

/// Supported image files directly inside `dir`, sorted by path.
///
/// Subdirectories are not searched.
///
/// # Errors
///
/// Returns [`LoadError::Io`] if the directory cannot be read and
/// [`LoadError::NoImages`] if it holds no supported file.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let io_err = |source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && has_extension(&path, SUPPORTED_EXTENSIONS) {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Err(LoadError::NoImages {
            dir: dir.to_path_buf(),
        });
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use dicom_core::{DataElement, PrimitiveValue, VR};
    use dicom_dictionary_std::{tags, uids};
    use dicom_object::InMemDicomObject;
    use dicom_object::meta::FileMetaTableBuilder;
    use image::{GrayImage, Rgb, RgbImage};

    use super::*;

    /// Write an uncompressed 16-bit CT slice with the given rescale
    /// intercept.
    fn write_ct_slice(path: &Path, rows: u16, columns: u16, stored: &[u16], intercept: &str) {
        let object = InMemDicomObject::from_element_iter([
            DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(uids::CT_IMAGE_STORAGE)),
            DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.826.0.1.3680043.2.1")),
            DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
            DataElement::new(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, PrimitiveValue::from("MONOCHROME2")),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(rows)),
            DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(columns)),
            DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
            DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)),
            DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)),
            DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)),
            DataElement::new(tags::RESCALE_INTERCEPT, VR::DS, PrimitiveValue::from(intercept)),
            DataElement::new(tags::RESCALE_SLOPE, VR::DS, PrimitiveValue::from("1")),
            DataElement::new(
                tags::PIXEL_DATA,
                VR::OW,
                PrimitiveValue::U16(stored.iter().copied().collect()),
            ),
        ]);
        let file = object
            .with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                    .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid("1.2.826.0.1.3680043.2.1"),
            )
            .unwrap();
        file.write_to_file(path).unwrap();
    }

    #[test]
    fn dicom_slice_in_hounsfield_units() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slice_001.dcm");
        write_ct_slice(&path, 2, 2, &[0, 1024, 2048, 4000], "-1024");

        let raw = load_raw(&path).unwrap();
        assert_eq!(raw.dimensions(), (2, 2));
        let values: Vec<f32> = raw.pixels().map(|p| p.0[0]).collect();
        for (got, want) in values.iter().zip([-1024.0, 0.0, 1024.0, 2976.0]) {
            assert!((got - want).abs() < 1e-3, "{values:?}");
        }
    }

    #[test]
    fn ima_extension_read_as_dicom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SCAN.0001.IMA");
        write_ct_slice(&path, 1, 3, &[10, 20, 30], "0");

        let raw = load_raw(&path).unwrap();
        assert_eq!(raw.dimensions(), (3, 1));
        assert!((raw.get_pixel(2, 0).0[0] - 30.0).abs() < 1e-3);
    }

    #[test]
    fn garbage_dicom_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.dcm");
        std::fs::write(&path, b"not a dicom file").unwrap();
        let err = load_raw(&path).unwrap_err();
        assert!(matches!(err, LoadError::DicomRead { .. }));
    }

    #[test]
    fn list_images_finds_dicom_slices() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.IMA", "a.dcm", "scout.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let files = list_images(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.dcm", "b.IMA"]);
    }

    #[test]
    fn eight_bit_png_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slice.png");
        let img = GrayImage::from_fn(4, 3, |x, y| Luma([(x * 60 + y) as u8]));
        img.save(&path).unwrap();

        let raw = load_raw(&path).unwrap();
        assert_eq!(raw.dimensions(), (4, 3));
        assert!((raw.get_pixel(3, 2).0[0] - 182.0).abs() < f32::EPSILON);
    }

    #[test]
    fn sixteen_bit_png_keeps_calibrated_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ct.png");
        let img: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(2, 1, |x, _| Luma([if x == 0 { 24 } else { 3071 }]));
        img.save(&path).unwrap();

        let raw = load_raw(&path).unwrap();
        assert!((raw.get_pixel(0, 0).0[0] - 24.0).abs() < f32::EPSILON);
        assert!((raw.get_pixel(1, 0).0[0] - 3071.0).abs() < f32::EPSILON);
    }

    #[test]
    fn color_image_reduced_to_luma() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("color.png");
        RgbImage::from_pixel(2, 2, Rgb([200, 200, 200])).save(&path).unwrap();

        let raw = load_raw(&path).unwrap();
        assert!((raw.get_pixel(1, 1).0[0] - 200.0).abs() < 1.0);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_raw(&dir.path().join("absent.png")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn garbage_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image at all").unwrap();
        let err = load_raw(&path).unwrap_err();
        assert!(matches!(err, LoadError::Decode { .. }));
        assert!(err.to_string().contains("broken.png"));
    }

    #[test]
    fn list_images_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.TIF", "c.jpg", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let files = list_images(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.TIF", "b.png", "c.jpg"]);
    }

    #[test]
    fn list_images_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.md"), b"x").unwrap();
        let err = list_images(dir.path()).unwrap_err();
        assert!(matches!(err, LoadError::NoImages { .. }));
    }
}
