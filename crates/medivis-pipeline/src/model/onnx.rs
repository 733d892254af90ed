//! ONNX Runtime backend for the learned denoiser.
//!
//! Expects a single-input, single-output network taking a
//! `[1, 1, H, W]` `f32` tensor with intensities scaled to `[0, 1]` and
//! returning a tensor of the same layout (the usual DnCNN export).
//! The output spatial size may differ from the input.

use std::path::Path;
use std::sync::Mutex;

use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;

use super::{DenoiseModel, ModelFailure, ModelOutcome};

/// Denoising network loaded from an `.onnx` file.
pub struct OnnxDenoiseModel {
    name: String,
    // `Session::run` needs exclusive access; the pipeline itself is
    // single-threaded, so the lock is never contended.
    session: Mutex<Session>,
}

impl OnnxDenoiseModel {
    /// Load a model from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ModelFailure::Load`] if ONNX Runtime cannot build a
    /// session from the file.
    pub fn load(path: &Path) -> Result<Self, ModelFailure> {
        let session = Session::builder()
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|e| ModelFailure::Load(format!("{}: {e}", path.display())))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("onnx")
            .to_string();
        tracing::info!(model = %name, "loaded ONNX denoising model");
        Ok(Self {
            name,
            session: Mutex::new(session),
        })
    }

    fn run(&self, image: &GrayImage) -> Result<GrayImage, ModelFailure> {
        let (w, h) = image.dimensions();
        let input = Array4::from_shape_fn((1, 1, h as usize, w as usize), |(_, _, y, x)| {
            #[allow(clippy::cast_possible_truncation)]
            let value = image.get_pixel(x as u32, y as u32).0[0];
            f32::from(value) / 255.0
        });

        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelFailure::Runtime("session lock poisoned".to_string()))?;
        let tensor = TensorRef::from_array_view(&input)
            .map_err(|e| ModelFailure::InvalidInput(e.to_string()))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| ModelFailure::Runtime(e.to_string()))?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelFailure::ShapeMismatch(e.to_string()))?;

        let dims: Vec<i64> = shape.iter().copied().collect();
        let [.., out_h, out_w] = dims.as_slice() else {
            return Err(ModelFailure::ShapeMismatch(format!("{dims:?}")));
        };
        let mismatch = || ModelFailure::ShapeMismatch(format!("{dims:?}"));
        let out_w = u32::try_from(*out_w).map_err(|_| mismatch())?;
        let out_h = u32::try_from(*out_h).map_err(|_| mismatch())?;
        let plane = out_w as usize * out_h as usize;
        if plane == 0 || data.len() < plane {
            return Err(mismatch());
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let pixels: Vec<u8> = data[..plane]
            .iter()
            .map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
            .collect();
        GrayImage::from_raw(out_w, out_h, pixels).ok_or_else(mismatch)
    }
}

impl DenoiseModel for OnnxDenoiseModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn infer(&self, image: &GrayImage) -> ModelOutcome {
        match self.run(image) {
            Ok(out) => ModelOutcome::Succeeded(out),
            Err(failure) => ModelOutcome::Failed(failure),
        }
    }
}
