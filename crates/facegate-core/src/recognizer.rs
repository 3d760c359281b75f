//! ArcFace feature extractor via ONNX Runtime.
//!
//! Aligns the face to the canonical 112x112 crop and turns it into an
//! L2-normalized feature vector tagged with the model generation.

use crate::alignment;
use crate::types::{FeatureVector, LandmarkSet, ModelGeneration, PixelBuffer};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric, unlike SCRFD

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceRecognizer {
    session: Session,
    generation: ModelGeneration,
}

impl FaceRecognizer {
    /// Load the ArcFace model. Every vector it produces carries `generation`.
    pub fn load(model_path: &Path, generation: ModelGeneration) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            generation = %generation.0,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self {
            session,
            generation,
        })
    }

    pub fn generation(&self) -> &ModelGeneration {
        &self.generation
    }

    /// Extract the feature vector of the face described by `landmarks`.
    pub fn extract(
        &mut self,
        image: &PixelBuffer,
        landmarks: &LandmarkSet,
    ) -> Result<FeatureVector, RecognizerError> {
        let aligned = alignment::align_face(image, landmarks)
            .ok_or_else(|| RecognizerError::InferenceFailed("face alignment produced no crop".into()))?;
        let input = preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("feature extraction: {e}")))?;

        let values = l2_normalize(raw)?;
        Ok(FeatureVector {
            values,
            generation: self.generation.clone(),
        })
    }
}

/// Aligned RGB crop into a NCHW float tensor.
fn preprocess(aligned: &PixelBuffer) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        for x in 0..size {
            for c in 0..3 {
                let pixel = aligned.sample(x, y, c) as f32;
                tensor[[0, c, y, x]] = (pixel - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }
    }

    tensor
}

fn l2_normalize(raw: &[f32]) -> Result<Vec<f32>, RecognizerError> {
    if raw.is_empty() {
        return Err(RecognizerError::InferenceFailed("model produced an empty feature vector".into()));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(RecognizerError::InferenceFailed("feature vector contains non-finite values".into()));
    }
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return Err(RecognizerError::InferenceFailed("feature vector has zero norm".into()));
    }
    Ok(raw.iter().map(|x| x / norm).collect())
}
