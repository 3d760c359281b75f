//! Scripted model backends for exercising the engine thread and kiosk flows.
//!
//! Face images are solid-colour PNGs: the red channel names the person
//! (0 = no face) and each person maps to a fixed unit vector.

use facegate_core::locator::LocateError;
use facegate_core::recognizer::RecognizerError;
use facegate_core::{
    DetectedFace, FaceModels, FeatureVector, InferenceError, LandmarkSet, LoadError,
    ModelGeneration, ModelLoader, PixelBuffer,
};
use std::path::{Path, PathBuf};

/// Loader that always succeeds with [`ScriptedModels`].
pub struct Scripted;

/// Loader whose models are never found.
pub struct Unavailable;

pub struct ScriptedModels;

fn person(image: &PixelBuffer) -> u8 {
    image.sample(0, 0, 0)
}

impl FaceModels for ScriptedModels {
    fn detect(&mut self, image: &PixelBuffer) -> Result<Vec<DetectedFace>, InferenceError> {
        if person(image) == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![DetectedFace {
            x: 8.0,
            y: 8.0,
            width: 90.0,
            height: 90.0,
            confidence: 0.9,
        }])
    }

    fn landmarks(
        &mut self,
        _image: &PixelBuffer,
        face: &DetectedFace,
    ) -> Result<LandmarkSet, InferenceError> {
        let (x, y) = (face.x, face.y);
        Ok(LandmarkSet::new(vec![
            (x + 30.0, y + 40.0),
            (x + 60.0, y + 40.0),
            (x + 45.0, y + 55.0),
            (x + 33.0, y + 70.0),
            (x + 57.0, y + 70.0),
        ])
        .unwrap())
    }

    fn features(
        &mut self,
        image: &PixelBuffer,
        _landmarks: &LandmarkSet,
    ) -> Result<FeatureVector, InferenceError> {
        let values = match person(image) {
            1 => vec![1.0, 0.0, 0.0],
            2 => vec![0.0, 1.0, 0.0],
            3 => vec![0.0, 0.0, 1.0],
            who => {
                return Err(InferenceError::Recognizer(RecognizerError::InferenceFailed(
                    format!("no vector for {who}"),
                )))
            }
        };
        Ok(FeatureVector {
            values,
            generation: ModelGeneration("scripted".into()),
        })
    }
}

impl ModelLoader for Scripted {
    type Models = ScriptedModels;

    fn load(&self) -> Result<ScriptedModels, LoadError> {
        Ok(ScriptedModels)
    }
}

impl ModelLoader for Unavailable {
    type Models = ScriptedModels;

    fn load(&self) -> Result<ScriptedModels, LoadError> {
        Err(LoadError::Locate(LocateError::NotFound {
            files: "det_10g.onnx, landmark_5pt.onnx, w600k_r50.onnx".into(),
            searched: 3,
        }))
    }
}

/// Unique scratch directory under the system temp dir.
pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "facegate-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Write a face image for `who` (0 writes a frame with no face).
pub fn write_face(dir: &Path, name: &str, who: u8) -> PathBuf {
    let path = dir.join(format!("{name}.png"));
    image::RgbImage::from_pixel(120, 120, image::Rgb([who, 200, 40]))
        .save(&path)
        .unwrap();
    path
}
