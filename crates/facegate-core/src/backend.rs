//! The seam between the workflows and the inference backend.
//!
//! [`FaceEngine`](crate::engine::FaceEngine) only talks to a [`ModelLoader`]
//! and the [`FaceModels`] it produces. [`OnnxLoader`] is the production
//! implementation: locate the bundle, fingerprint it, open three ONNX sessions.

use crate::detector::{DetectorError, DetectorSettings, FaceDetector};
use crate::landmarker::{LandmarkError, Landmarker};
use crate::locator::{self, LocateError, ModelBundle, SearchPlan};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{DetectedFace, FeatureVector, LandmarkSet, PixelBuffer};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("model discovery failed: {0}")]
    Locate(#[from] LocateError),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmarker: {0}")]
    Landmark(#[from] LandmarkError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// A per-call inference failure. The engine treats any of these as "no face".
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Landmark(#[from] LandmarkError),
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
}

/// A loaded, ready set of models.
pub trait FaceModels: Send {
    /// Faces in `image`, best first.
    fn detect(&mut self, image: &PixelBuffer) -> Result<Vec<DetectedFace>, InferenceError>;

    fn landmarks(
        &mut self,
        image: &PixelBuffer,
        face: &DetectedFace,
    ) -> Result<LandmarkSet, InferenceError>;

    fn features(
        &mut self,
        image: &PixelBuffer,
        landmarks: &LandmarkSet,
    ) -> Result<FeatureVector, InferenceError>;
}

/// Produces [`FaceModels`]. Called on every engine operation until it succeeds.
pub trait ModelLoader: Send {
    type Models: FaceModels;

    fn load(&self) -> Result<Self::Models, LoadError>;
}

/// The three ONNX sessions of one bundle.
pub struct OnnxModels {
    bundle: ModelBundle,
    detector: FaceDetector,
    landmarker: Landmarker,
    recognizer: FaceRecognizer,
}

impl OnnxModels {
    pub fn open(bundle: ModelBundle, settings: DetectorSettings) -> Result<Self, LoadError> {
        let generation = bundle.generation()?;
        let detector = FaceDetector::load(&bundle.detector, settings)?;
        let landmarker = Landmarker::load(&bundle.landmarker)?;
        let recognizer = FaceRecognizer::load(&bundle.recognizer, generation)?;
        Ok(Self {
            bundle,
            detector,
            landmarker,
            recognizer,
        })
    }

    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }
}

impl FaceModels for OnnxModels {
    fn detect(&mut self, image: &PixelBuffer) -> Result<Vec<DetectedFace>, InferenceError> {
        Ok(self.detector.detect(image)?)
    }

    fn landmarks(
        &mut self,
        image: &PixelBuffer,
        face: &DetectedFace,
    ) -> Result<LandmarkSet, InferenceError> {
        Ok(self.landmarker.locate(image, face)?)
    }

    fn features(
        &mut self,
        image: &PixelBuffer,
        landmarks: &LandmarkSet,
    ) -> Result<FeatureVector, InferenceError> {
        Ok(self.recognizer.extract(image, landmarks)?)
    }
}

/// Locates the model bundle with a [`SearchPlan`] and opens it with ONNX Runtime.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    pub plan: SearchPlan,
    pub detector_settings: DetectorSettings,
}

impl OnnxLoader {
    pub fn new(plan: SearchPlan) -> Self {
        Self {
            plan,
            detector_settings: DetectorSettings::default(),
        }
    }
}

impl ModelLoader for OnnxLoader {
    type Models = OnnxModels;

    fn load(&self) -> Result<OnnxModels, LoadError> {
        let bundle = locator::locate(&self.plan)?;
        tracing::info!(
            directory = %bundle.directory.display(),
            strategy = ?bundle.found_by,
            "model bundle located"
        );
        OnnxModels::open(bundle, self.detector_settings)
    }
}
