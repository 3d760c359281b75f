//! facegate-core: face verification and identification engine.
//!
//! SCRFD detection, a landmark regressor and ArcFace features, all running
//! via ONNX Runtime on the CPU, behind a fail-closed [`FaceEngine`].

pub mod alignment;
pub mod backend;
pub mod detector;
pub mod engine;
pub mod image_io;
pub mod landmarker;
pub mod locator;
pub mod recognizer;
pub mod search;
pub mod threshold;
pub mod types;

pub use backend::{FaceModels, InferenceError, LoadError, ModelLoader, OnnxLoader, OnnxModels};
pub use detector::{DetectorSettings, FaceDetector, MIN_FACE_SIZE};
pub use engine::{FaceEngine, MIN_FACE_CONFIDENCE};
pub use landmarker::Landmarker;
pub use locator::{locate, ModelBundle, ModelFiles, SearchPlan};
pub use recognizer::FaceRecognizer;
pub use search::{RecentMatchCache, SearchPolicy, EARLY_EXIT_SCORE, MAX_CANDIDATES};
pub use threshold::{Threshold, DEFAULT_THRESHOLD, THRESHOLD_SETTING};
pub use types::{
    DetectedFace, EnrolledIdentity, FacePosition, FeatureVector, Identification, InputFault,
    LandmarkLayout, LandmarkSet, MatchedIdentity, ModelGeneration, Outcome, PixelBuffer,
    Verification,
};

/// Similarity between two feature vectors, in `[0, 1]`.
pub fn score(a: &FeatureVector, b: &FeatureVector) -> f32 {
    a.similarity(b)
}
