//! The face engine: lazy model loading plus the verify, identify and track
//! workflows.
//!
//! Every public operation returns an [`Outcome`] and never an error. Models
//! are loaded on first use; a failed load is retried on the next call and a
//! successful one is kept for the life of the engine.

use crate::backend::{FaceModels, LoadError, ModelLoader};
use crate::image_io;
use crate::search::{self, RecentMatchCache, SearchPolicy};
use crate::threshold::Threshold;
use crate::types::{
    DetectedFace, EnrolledIdentity, FacePosition, FeatureVector, Identification, InputFault,
    MatchedIdentity, Outcome, PixelBuffer, Verification,
};
use std::path::Path;

/// Detections below this confidence count as "no face".
pub const MIN_FACE_CONFIDENCE: f32 = 0.3;

pub struct FaceEngine<L: ModelLoader> {
    loader: L,
    models: Option<L::Models>,
    recent: RecentMatchCache,
    policy: SearchPolicy,
    load_attempts: usize,
}

impl<L: ModelLoader> FaceEngine<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            models: None,
            recent: RecentMatchCache::default(),
            policy: SearchPolicy::default(),
            load_attempts: 0,
        }
    }

    pub fn with_policy(mut self, policy: SearchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Load the models unless already loaded.
    pub fn ensure_ready(&mut self) -> Result<(), LoadError> {
        if self.models.is_some() {
            return Ok(());
        }
        self.load_attempts += 1;
        match self.loader.load() {
            Ok(models) => {
                tracing::info!(attempt = self.load_attempts, "face models ready");
                self.models = Some(models);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    attempt = self.load_attempts,
                    error = %e,
                    "face models unavailable; failing closed"
                );
                Err(e)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.models.is_some()
    }

    pub fn load_attempts(&self) -> usize {
        self.load_attempts
    }

    fn ready_models(&mut self) -> Option<&mut L::Models> {
        self.ensure_ready().ok()?;
        self.models.as_mut()
    }

    /// Faces at or above [`MIN_FACE_CONFIDENCE`], best first.
    pub fn detect(&mut self, image: &PixelBuffer) -> Outcome<Vec<DetectedFace>> {
        let Some(models) = self.ready_models() else {
            return Outcome::NotReady;
        };
        Outcome::Ready(confident_faces(models, image))
    }

    /// 1:1 comparison of two decoded images.
    pub fn verify(
        &mut self,
        a: &PixelBuffer,
        b: &PixelBuffer,
        threshold: Threshold,
    ) -> Outcome<Verification> {
        let Some(models) = self.ready_models() else {
            return Outcome::NotReady;
        };
        let fa = match features_of(models, a, None) {
            Ok(f) => f,
            Err(fault) => return Outcome::InputInvalid(fault),
        };
        let fb = match features_of(models, b, None) {
            Ok(f) => f,
            Err(fault) => return Outcome::InputInvalid(fault),
        };
        Outcome::Ready(decide(&fa, &fb, threshold))
    }

    /// 1:1 comparison of two image files.
    pub fn verify_paths(&mut self, a: &Path, b: &Path, threshold: Threshold) -> Outcome<Verification> {
        let Some(models) = self.ready_models() else {
            return Outcome::NotReady;
        };
        let fa = match features_at(models, a) {
            Ok(f) => f,
            Err(fault) => {
                tracing::info!(fault = %fault, "verify rejected");
                return Outcome::InputInvalid(fault);
            }
        };
        let fb = match features_at(models, b) {
            Ok(f) => f,
            Err(fault) => {
                tracing::info!(fault = %fault, "verify rejected");
                return Outcome::InputInvalid(fault);
            }
        };

        let verification = decide(&fa, &fb, threshold);
        tracing::info!(
            score = verification.score,
            threshold = %threshold,
            accepted = verification.accepted,
            "verify"
        );
        Outcome::Ready(verification)
    }

    /// 1:N search of `gallery` for the face in `probe`.
    ///
    /// A probe without a face ends the call before any candidate is loaded.
    /// An accepted match is promoted in the recent-match cache.
    pub fn identify(
        &mut self,
        probe: &Path,
        gallery: &[EnrolledIdentity],
        threshold: Threshold,
    ) -> Outcome<Identification> {
        if self.ensure_ready().is_err() {
            return Outcome::NotReady;
        }
        let Self {
            models,
            recent,
            policy,
            ..
        } = self;
        let Some(models) = models.as_mut() else {
            return Outcome::NotReady;
        };

        let probe_features = match features_at(models, probe) {
            Ok(f) => f,
            Err(fault) => {
                tracing::info!(fault = %fault, "identify rejected probe");
                return Outcome::InputInvalid(fault);
            }
        };

        let candidates = search::candidate_order(gallery, recent, policy.max_candidates);
        let report = search::scan(&candidates, threshold, policy, |candidate| {
            match features_at(models, &candidate.image_path) {
                Ok(features) => Some(probe_features.similarity(&features)),
                Err(fault) => {
                    tracing::debug!(key = %candidate.key, fault = %fault, "candidate skipped");
                    None
                }
            }
        });

        let matched = report.matched().map(|id| MatchedIdentity {
            key: id.key.clone(),
            display_name: id.display_name.clone(),
        });
        if let Some(m) = &matched {
            recent.promote(&m.key);
        }

        tracing::info!(
            gallery = gallery.len(),
            compared = report.compared,
            skipped = report.skipped,
            early_exit = report.early_exit,
            score = report.best_score,
            matched = matched.as_ref().map(|m| m.key.as_str()),
            "identify"
        );

        Outcome::Ready(Identification {
            matched,
            score: report.best_score,
            compared: report.compared,
            early_exit: report.early_exit,
        })
    }

    /// Detection only, for live framing feedback.
    pub fn track(&mut self, image: &PixelBuffer) -> Outcome<FacePosition> {
        let Some(models) = self.ready_models() else {
            return Outcome::NotReady;
        };
        let face = confident_faces(models, image).into_iter().next();
        Outcome::Ready(FacePosition {
            present: face.is_some(),
            face,
            image_width: image.width(),
            image_height: image.height(),
        })
    }

    pub fn track_path(&mut self, path: &Path) -> Outcome<FacePosition> {
        if self.ensure_ready().is_err() {
            return Outcome::NotReady;
        }
        match image_io::decode(path) {
            Ok(image) => self.track(&image),
            Err(e) => Outcome::InputInvalid(e.into_fault()),
        }
    }

    /// The order in which [`identify`](Self::identify) would visit `gallery` now.
    pub fn candidate_order<'a>(&self, gallery: &'a [EnrolledIdentity]) -> Vec<&'a EnrolledIdentity> {
        search::candidate_order(gallery, &self.recent, self.policy.max_candidates)
    }

    pub fn recent_matches(&self) -> Vec<&str> {
        self.recent.keys().collect()
    }
}

fn decide(a: &FeatureVector, b: &FeatureVector, threshold: Threshold) -> Verification {
    let score = a.similarity(b);
    Verification {
        accepted: threshold.accepts(score),
        score,
    }
}

/// Detections that clear the confidence cutoff, best first. A backend
/// failure counts as no face.
fn confident_faces<M: FaceModels>(models: &mut M, image: &PixelBuffer) -> Vec<DetectedFace> {
    let mut faces = match models.detect(image) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(error = %e, "detection failed; treating as no face");
            return Vec::new();
        }
    };
    faces.retain(|f| f.confidence >= MIN_FACE_CONFIDENCE);
    faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    faces
}

/// Detect, locate landmarks on the best face and extract its features.
fn features_of<M: FaceModels>(
    models: &mut M,
    image: &PixelBuffer,
    path: Option<&Path>,
) -> Result<FeatureVector, InputFault> {
    let no_face = || InputFault::NoFace {
        path: path.map(Path::to_path_buf),
    };

    let face = confident_faces(models, image)
        .into_iter()
        .next()
        .ok_or_else(no_face)?;

    let landmarks = models.landmarks(image, &face).map_err(|e| {
        tracing::warn!(error = %e, "landmark localization failed; treating as no face");
        no_face()
    })?;

    models.features(image, &landmarks).map_err(|e| {
        tracing::warn!(error = %e, "feature extraction failed; treating as no face");
        no_face()
    })
}

fn features_at<M: FaceModels>(models: &mut M, path: &Path) -> Result<FeatureVector, InputFault> {
    let image = image_io::decode(path).map_err(image_io::ImageError::into_fault)?;
    features_of(models, &image, Some(path))
}
