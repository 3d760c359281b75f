//! Facial landmark regressor via ONNX Runtime.
//!
//! The model sees a square crop centred on the detected face and regresses
//! `2N` coordinates normalized to the crop (`[0, 1]`). `N` decides the layout
//! (5 or 68 points); any other count is rejected.

use crate::types::{DetectedFace, LandmarkSet, PixelBuffer};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const LANDMARK_INPUT_SIZE: usize = 112;
const LANDMARK_MEAN: f32 = 127.5;
const LANDMARK_STD: f32 = 128.0;
/// Crop side relative to the longer side of the face box.
const LANDMARK_CROP_SCALE: f32 = 1.5;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("unsupported landmark count {0} (expected 5 or 68)")]
    UnsupportedLayout(usize),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Square region of the source image fed to the model.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Crop {
    x: f32,
    y: f32,
    side: f32,
}

impl Crop {
    fn around(face: &DetectedFace) -> Self {
        let side = face.width.max(face.height) * LANDMARK_CROP_SCALE;
        let cx = face.x + face.width / 2.0;
        let cy = face.y + face.height / 2.0;
        Self {
            x: cx - side / 2.0,
            y: cy - side / 2.0,
            side,
        }
    }

    /// Map a crop-normalized coordinate back to source pixels.
    fn to_image(self, nx: f32, ny: f32) -> (f32, f32) {
        (self.x + nx * self.side, self.y + ny * self.side)
    }
}

pub struct Landmarker {
    session: Session,
}

impl Landmarker {
    pub fn load(model_path: &Path) -> Result<Self, LandmarkError> {
        if !model_path.exists() {
            return Err(LandmarkError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded landmark model"
        );

        Ok(Self { session })
    }

    /// Locate landmarks inside one face region.
    pub fn locate(
        &mut self,
        image: &PixelBuffer,
        face: &DetectedFace,
    ) -> Result<LandmarkSet, LandmarkError> {
        let crop = Crop::around(face);
        let input = preprocess(image, crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::InferenceFailed(format!("landmark extraction: {e}")))?;

        decode(raw, crop)
    }
}

/// Crop, resize and normalize into a NCHW tensor. Outside the image is black.
fn preprocess(image: &PixelBuffer, crop: Crop) -> Array4<f32> {
    let size = LANDMARK_INPUT_SIZE;
    let step = crop.side / size as f32;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        let sy = crop.y + (y as f32 + 0.5) * step - 0.5;
        for x in 0..size {
            let sx = crop.x + (x as f32 + 0.5) * step - 0.5;
            for c in 0..3 {
                let pixel = image.sample_bilinear(sx, sy, c);
                tensor[[0, c, y, x]] = (pixel - LANDMARK_MEAN) / LANDMARK_STD;
            }
        }
    }

    tensor
}

fn decode(raw: &[f32], crop: Crop) -> Result<LandmarkSet, LandmarkError> {
    if raw.len() % 2 != 0 {
        return Err(LandmarkError::UnsupportedLayout(raw.len()));
    }
    let points: Vec<(f32, f32)> = raw
        .chunks_exact(2)
        .map(|p| crop.to_image(p[0], p[1]))
        .collect();
    let count = points.len();
    LandmarkSet::new(points).ok_or(LandmarkError::UnsupportedLayout(count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LandmarkLayout;

    fn face(x: f32, y: f32, w: f32, h: f32) -> DetectedFace {
        DetectedFace {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_crop_is_square_and_centred() {
        let crop = Crop::around(&face(100.0, 50.0, 80.0, 100.0));
        assert!((crop.side - 150.0).abs() < 1e-5);
        assert!((crop.x + crop.side / 2.0 - 140.0).abs() < 1e-5);
        assert!((crop.y + crop.side / 2.0 - 100.0).abs() < 1e-5);
    }

    #[test]
    fn test_decode_maps_to_image_coordinates() {
        let crop = Crop {
            x: 10.0,
            y: 20.0,
            side: 100.0,
        };
        let raw = [0.0, 0.0, 1.0, 1.0, 0.5, 0.5, 0.25, 0.75, 0.75, 0.75];
        let set = decode(&raw, crop).unwrap();
        assert_eq!(set.layout(), LandmarkLayout::Five);
        assert_eq!(set.points()[0], (10.0, 20.0));
        assert_eq!(set.points()[1], (110.0, 120.0));
        assert_eq!(set.points()[2], (60.0, 70.0));
    }

    #[test]
    fn test_decode_rejects_unknown_counts() {
        let crop = Crop {
            x: 0.0,
            y: 0.0,
            side: 1.0,
        };
        assert!(matches!(decode(&[], crop), Err(LandmarkError::UnsupportedLayout(0))));
        assert!(matches!(
            decode(&[0.0; 212], crop),
            Err(LandmarkError::UnsupportedLayout(106))
        ));
        assert!(matches!(decode(&[0.0; 3], crop), Err(LandmarkError::UnsupportedLayout(3))));
        assert!(decode(&[0.0; 136], crop).is_ok());
    }

    #[test]
    fn test_preprocess_outside_image_is_black() {
        let image = PixelBuffer::new(10, 10, 1, vec![200; 100]).unwrap();
        let crop = Crop {
            x: -100.0,
            y: -100.0,
            side: 50.0,
        };
        let tensor = preprocess(&image, crop);
        assert_eq!(tensor.shape(), &[1, 3, LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE]);
        let black = (0.0 - LANDMARK_MEAN) / LANDMARK_STD;
        assert!((tensor[[0, 2, 0, 0]] - black).abs() < 1e-6);
    }
}
