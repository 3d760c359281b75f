//! SCRFD face detector via ONNX Runtime.
//!
//! Implements the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) model with 3-stride anchor decoding, NMS post-processing and a
//! minimum face size filter.

use crate::types::{DetectedFace, PixelBuffer};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Smallest face (in source pixels, either side) the detector reports.
pub const MIN_FACE_SIZE: f32 = 80.0;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Tunables for the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorSettings {
    /// Faces narrower or shorter than this are suppressed.
    pub min_face_size: f32,
    /// Raw anchor score below which nothing is decoded.
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            min_face_size: MIN_FACE_SIZE,
            score_threshold: 0.3,
            nms_threshold: 0.4,
        }
    }
}

/// How the source image was placed inside the square model input.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl LetterboxInfo {
    /// Model-input coordinates back to source pixels.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputIndices = (usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    settings: DetectorSettings,
    /// Per-stride output indices [(score, bbox)] for strides [8, 16, 32].
    /// Discovered by name at load time; falls back to positional ordering.
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, settings: DetectorSettings) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let num_outputs = output_names.len();

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if num_outputs < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {num_outputs}"
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            settings,
            stride_indices,
        })
    }

    /// Detect faces, returning boxes sorted by confidence (best first).
    pub fn detect(&mut self, image: &PixelBuffer) -> Result<Vec<DetectedFace>, DetectorError> {
        let (input, letterbox) = preprocess(image);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;

            all_detections.extend(decode_stride(
                scores,
                bboxes,
                stride,
                &letterbox,
                self.settings.score_threshold,
            ));
        }

        let kept = nms(all_detections, self.settings.nms_threshold);
        Ok(filter_small(kept, self.settings.min_face_size))
    }
}

/// Letterbox an image into the SCRFD NCHW input tensor.
///
/// Bilinear resize per channel, padding with SCRFD_MEAN (normalizes to 0.0).
fn preprocess(image: &PixelBuffer) -> (Array4<f32>, LetterboxInfo) {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let size = SCRFD_INPUT_SIZE;

    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as usize).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as usize).clamp(1, size);
    let pad_x = (size - new_w) as f32 / 2.0;
    let pad_y = (size - new_h) as f32 / 2.0;
    let pad_x_start = pad_x.floor() as usize;
    let pad_y_start = pad_y.floor() as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let inv_scale = 1.0 / scale;

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * inv_scale - 0.5;
        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * inv_scale - 0.5;
            for c in 0..3 {
                let pixel = image.sample_clamped(src_x, src_y, c).round().clamp(0.0, 255.0);
                tensor[[0, c, y + pad_y_start, x + pad_x_start]] = (pixel - SCRFD_MEAN) / SCRFD_STD;
            }
        }
    }

    (tensor, LetterboxInfo { scale, pad_x, pad_y })
}

/// Output order used when tensor names are not recognized:
/// scores for strides 8/16/32 first, then the boxes.
const POSITIONAL_OUTPUTS: [StrideOutputIndices; 3] = [(0, 3), (1, 4), (2, 5)];

/// Map each stride to its (score, bbox) outputs by tensor name
/// (`score_8`, `bbox_16`, ...), falling back to [`POSITIONAL_OUTPUTS`].
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let index_of = |name: String| names.iter().position(|n| *n == name);
    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|s| Some((index_of(format!("score_{s}"))?, index_of(format!("bbox_{s}"))?)))
        .collect();

    match named {
        Some(found) => [found[0], found[1], found[2]],
        None => {
            tracing::info!(?names, "SCRFD output names not recognized; using positional mapping");
            POSITIONAL_OUTPUTS
        }
    }
}

/// Decode the anchors of one stride whose score clears `threshold`.
///
/// Box regressions are `[left, top, right, bottom]` distances from the anchor
/// centre, in stride units.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<DetectedFace> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    scores
        .iter()
        .take(anchors)
        .enumerate()
        .filter(|&(_, &score)| score >= threshold)
        .filter_map(|(idx, &score)| {
            let d = bboxes.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * step;
            let cy = (cell / grid) as f32 * step;

            let (left, top) = letterbox.to_source(cx - d[0] * step, cy - d[1] * step);
            let (right, bottom) = letterbox.to_source(cx + d[2] * step, cy + d[3] * step);
            Some(DetectedFace {
                x: left,
                y: top,
                width: right - left,
                height: bottom - top,
                confidence: score.clamp(0.0, 1.0),
            })
        })
        .collect()
}

/// Drop faces below the minimum size, preserving order.
fn filter_small(faces: Vec<DetectedFace>, min_size: f32) -> Vec<DetectedFace> {
    let before = faces.len();
    let kept: Vec<DetectedFace> = faces
        .into_iter()
        .filter(|f| f.width >= min_size && f.height >= min_size)
        .collect();
    if kept.len() < before {
        tracing::debug!(dropped = before - kept.len(), min_size, "suppressed small faces");
    }
    kept
}

/// Greedy non-maximum suppression. Output is sorted by confidence, best first.
fn nms(mut candidates: Vec<DetectedFace>, iou_threshold: f32) -> Vec<DetectedFace> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<DetectedFace> = Vec::with_capacity(candidates.len());
    for face in candidates {
        if kept.iter().all(|k| iou(k, &face) <= iou_threshold) {
            kept.push(face);
        }
    }
    kept
}

fn iou(a: &DetectedFace, b: &DetectedFace) -> f32 {
    let overlap_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let overlap_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = overlap_w * overlap_h;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
