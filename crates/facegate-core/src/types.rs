use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Decoded image samples, row-major and channel-interleaved.
///
/// Only non-empty 1-channel (grayscale) and 3-channel (RGB) layouts are
/// representable: [`PixelBuffer::new`] is the only way to build one.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap raw samples, rejecting unsupported channel counts and short buffers.
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Option<Self> {
        if !matches!(channels, 1 | 3) || width == 0 || height == 0 {
            return None;
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Convert any decoded image into an RGB buffer. `None` for a zero-sized image.
    pub fn from_image(image: &image::DynamicImage) -> Option<Self> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        Self::new(width, height, 3, rgb.into_raw())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Sample at integer coordinates. Grayscale buffers answer every channel with Y;
    /// coordinates outside the image read as 0.
    pub fn sample(&self, x: usize, y: usize, channel: usize) -> u8 {
        if x >= self.width as usize || y >= self.height as usize {
            return 0;
        }
        let c = if self.channels == 1 { 0 } else { channel.min(2) };
        self.data[(y * self.width as usize + x) * self.channels as usize + c]
    }

    /// Bilinear sample; pixels outside the image contribute 0 (black).
    pub fn sample_bilinear(&self, sx: f32, sy: f32, channel: usize) -> f32 {
        let w = self.width as i32;
        let h = self.height as i32;
        let x0 = sx.floor() as i32;
        let y0 = sy.floor() as i32;
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let at = |x: i32, y: i32| -> f32 {
            if x >= 0 && x < w && y >= 0 && y < h {
                self.sample(x as usize, y as usize, channel) as f32
            } else {
                0.0
            }
        };

        at(x0, y0) * (1.0 - fx) * (1.0 - fy)
            + at(x0 + 1, y0) * fx * (1.0 - fy)
            + at(x0, y0 + 1) * (1.0 - fx) * fy
            + at(x0 + 1, y0 + 1) * fx * fy
    }

    /// Bilinear sample with coordinates clamped to the image edge.
    pub fn sample_clamped(&self, sx: f32, sy: f32, channel: usize) -> f32 {
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        self.sample_bilinear(sx.clamp(0.0, max_x), sy.clamp(0.0, max_y), channel)
    }
}

/// A face region reported by the detector, in source image pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
}

/// Point layouts a landmark model may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LandmarkLayout {
    /// left eye, right eye, nose tip, left mouth corner, right mouth corner
    Five,
    /// iBUG 300-W markup
    SixtyEight,
}

impl LandmarkLayout {
    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            5 => Some(Self::Five),
            68 => Some(Self::SixtyEight),
            _ => None,
        }
    }

    pub fn count(self) -> usize {
        match self {
            Self::Five => 5,
            Self::SixtyEight => 68,
        }
    }
}

/// Landmarks for one face. Construction validates the point count against a
/// known layout, so the five alignment points are always available.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    layout: LandmarkLayout,
    points: Vec<(f32, f32)>,
}

impl LandmarkSet {
    pub fn new(points: Vec<(f32, f32)>) -> Option<Self> {
        let layout = LandmarkLayout::from_count(points.len())?;
        Some(Self { layout, points })
    }

    pub fn layout(&self) -> LandmarkLayout {
        self.layout
    }

    pub fn points(&self) -> &[(f32, f32)] {
        &self.points
    }

    /// The five points used for face alignment, in image-left to image-right order.
    pub fn alignment_points(&self) -> [(f32, f32); 5] {
        match self.layout {
            LandmarkLayout::Five => [
                self.points[0],
                self.points[1],
                self.points[2],
                self.points[3],
                self.points[4],
            ],
            LandmarkLayout::SixtyEight => [
                mean_point(&self.points[36..42]),
                mean_point(&self.points[42..48]),
                self.points[30],
                self.points[48],
                self.points[54],
            ],
        }
    }
}

fn mean_point(points: &[(f32, f32)]) -> (f32, f32) {
    let n = points.len() as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
    (sx / n, sy / n)
}

/// Fingerprint of the feature model that produced an embedding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelGeneration(pub String);

/// Face embedding produced by the feature model (L2-normalized).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f32>,
    pub generation: ModelGeneration,
}

impl FeatureVector {
    /// Similarity score in [0, 1]: cosine similarity with negatives clamped to 0.
    ///
    /// Always processes all dimensions. Both vectors must come from the same
    /// model generation and have the same length.
    pub fn similarity(&self, other: &FeatureVector) -> f32 {
        debug_assert_eq!(self.values.len(), other.values.len());
        debug_assert_eq!(self.generation, other.generation);

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        let cosine = if denom > 0.0 { dot / denom } else { 0.0 };
        cosine.clamp(0.0, 1.0)
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// An enrolled person as held by the storage collaborator. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    /// Identity key (the kiosk's work id).
    pub key: String,
    pub display_name: String,
    pub image_path: PathBuf,
}

/// Why an input could not be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputFault {
    /// Missing, empty or undecodable image file.
    Unreadable { path: PathBuf, reason: String },
    /// Decoded, but no face at or above the minimum confidence.
    NoFace { path: Option<PathBuf> },
}

impl std::fmt::Display for InputFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreadable { path, reason } => {
                write!(f, "image unreadable: {} ({reason})", path.display())
            }
            Self::NoFace { path: Some(path) } => {
                write!(f, "no face detected: {}", path.display())
            }
            Self::NoFace { path: None } => write!(f, "no face detected"),
        }
    }
}

/// Result of a public engine operation.
///
/// `NotReady` (models could not be loaded) and `InputInvalid` are kept apart
/// from a decided negative so callers cannot conflate them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome<T> {
    Ready(T),
    NotReady,
    InputInvalid(InputFault),
}

impl<T> Outcome<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady)
    }

    pub fn fault(&self) -> Option<&InputFault> {
        match self {
            Self::InputInvalid(fault) => Some(fault),
            _ => None,
        }
    }
}

/// 1:1 decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub accepted: bool,
    pub score: f32,
}

impl Outcome<Verification> {
    /// Fail-closed: only a ready, accepted verification counts.
    pub fn accepted(&self) -> bool {
        self.ready().is_some_and(|v| v.accepted)
    }

    pub fn score(&self) -> f32 {
        self.ready().map_or(0.0, |v| v.score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedIdentity {
    pub key: String,
    pub display_name: String,
}

/// 1:N decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub matched: Option<MatchedIdentity>,
    /// Best score seen during the scan (0 when nothing was compared).
    pub score: f32,
    /// Number of candidates whose reference image went through the pipeline.
    pub compared: usize,
    /// Whether the scan stopped at the high-confidence cutover.
    pub early_exit: bool,
}

impl Outcome<Identification> {
    /// Fail-closed: the matched identity only for a ready, accepted result.
    pub fn matched(&self) -> Option<&MatchedIdentity> {
        self.ready().and_then(|i| i.matched.as_ref())
    }

    pub fn score(&self) -> f32 {
        self.ready().map_or(0.0, |i| i.score)
    }
}

/// Live framing feedback for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacePosition {
    pub present: bool,
    pub face: Option<DetectedFace>,
    pub image_width: u32,
    pub image_height: u32,
}
