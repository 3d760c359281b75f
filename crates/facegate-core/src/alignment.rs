//! Face alignment via 4-DOF similarity transform.
//!
//! Maps the five alignment points of a [`LandmarkSet`] onto the ArcFace
//! reference positions and warps the face into a 112×112 crop.

use crate::types::{LandmarkSet, PixelBuffer};

/// ArcFace reference landmarks for a 112×112 output.
pub const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// `dst = [a -b; b a] * src + [tx, ty]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl SimilarityTransform {
    /// Closed-form least-squares estimate from point correspondences.
    ///
    /// Degenerate input (all source points coincident) yields the identity.
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut num_a = 0.0f32;
        let mut num_b = 0.0f32;
        let mut denom = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            num_a += sx * dx + sy * dy;
            num_b += sx * dy - sy * dx;
            denom += sx * sx + sy * sy;
        }

        if denom < 1e-12 {
            return Self::identity();
        }

        let a = num_a / denom;
        let b = num_b / denom;
        Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        }
    }

    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Map an output coordinate back to the source image.
    fn invert(&self, (x, y): (f32, f32)) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Warp `image` through `transform` into a square RGB crop. Uses bilinear
/// interpolation; out-of-bounds pixels are black. `None` when `out_size` is 0.
pub fn warp(
    image: &PixelBuffer,
    transform: &SimilarityTransform,
    out_size: u32,
) -> Option<PixelBuffer> {
    let size = out_size as usize;
    let mut data = vec![0u8; size * size * 3];

    for oy in 0..size {
        for ox in 0..size {
            let Some((sx, sy)) = transform.invert((ox as f32, oy as f32)) else {
                continue;
            };
            let base = (oy * size + ox) * 3;
            for c in 0..3 {
                data[base + c] = image.sample_bilinear(sx, sy, c).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    PixelBuffer::new(out_size, out_size, 3, data)
}

/// Align a face to the canonical 112×112 ArcFace crop.
pub fn align_face(image: &PixelBuffer, landmarks: &LandmarkSet) -> Option<PixelBuffer> {
    let transform =
        SimilarityTransform::estimate(&landmarks.alignment_points(), &REFERENCE_LANDMARKS_112);
    warp(image, &transform, ALIGNED_SIZE)
}
