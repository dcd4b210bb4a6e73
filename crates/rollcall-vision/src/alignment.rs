//! Face crops for the encoder.
//!
//! Faces with landmarks are warped onto the ArcFace reference layout with a
//! least-squares similarity transform (scale, rotation, translation). Faces
//! without landmarks are cut out along their box.

use crate::detector::FaceBox;
use image::imageops;
use image::{GrayImage, Luma};

/// ArcFace reference landmarks inside a 112x112 crop.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

pub const ALIGNED_SIZE: u32 = 112;

/// `dst = [a -b; b a] * src + t`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit; `None` when the source points coincide.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }
        if norm < 1e-6 {
            return None;
        }

        let (a, b) = (dot / norm, cross / norm);
        Some(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Source point that maps onto `(x, y)`.
    fn invert(&self, (x, y): (f32, f32)) -> (f32, f32) {
        let det = self.a * self.a + self.b * self.b;
        let (dx, dy) = (x - self.tx, y - self.ty);
        (
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        )
    }
}

/// Bilinear sample; pixels outside the image read as black.
fn sample(image: &GrayImage, x: f32, y: f32) -> f32 {
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let at = |px: f32, py: f32| -> f32 {
        if px < 0.0 || py < 0.0 || px >= image.width() as f32 || py >= image.height() as f32 {
            0.0
        } else {
            image.get_pixel(px as u32, py as u32).0[0] as f32
        }
    };
    at(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + at(x0 + 1.0, y0) * fx * (1.0 - fy)
        + at(x0, y0 + 1.0) * (1.0 - fx) * fy
        + at(x0 + 1.0, y0 + 1.0) * fx * fy
}

/// Warp the face with `landmarks` onto a 112x112 aligned crop.
pub fn align_face(image: &GrayImage, landmarks: &[(f32, f32); 5]) -> Option<GrayImage> {
    let transform = Similarity::fit(landmarks, &REFERENCE_LANDMARKS)?;
    Some(GrayImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        let (sx, sy) = transform.invert((ox as f32, oy as f32));
        Luma([sample(image, sx, sy).round().clamp(0.0, 255.0) as u8])
    }))
}

/// Crop for one located face: aligned when landmarks allow it, otherwise the
/// box clipped to the image. `None` when nothing of the box is on screen.
pub fn crop_face(image: &GrayImage, face: &FaceBox) -> Option<GrayImage> {
    if let Some(aligned) = face.landmarks.as_ref().and_then(|lm| align_face(image, lm)) {
        return Some(aligned);
    }

    let (w, h) = (image.width() as f32, image.height() as f32);
    let x0 = face.x.clamp(0.0, w).floor() as u32;
    let y0 = face.y.clamp(0.0, h).floor() as u32;
    let x1 = (face.x + face.width).clamp(0.0, w).ceil() as u32;
    let y1 = (face.y + face.height).clamp(0.0, h).ceil() as u32;
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image())
}
