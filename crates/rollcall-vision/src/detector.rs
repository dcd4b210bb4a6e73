//! SCRFD face localization via ONNX Runtime.
//!
//! A frame is letterboxed into the 640x640 model input, each of the three
//! stride heads is decoded into boxes with five landmarks, and overlapping
//! boxes are suppressed. Coordinates come back in frame pixels.

use crate::encoder::EncoderError;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_OVERLAP_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [u32; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Output positions of one stride head: (scores, boxes, landmarks).
type HeadOutputs = (usize, usize, usize);

const POSITIONAL_HEADS: [HeadOutputs; 3] = [(0, 3, 6), (1, 4, 7), (2, 5, 8)];

/// A located face in frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Left eye, right eye, nose, left mouth corner, right mouth corner.
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union.
    pub fn overlap(&self, other: &FaceBox) -> f32 {
        let ix = (self.x + self.width).min(other.x + other.width) - self.x.max(other.x);
        let iy = (self.y + self.height).min(other.y + other.height) - self.y.max(other.y);
        let inter = ix.max(0.0) * iy.max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Finds faces in a frame. Results are ordered by descending confidence.
pub trait FaceLocator {
    fn locate(&mut self, image: &GrayImage) -> Result<Vec<FaceBox>, EncoderError>;
}

/// Scale and padding applied when fitting a frame into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> (Self, u32, u32) {
        let side = SCRFD_INPUT_SIZE as f32;
        let scale = (side / width as f32).min(side / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let letterbox = Self {
            scale,
            pad_x: ((SCRFD_INPUT_SIZE - new_w) / 2) as f32,
            pad_y: ((SCRFD_INPUT_SIZE - new_h) / 2) as f32,
        };
        (letterbox, new_w, new_h)
    }

    /// Map a point in model input space back to the frame.
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

pub struct ScrfdDetector {
    session: Session,
    heads: [HeadOutputs; 3],
}

impl ScrfdDetector {
    pub fn load(model_path: &Path) -> Result<Self, EncoderError> {
        if !model_path.exists() {
            return Err(EncoderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(EncoderError::InferenceFailed(format!(
                "SCRFD model needs 9 outputs (score, bbox and kps per stride), found {}",
                names.len()
            )));
        }

        let heads = head_outputs(&names);
        tracing::info!(path = %model_path.display(), ?heads, "loaded SCRFD model");

        Ok(Self { session, heads })
    }

    fn preprocess(image: &GrayImage) -> (Array4<f32>, Letterbox) {
        let (letterbox, new_w, new_h) = Letterbox::fit(image.width(), image.height());
        let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

        // Zero is the normalized value of SCRFD_MEAN, so padding needs no fill.
        let side = SCRFD_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        let (off_x, off_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);

        for (x, y, pixel) in resized.enumerate_pixels() {
            let value = (pixel.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
            let (tx, ty) = (x as usize + off_x, y as usize + off_y);
            for channel in 0..3 {
                tensor[[0, channel, ty, tx]] = value;
            }
        }

        (tensor, letterbox)
    }
}

impl FaceLocator for ScrfdDetector {
    fn locate(&mut self, image: &GrayImage) -> Result<Vec<FaceBox>, EncoderError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = Self::preprocess(image);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in SCRFD_STRIDES.iter().zip(self.heads.iter()) {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| EncoderError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let head = HeadData {
                scores: extract(score_idx, "scores")?,
                boxes: extract(bbox_idx, "boxes")?,
                landmarks: extract(kps_idx, "landmarks")?,
            };
            candidates.extend(decode_head(&head, stride, &letterbox, SCRFD_CONFIDENCE_THRESHOLD));
        }

        let faces = suppress_overlaps(candidates, SCRFD_OVERLAP_THRESHOLD);
        tracing::debug!(faces = faces.len(), "faces located");
        Ok(faces)
    }
}

/// Map stride heads to output positions by name (`score_8`, `bbox_16`, ...),
/// falling back to the standard positional layout.
fn head_outputs(names: &[String]) -> [HeadOutputs; 3] {
    let position = |kind: &str, stride: u32| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let named: Option<Vec<HeadOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((position("score", s)?, position("bbox", s)?, position("kps", s)?)))
        .collect();

    match named {
        Some(heads) => [heads[0], heads[1], heads[2]],
        None => POSITIONAL_HEADS,
    }
}

/// Raw tensors of one stride head.
struct HeadData<'a> {
    scores: &'a [f32],
    boxes: &'a [f32],
    landmarks: &'a [f32],
}

fn decode_head(head: &HeadData<'_>, stride: u32, letterbox: &Letterbox, threshold: f32) -> Vec<FaceBox> {
    let grid = (SCRFD_INPUT_SIZE / stride) as usize;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    head.scores
        .iter()
        .take(anchors)
        .enumerate()
        .filter(|&(_, &score)| score > threshold)
        .filter_map(|(idx, &score)| {
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * step;
            let cy = (cell / grid) as f32 * step;

            let d = head.boxes.get(idx * 4..idx * 4 + 4)?;
            let (x1, y1) = letterbox.to_frame(cx - d[0] * step, cy - d[1] * step);
            let (x2, y2) = letterbox.to_frame(cx + d[2] * step, cy + d[3] * step);

            let landmarks = head.landmarks.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.to_frame(cx + k[i * 2] * step, cy + k[i * 2 + 1] * step))
            });

            Some(FaceBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Keep the most confident box of every overlapping group.
fn suppress_overlaps(mut faces: Vec<FaceBox>, max_overlap: f32) -> Vec<FaceBox> {
    faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<FaceBox> = Vec::with_capacity(faces.len());
    for face in faces {
        if kept.iter().all(|k| k.overlap(&face) <= max_overlap) {
            kept.push(face);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> FaceBox {
        FaceBox {
            x,
            y,
            width: w,
            height: h,
            confidence,
            landmarks: None,
        }
    }

    #[test]
    fn test_overlap() {
        let a = face(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((a.overlap(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.overlap(&face(20.0, 20.0, 10.0, 10.0, 1.0)), 0.0);
        // 5x10 shared out of 150.
        let b = face(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((a.overlap(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_suppression_keeps_separate_faces() {
        let faces = vec![
            face(5.0, 5.0, 100.0, 100.0, 0.8),
            face(300.0, 40.0, 60.0, 60.0, 0.7),
            face(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let kept = suppress_overlaps(faces, SCRFD_OVERLAP_THRESHOLD);
        let confidences: Vec<f32> = kept.iter().map(|f| f.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
        assert!(suppress_overlaps(Vec::new(), 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_maps_back_to_frame() {
        let (lb, new_w, new_h) = Letterbox::fit(640, 480);
        assert_eq!((new_w, new_h), (640, 480));
        assert_eq!(lb.pad_y, 80.0);
        let (x, y) = lb.to_frame(100.0, 80.0 + 50.0);
        assert!((x - 100.0).abs() < 1e-4 && (y - 50.0).abs() < 1e-4);

        let (lb, new_w, new_h) = Letterbox::fit(320, 240);
        assert_eq!((new_w, new_h), (640, 480));
        let (x, y) = lb.to_frame(200.0, 80.0 + 100.0);
        assert!((x - 100.0).abs() < 1e-4 && (y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let image = GrayImage::from_pixel(640, 480, image::Luma([255]));
        let (tensor, _) = ScrfdDetector::preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(tensor[[0, 0, 10, 10]], 0.0);
        assert!((tensor[[0, 2, 320, 320]] - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-6);
    }

    #[test]
    fn test_decode_head_one_anchor() {
        // Stride 32 grid is 20x20; anchor 2*(1*20 + 3) sits at cell (3, 1).
        let stride = 32u32;
        let anchors = 20 * 20 * SCRFD_ANCHORS_PER_CELL;
        let idx = 2 * (20 + 3);
        let mut scores = vec![0.1f32; anchors];
        scores[idx] = 0.9;
        let mut boxes = vec![0.0f32; anchors * 4];
        boxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        let landmarks = vec![0.0f32; anchors * 10];

        let lb = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let head = HeadData {
            scores: &scores,
            boxes: &boxes,
            landmarks: &landmarks,
        };
        let faces = decode_head(&head, stride, &lb, 0.5);
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        assert_eq!((f.x, f.y, f.width, f.height), (64.0, 0.0, 64.0, 64.0));
        assert_eq!(f.landmarks.unwrap()[0], (96.0, 32.0));
    }

    #[test]
    fn test_head_outputs_by_name() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(head_outputs(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_head_outputs_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i| format!("{}", 400 + i)).collect();
        assert_eq!(head_outputs(&names), POSITIONAL_HEADS);
    }

    #[test]
    fn test_load_missing_model() {
        let err = ScrfdDetector::load(Path::new("/nonexistent/det_10g.onnx")).err().unwrap();
        assert!(matches!(err, EncoderError::ModelNotFound(_)));
    }
}
