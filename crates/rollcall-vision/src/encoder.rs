//! ArcFace embedding extraction via ONNX Runtime.
//!
//! [`ArcFaceEncoder`] treats its input as one face crop: an aligned 112x112
//! face from [`crate::alignment`], or a crop saved by enrollment. Whole
//! camera frames go through [`crate::FacePipeline`] instead, which locates
//! each face first.

use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::Embedding;
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

/// Cosine similarity at which two ArcFace embeddings count as one person.
pub const ARCFACE_MATCH_COSINE: f32 = 0.40;

/// Crops smaller than this on either side hold no usable face.
const MIN_FACE_SIDE: u32 = 32;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model file not found: {0}; download it from insightface into the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Image in, embeddings out, one per face found.
pub trait FaceEncoder {
    fn encode(&mut self, image: &GrayImage) -> Result<Vec<Embedding>, EncoderError>;
}

/// Euclidean distance between two unit vectors with the given cosine similarity.
///
/// ArcFace output is L2-normalized, so `d = sqrt(2 - 2 cos)`.
pub fn cosine_to_distance(cosine: f32) -> f32 {
    (2.0 - 2.0 * cosine.clamp(-1.0, 1.0)).sqrt()
}

/// Default match tolerance for ArcFace embeddings.
pub fn arcface_tolerance() -> f32 {
    cosine_to_distance(ARCFACE_MATCH_COSINE)
}

pub struct ArcFaceEncoder {
    session: Session,
}

impl ArcFaceEncoder {
    pub fn load(model_path: &Path) -> Result<Self, EncoderError> {
        if !model_path.exists() {
            return Err(EncoderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Resize a grayscale crop into a 1x3x112x112 tensor, replicating the
    /// luma channel into RGB.
    fn preprocess(image: &GrayImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE as usize;
        let resized = if image.dimensions() == (ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE) {
            image.clone()
        } else {
            imageops::resize(image, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, FilterType::Triangle)
        };
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in resized.enumerate_pixels() {
            let normalized = (pixel.0[0] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            let (x, y) = (x as usize, y as usize);
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }

        tensor
    }

    /// Embed one face crop.
    pub fn embed(&mut self, crop: &GrayImage) -> Result<Embedding, EncoderError> {
        let input = Self::preprocess(crop);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(EncoderError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw.to_vec()),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}

impl FaceEncoder for ArcFaceEncoder {
    fn encode(&mut self, image: &GrayImage) -> Result<Vec<Embedding>, EncoderError> {
        let (w, h) = image.dimensions();
        if w < MIN_FACE_SIDE || h < MIN_FACE_SIDE {
            tracing::debug!(width = w, height = h, "crop too small to hold a face");
            return Ok(Vec::new());
        }
        Ok(vec![self.embed(image)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{EuclideanMatcher, GalleryEntry, Matcher};

    #[test]
    fn test_preprocess_output_shape() {
        let image = GrayImage::from_pixel(200, 160, image::Luma([128]));
        let tensor = ArcFaceEncoder::preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_normalization_and_channels() {
        let image = GrayImage::from_pixel(112, 112, image::Luma([255]));
        let tensor = ArcFaceEncoder::preprocess(&image);
        let expected = (255.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 0, 50, 50]] - expected).abs() < 1e-6);
        assert_eq!(tensor[[0, 0, 7, 9]], tensor[[0, 1, 7, 9]]);
        assert_eq!(tensor[[0, 1, 7, 9]], tensor[[0, 2, 7, 9]]);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_cosine_to_distance() {
        assert!(cosine_to_distance(1.0).abs() < 1e-6);
        assert!((cosine_to_distance(0.0) - 2f32.sqrt()).abs() < 1e-6);
        assert!((arcface_tolerance() - 1.095_445).abs() < 1e-4);
    }

    #[test]
    fn test_same_person_pair_matches_at_default_tolerance() {
        // Two unit vectors at cos = 0.6 are a typical same-person ArcFace pair.
        let stored = Embedding::new(vec![1.0, 0.0]);
        let probe = Embedding::new(vec![0.6, 0.8]);
        let gallery = vec![GalleryEntry {
            label: "001".into(),
            embedding: stored,
        }];

        let result = EuclideanMatcher.compare(&probe, &gallery, arcface_tolerance());
        assert!(result.is_match());
        assert!((result.distance.unwrap() - 0.894_427).abs() < 1e-4);

        // Unit vectors below the cosine threshold stay Unknown.
        let stranger = Embedding::new(vec![0.0, 1.0]);
        assert!(!EuclideanMatcher.compare(&stranger, &gallery, arcface_tolerance()).is_match());
    }

    #[test]
    fn test_load_missing_model() {
        let err = ArcFaceEncoder::load(Path::new("/nonexistent/w600k_r50.onnx"))
            .err()
            .unwrap();
        assert!(matches!(err, EncoderError::ModelNotFound(_)));
        assert!(!err.to_string().contains('\u{2014}'));
    }
}
