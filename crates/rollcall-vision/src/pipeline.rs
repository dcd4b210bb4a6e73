//! Whole-frame encoding: locate every face, crop it, embed the crop.

use crate::alignment::crop_face;
use crate::detector::FaceLocator;
use crate::encoder::{EncoderError, FaceEncoder};
use image::GrayImage;
use rollcall_core::Embedding;

pub struct FacePipeline<L, E> {
    locator: L,
    encoder: E,
}

impl<L: FaceLocator, E: FaceEncoder> FacePipeline<L, E> {
    pub fn new(locator: L, encoder: E) -> Self {
        Self { locator, encoder }
    }
}

impl<L: FaceLocator, E: FaceEncoder> FaceEncoder for FacePipeline<L, E> {
    /// One embedding per located face, in detection order. A frame with no
    /// face yields nothing.
    fn encode(&mut self, image: &GrayImage) -> Result<Vec<Embedding>, EncoderError> {
        let faces = self.locator.locate(image)?;
        let mut embeddings = Vec::with_capacity(faces.len());

        for face in &faces {
            let Some(crop) = crop_face(image, face) else {
                tracing::debug!(x = face.x, y = face.y, "face box off screen; skipping");
                continue;
            };
            embeddings.extend(self.encoder.encode(&crop)?);
        }

        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::FaceBox;
    use image::Luma;

    /// Reports fixed boxes regardless of the image.
    struct FixedLocator(Vec<FaceBox>);

    impl FaceLocator for FixedLocator {
        fn locate(&mut self, _image: &GrayImage) -> Result<Vec<FaceBox>, EncoderError> {
            Ok(self.0.clone())
        }
    }

    /// Encodes a crop as its top-left pixel value.
    struct CornerEncoder;

    impl FaceEncoder for CornerEncoder {
        fn encode(&mut self, image: &GrayImage) -> Result<Vec<Embedding>, EncoderError> {
            Ok(vec![Embedding::new(vec![image.get_pixel(0, 0).0[0] as f32])])
        }
    }

    fn boxed(x: f32, y: f32) -> FaceBox {
        FaceBox {
            x,
            y,
            width: 20.0,
            height: 20.0,
            confidence: 0.9,
            landmarks: None,
        }
    }

    fn classroom() -> GrayImage {
        // Left half 60, right half 200.
        GrayImage::from_fn(200, 100, |x, _| Luma([if x < 100 { 60 } else { 200 }]))
    }

    #[test]
    fn test_every_face_in_frame_is_encoded() {
        let locator = FixedLocator(vec![boxed(10.0, 10.0), boxed(150.0, 40.0)]);
        let mut pipeline = FacePipeline::new(locator, CornerEncoder);
        let embeddings = pipeline.encode(&classroom()).unwrap();
        let values: Vec<f32> = embeddings.iter().map(|e| e.values[0]).collect();
        assert_eq!(values, vec![60.0, 200.0]);
    }

    #[test]
    fn test_frame_without_faces_yields_nothing() {
        let mut pipeline = FacePipeline::new(FixedLocator(Vec::new()), CornerEncoder);
        assert!(pipeline.encode(&classroom()).unwrap().is_empty());
    }

    #[test]
    fn test_off_screen_box_is_skipped() {
        let locator = FixedLocator(vec![boxed(500.0, 500.0), boxed(10.0, 10.0)]);
        let mut pipeline = FacePipeline::new(locator, CornerEncoder);
        assert_eq!(pipeline.encode(&classroom()).unwrap().len(), 1);
    }
}
