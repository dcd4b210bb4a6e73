//! rollcall-vision: Face embeddings for enrollment training and live matching.
//!
//! The rest of the system only sees [`FaceEncoder`]: an image goes in, zero or
//! more fixed-length embeddings come out. [`FacePipeline`] handles camera
//! frames by locating faces with [`ScrfdDetector`] before embedding each crop.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod pipeline;
pub mod training;

pub use alignment::{align_face, crop_face, ALIGNED_SIZE};
pub use detector::{FaceBox, FaceLocator, ScrfdDetector};
pub use encoder::{arcface_tolerance, cosine_to_distance, ArcFaceEncoder, EncoderError, FaceEncoder, ARCFACE_MATCH_COSINE};
pub use pipeline::FacePipeline;
pub use training::{train_gallery, TrainingError, TrainingReport};
