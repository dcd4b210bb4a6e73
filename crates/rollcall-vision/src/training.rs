//! Build a gallery from the enrollment dataset.
//!
//! Layout: `<dataset>/<id>/<image>`. Every subdirectory name is a label and
//! every decodable image inside it contributes its first embedding. Images
//! are the face crops written by enrollment, so the encoder sees them as-is.

use crate::encoder::FaceEncoder;
use rollcall_core::Gallery;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("dataset directory not found: {0}")]
    DatasetNotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Default)]
pub struct TrainingReport {
    pub gallery: Gallery,
    /// Images that could not be decoded or held no face.
    pub skipped: Vec<PathBuf>,
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut paths = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    paths.sort();
    Ok(paths)
}

/// Encode every enrollment image under `dataset` in sorted order.
pub fn train_gallery(
    dataset: &Path,
    encoder: &mut dyn FaceEncoder,
) -> Result<TrainingReport, TrainingError> {
    if !dataset.is_dir() {
        return Err(TrainingError::DatasetNotFound(dataset.display().to_string()));
    }

    let mut report = TrainingReport::default();

    for student_dir in sorted_entries(dataset)? {
        if !student_dir.is_dir() {
            continue;
        }
        let Some(label) = student_dir.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!(path = %student_dir.display(), "skipping non-UTF-8 directory name");
            continue;
        };
        tracing::info!(label, "processing student");

        for image_path in sorted_entries(&student_dir)? {
            if !image_path.is_file() {
                continue;
            }

            let image = match image::open(&image_path) {
                Ok(img) => img.to_luma8(),
                Err(e) => {
                    tracing::warn!(path = %image_path.display(), error = %e, "could not decode image; skipping");
                    report.skipped.push(image_path);
                    continue;
                }
            };

            match encoder.encode(&image) {
                Ok(embeddings) => match embeddings.into_iter().next() {
                    Some(embedding) => report.gallery.push(label, embedding),
                    None => {
                        tracing::warn!(path = %image_path.display(), "no face found in image; skipping");
                        report.skipped.push(image_path);
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %image_path.display(), error = %e, "encoding failed; skipping");
                    report.skipped.push(image_path);
                }
            }
        }
    }

    tracing::info!(
        faces = report.gallery.len(),
        labels = report.gallery.label_count(),
        skipped = report.skipped.len(),
        "training complete"
    );
    Ok(report)
}
