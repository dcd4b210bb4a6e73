//! Trained gallery: labelled embeddings and their on-disk JSON form.
//!
//! The file holds two parallel arrays, `vectors` and `labels`; entry `i`
//! of one belongs to entry `i` of the other.

use crate::types::{Embedding, GalleryEntry, MatchResult, Matcher};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery file not found: {0}; run `rollcall train` first")]
    NotFound(String),
    #[error("gallery has {vectors} vectors but {labels} labels")]
    LengthMismatch { vectors: usize, labels: usize },
    #[error("gallery vector {index} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct GalleryFile {
    vectors: Vec<Vec<f32>>,
    labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_version: Option<String>,
}

/// Ordered collection of enrolled embeddings.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: impl Into<String>, embedding: Embedding) {
        self.entries.push(GalleryEntry {
            label: label.into(),
            embedding,
        });
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct labels.
    pub fn label_count(&self) -> usize {
        let mut labels: Vec<&str> = self.entries.iter().map(|e| e.label.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        labels.len()
    }

    /// Run `matcher` against every entry of this gallery.
    pub fn identify(&self, matcher: &dyn Matcher, probe: &Embedding, tolerance: f32) -> MatchResult {
        matcher.compare(probe, &self.entries, tolerance)
    }

    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        if !path.exists() {
            return Err(GalleryError::NotFound(path.display().to_string()));
        }
        let file: GalleryFile = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        Self::from_file(file)
    }

    pub fn save(&self, path: &Path) -> Result<(), GalleryError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &self.to_file())?;
        writer.flush()?;
        Ok(())
    }

    fn from_file(file: GalleryFile) -> Result<Self, GalleryError> {
        if file.vectors.len() != file.labels.len() {
            return Err(GalleryError::LengthMismatch {
                vectors: file.vectors.len(),
                labels: file.labels.len(),
            });
        }
        if let Some(expected) = file.vectors.first().map(Vec::len) {
            if let Some((index, v)) = file
                .vectors
                .iter()
                .enumerate()
                .find(|(_, v)| v.len() != expected)
            {
                return Err(GalleryError::DimensionMismatch {
                    index,
                    expected,
                    actual: v.len(),
                });
            }
        }

        let entries = file
            .vectors
            .into_iter()
            .zip(file.labels)
            .map(|(values, label)| GalleryEntry {
                label,
                embedding: Embedding {
                    values,
                    model_version: file.model_version.clone(),
                },
            })
            .collect();
        Ok(Self { entries })
    }

    fn to_file(&self) -> GalleryFile {
        GalleryFile {
            vectors: self.entries.iter().map(|e| e.embedding.values.clone()).collect(),
            labels: self.entries.iter().map(|e| e.label.clone()).collect(),
            model_version: self
                .entries
                .iter()
                .find_map(|e| e.embedding.model_version.clone()),
        }
    }
}
