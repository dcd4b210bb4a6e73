use serde::{Deserialize, Serialize};
use std::fmt;

/// Face feature vector produced by the external encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Whether two embeddings live in the same feature space: same length,
    /// and the same model when both record one.
    pub fn is_comparable(&self, other: &Embedding) -> bool {
        if self.values.len() != other.values.len() {
            return false;
        }
        match (&self.model_version, &other.model_version) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Euclidean distance, or `None` when the lengths differ.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        let sum = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>();
        Some(sum.sqrt())
    }
}

/// One enrolled vector. A label appears once per enrollment image.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub label: String,
    pub embedding: Embedding,
}

/// Outcome of an identity decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    pub fn label(&self) -> Option<&str> {
        match self {
            Identity::Known(label) => Some(label.as_str()),
            Identity::Unknown => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Known(label) => f.write_str(label),
            Identity::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub identity: Identity,
    /// Distance to the globally nearest gallery entry, `None` for an empty gallery.
    pub distance: Option<f32>,
    /// Gallery position of the nearest entry, whether or not it was accepted.
    pub nearest_index: Option<usize>,
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self.identity, Identity::Known(_))
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], tolerance: f32) -> MatchResult;
}

/// Nearest-neighbour-then-threshold matcher over Euclidean distance.
///
/// The globally nearest entry is found first (first occurrence wins ties) and
/// only that entry is tested against the tolerance. Another entry inside the
/// tolerance never rescues a nearest entry that falls outside it.
///
/// Entries that are not [comparable](Embedding::is_comparable) with the probe
/// are ignored; a probe comparable with nothing is Unknown.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry], tolerance: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        let mut skipped = 0usize;

        for (i, entry) in gallery.iter().enumerate() {
            if !probe.is_comparable(&entry.embedding) {
                skipped += 1;
                continue;
            }
            let Some(dist) = probe.euclidean_distance(&entry.embedding) else {
                continue;
            };
            // Strict comparison keeps the first of equal distances; NaN never wins.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        if skipped > 0 {
            tracing::debug!(
                skipped,
                probe_dim = probe.dim(),
                probe_model = ?probe.model_version,
                "gallery entries from a different feature space were ignored"
            );
        }

        let identity = match best_idx {
            Some(idx) if best_dist <= tolerance => Identity::Known(gallery[idx].label.clone()),
            _ => Identity::Unknown,
        };

        MatchResult {
            identity,
            distance: best_idx.map(|_| best_dist),
            nearest_index: best_idx,
        }
    }
}
