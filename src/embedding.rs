//! Embedding vectors and the vector math shared by matching and enrollment
//!
//! Embeddings come from an external provider (face or speaker model). This
//! module only defines how they are tagged, normalized and compared.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Norms below this are treated as zero (no direction)
pub const NORM_EPSILON: f32 = 1e-6;

/// Biometric factor an embedding or template belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Face,
    Voice,
}

impl Modality {
    pub const ALL: [Modality; 2] = [Modality::Face, Modality::Voice];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Face => "face",
            Modality::Voice => "voice",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "face" => Some(Modality::Face),
            "voice" => Some(Modality::Voice),
            _ => None,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live or enrollment-time feature vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub modality: Modality,
    pub vector: Vec<f32>,
    pub captured_at: DateTime<Utc>,
    /// Provider-reported signal quality in [0, 1]
    #[serde(default = "default_quality")]
    pub quality: f32,
}

fn default_quality() -> f32 {
    1.0
}

impl Embedding {
    pub fn new(modality: Modality, vector: Vec<f32>) -> Self {
        Self {
            modality,
            vector,
            captured_at: Utc::now(),
            quality: default_quality(),
        }
    }

    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality;
        self
    }

    pub fn captured_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.captured_at = timestamp;
        self
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }
}

/// External model that turns one raw input (image region, audio clip) into a
/// fixed-length vector. `None` signals a detection failure or too little signal.
pub trait EmbeddingProvider<I: ?Sized>: Send + Sync {
    fn modality(&self) -> Modality;

    fn embed(&self, input: &I) -> Option<Vec<f32>>;
}

/// Euclidean length of a vector
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Unit-length copy of `v`, or `None` if it has no direction
pub fn normalize(v: &[f32]) -> Option<Vec<f32>> {
    let norm = l2_norm(v);
    if norm < NORM_EPSILON || !norm.is_finite() {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

/// Cosine similarity of two vectors.
///
/// Mismatched lengths and zero-norm inputs yield 0.0 rather than NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a < NORM_EPSILON || norm_b < NORM_EPSILON {
        return 0.0;
    }

    let score = dot_product / (norm_a * norm_b);
    if score.is_finite() {
        score.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Element-wise mean of equally sized vectors
pub fn mean(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let dim = vectors.first()?.len();
    if vectors.iter().any(|v| v.len() != dim) {
        return None;
    }

    let mut avg = vec![0.0f32; dim];
    for vector in vectors {
        for (i, &val) in vector.iter().enumerate() {
            avg[i] += val;
        }
    }

    let count = vectors.len() as f32;
    for val in avg.iter_mut() {
        *val /= count;
    }

    Some(avg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.001);

        let a = vec![1.0, 1.0];
        let b = vec![-1.0, -1.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_zero_norm_similarity_is_zero() {
        let zero = vec![0.0; 4];
        let v = vec![0.5, 0.5, 0.5, 0.5];
        assert_eq!(cosine_similarity(&zero, &v), 0.0);
        assert_eq!(cosine_similarity(&v, &zero), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero), 0.0);
    }

    #[test]
    fn test_length_mismatch_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_normalize() {
        let unit = normalize(&[3.0, 4.0]).unwrap();
        assert!((l2_norm(&unit) - 1.0).abs() < 0.001);
        assert!((unit[0] - 0.6).abs() < 0.001);
        assert!(normalize(&[0.0, 0.0]).is_none());
    }

    #[test]
    fn test_mean() {
        let vectors = vec![
            vec![1.0, 2.0, 3.0],
            vec![2.0, 3.0, 4.0],
            vec![3.0, 4.0, 5.0],
        ];
        assert_eq!(mean(&vectors).unwrap(), vec![2.0, 3.0, 4.0]);
        assert!(mean(&[]).is_none());
        assert!(mean(&[vec![1.0], vec![1.0, 2.0]]).is_none());
    }

    #[test]
    fn test_modality_parse() {
        assert_eq!(Modality::from_str("Face"), Some(Modality::Face));
        assert_eq!(Modality::from_str("voice"), Some(Modality::Voice));
        assert_eq!(Modality::from_str("iris"), None);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn similarity_is_bounded(
            a in proptest::collection::vec(-100.0f32..100.0, 8),
            b in proptest::collection::vec(-100.0f32..100.0, 8),
        ) {
            let s = cosine_similarity(&a, &b);
            prop_assert!(s.is_finite());
            prop_assert!((-1.0..=1.0).contains(&s));
        }

        #[test]
        fn zero_vector_never_faults(b in proptest::collection::vec(any::<f32>(), 1..16)) {
            let zero = vec![0.0f32; b.len()];
            prop_assert_eq!(cosine_similarity(&zero, &b), 0.0);
        }
    }
}
