//! Embedding Value Objects
//!
//! Face and body feature vectors used for identity resolution.
//! Face vectors are 512-dimensional (ArcFace-style), body vectors are
//! 2048-dimensional (person re-identification). Both are stored L2-normalized.

use serde::{Deserialize, Serialize};

/// Dimension of face embedding vectors.
pub const FACE_EMBEDDING_DIM: usize = 512;

/// Dimension of body (re-identification) embedding vectors.
pub const BODY_EMBEDDING_DIM: usize = 2048;

fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn normalize_in_place(values: &mut [f32]) {
    let magnitude = l2_norm(values);
    if magnitude > 0.0 {
        for v in values.iter_mut() {
            *v /= magnitude;
        }
    }
}

/// Cosine similarity between two equal-length vectors, clamped to [-1, 1].
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a = l2_norm(a);
    let mag_b = l2_norm(b);

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

/// A face embedding vector for facial recognition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceEmbedding {
    values: Vec<f32>,
}

impl FaceEmbedding {
    /// Creates a new face embedding.
    ///
    /// # Panics
    /// Panics if the vector length does not match FACE_EMBEDDING_DIM.
    pub fn new(values: Vec<f32>) -> Self {
        assert_eq!(
            values.len(),
            FACE_EMBEDDING_DIM,
            "Face embedding must have {} dimensions, got {}",
            FACE_EMBEDDING_DIM,
            values.len()
        );
        Self { values }
    }

    /// Creates an embedding from an untrusted vector, rejecting wrong dimensions.
    pub fn from_vec(values: Vec<f32>) -> Option<Self> {
        if values.len() != FACE_EMBEDDING_DIM {
            return None;
        }
        Some(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.values.clone()
    }

    /// Cosine similarity to another face embedding (range: -1 to 1).
    pub fn cosine_similarity(&self, other: &FaceEmbedding) -> f32 {
        cosine(&self.values, &other.values)
    }

    /// L2 norm of the vector.
    pub fn norm(&self) -> f32 {
        l2_norm(&self.values)
    }

    /// Returns an L2-normalized copy of this embedding.
    pub fn normalized(&self) -> Self {
        let mut values = self.values.clone();
        normalize_in_place(&mut values);
        Self { values }
    }
}

/// A body embedding vector for person re-identification.
///
/// Unlike faces, body signatures drift with clothing; they are only trusted
/// within the arbiter's cache window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyEmbedding {
    values: Vec<f32>,
}

impl BodyEmbedding {
    /// Creates a new body embedding.
    ///
    /// # Panics
    /// Panics if the vector length does not match BODY_EMBEDDING_DIM.
    pub fn new(values: Vec<f32>) -> Self {
        assert_eq!(
            values.len(),
            BODY_EMBEDDING_DIM,
            "Body embedding must have {} dimensions, got {}",
            BODY_EMBEDDING_DIM,
            values.len()
        );
        Self { values }
    }

    /// Creates an embedding from an untrusted vector, rejecting wrong dimensions.
    pub fn from_vec(values: Vec<f32>) -> Option<Self> {
        if values.len() != BODY_EMBEDDING_DIM {
            return None;
        }
        Some(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.values.clone()
    }

    /// Cosine similarity to another body embedding (range: -1 to 1).
    pub fn cosine_similarity(&self, other: &BodyEmbedding) -> f32 {
        cosine(&self.values, &other.values)
    }

    /// L2 norm of the vector.
    pub fn norm(&self) -> f32 {
        l2_norm(&self.values)
    }

    /// Returns an L2-normalized copy of this embedding.
    pub fn normalized(&self) -> Self {
        let mut values = self.values.clone();
        normalize_in_place(&mut values);
        Self { values }
    }
}

impl PartialEq for FaceEmbedding {
    fn eq(&self, other: &Self) -> bool {
        self.values
            .iter()
            .zip(other.values.iter())
            .all(|(a, b)| (a - b).abs() < f32::EPSILON)
    }
}

impl PartialEq for BodyEmbedding {
    fn eq(&self, other: &Self) -> bool {
        self.values
            .iter()
            .zip(other.values.iter())
            .all(|(a, b)| (a - b).abs() < f32::EPSILON)
    }
}
