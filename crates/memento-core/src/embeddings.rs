//! Embedding vectors and their storage codec.
//!
//! Vectors arrive from the inference server as f32 and are persisted as
//! little-endian packed IEEE-754 f64 (`len == dimension * 8` exactly).
//! Conversions round-trip through f32 explicitly so a stored vector decodes
//! to the same f32 values search computes with.

use serde::{Deserialize, Serialize};

/// A stored embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Embedding {
    /// The vector, little-endian f64 on disk
    pub vector: Vec<f64>,
    pub dimension: usize,
    /// Model that produced the vector
    pub model: String,
}

impl Embedding {
    pub fn new(vector: Vec<f64>, model: impl Into<String>) -> Self {
        let dimension = vector.len();
        Self {
            vector,
            dimension,
            model: model.into(),
        }
    }

    /// Build from the f32 wire representation.
    pub fn from_f32(vector: &[f32], model: impl Into<String>) -> Self {
        Self::new(vector.iter().map(|v| *v as f64).collect(), model)
    }

    /// Explicit round-trip back to the f32 search representation.
    pub fn to_f32(&self) -> Vec<f32> {
        self.vector.iter().map(|v| *v as f32).collect()
    }

    /// Serialize to the on-disk blob.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.vector.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Decode from the on-disk blob. Returns `None` when the blob length is
    /// not a multiple of 8.
    pub fn from_bytes(bytes: &[u8], model: impl Into<String>) -> Option<Self> {
        if bytes.len() % 8 != 0 {
            return None;
        }
        let vector: Vec<f64> = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                f64::from_le_bytes(buf)
            })
            .collect();
        Some(Self::new(vector, model))
    }
}

/// Cosine similarity in [-1, 1]; 0.0 for mismatched or zero-norm inputs.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Cosine distance (`1 - similarity`), the vector-search sort key.
pub fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    1.0 - cosine_similarity(a, b)
}
