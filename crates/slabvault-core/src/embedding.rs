//! Embedding capabilities and vector utilities.
//!
//! Two embedders feed the two modalities of the retrieval engine:
//! [`TextEmbedder`] turns the descriptive attribute text into a vector for
//! the text index, [`ImageEmbedder`] turns raw image bytes into a vector for
//! the image index. Both are opaque services; concrete HTTP providers live
//! in the application crate.
//!
//! The free functions here are pure helpers shared by every index backend.

use anyhow::Result;
use async_trait::async_trait;

/// Text-oriented embedding capability (modality A).
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Model identifier, for logs and diagnostics.
    fn model_name(&self) -> &str;
    /// Length of every vector this embedder returns.
    fn dims(&self) -> usize;
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}

/// Image-oriented embedding capability (modality B).
#[async_trait]
pub trait ImageEmbedder: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    async fn embed_image(&self, image: &[u8], content_type: &str) -> Result<Vec<f32>>;
}

/// Encode a vector as little-endian `f32` bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a BLOB written by [`vec_to_blob`]. Trailing bytes that do not
/// form a whole `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, and
/// zero-magnitude vectors (so a zero query vector scores everything 0).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }
    dot / denom
}
