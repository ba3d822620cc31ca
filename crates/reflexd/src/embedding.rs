//! Embedding function for semantic cache queries.
//!
//! A deterministic feature-hash embedder: lowercase alphanumeric tokens
//! plus adjacent bigrams are hashed into a fixed 384-dimension vector
//! (the dimension of the MiniLM space the store was originally built
//! around), then L2-normalized. Pure and stateless; the same text always
//! produces the same vector.

use sha2::{Digest, Sha256};

/// Fixed embedding dimension.
pub const EMBEDDING_DIM: usize = 384;

/// Embed text into a normalized `EMBEDDING_DIM` vector.
pub fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];

    let tokens = tokenize(text);
    for token in &tokens {
        accumulate(&mut vector, token);
    }
    for pair in tokens.windows(2) {
        accumulate(&mut vector, &format!("{} {}", pair[0], pair[1]));
    }

    normalize(&mut vector);
    vector
}

/// Lowercase alphanumeric tokenization.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Hash a feature into a bucket and sign, and accumulate it.
fn accumulate(vector: &mut [f32], feature: &str) {
    let digest = Sha256::digest(feature.as_bytes());
    let bucket = u64::from_le_bytes(digest[0..8].try_into().unwrap_or_default());
    let index = (bucket % EMBEDDING_DIM as u64) as usize;
    let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
    vector[index] += sign;
}

/// L2-normalize in place; the zero vector is left as-is.
fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched dimensions or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Serialize an embedding as little-endian f32 bytes for storage.
pub fn to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize an embedding from little-endian f32 bytes.
pub fn from_blob(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
