// similarity.rs — Cosine similarity between pooled sentence vectors.
//
// Sentence vectors from the layered encoder are not normalized, so the norms are
// computed here. Accumulation is done in f64 and the result clamped to [-1, 1].

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimilarityError {
    #[error("cannot compare empty vectors")]
    Empty,
    #[error("vector length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("degenerate vector: zero or non-finite norm, cosine similarity is undefined")]
    DegenerateVector,
}

/// L2 norm, failing for vectors cosine similarity cannot be computed against.
pub fn checked_norm(v: &[f32]) -> Result<f64, SimilarityError> {
    if v.is_empty() {
        return Err(SimilarityError::Empty);
    }
    let norm = v.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return Err(SimilarityError::DegenerateVector);
    }
    Ok(norm)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    let norm_a = checked_norm(a)?;
    let norm_b = checked_norm(b)?;
    let dot: f64 = a.iter().zip(b).map(|(&x, &y)| f64::from(x) * f64::from(y)).sum();
    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0) as f32)
}
