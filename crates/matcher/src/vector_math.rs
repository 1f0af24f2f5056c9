//! Dense vector similarity primitives
//!
//! Norms and dot products accumulate in `f64`, so small-magnitude `f32`
//! inputs neither underflow to a zero norm nor overflow on squaring. A
//! non-finite result is reported as [`AppError::DegenerateVector`] and never
//! reaches ranking.

use preprintbot_common::errors::{AppError, Result};
use rayon::prelude::*;

/// A vector scaled to unit length
#[derive(Debug, Clone, PartialEq)]
pub struct UnitVector {
    values: Vec<f64>,
}

impl UnitVector {
    /// Normalise a raw vector; fails for zero or non-finite magnitude
    pub fn new(vector: &[f32]) -> Result<Self> {
        let norm = norm(vector);
        if norm == 0.0 {
            return Err(AppError::DegenerateVector {
                reason: "zero-magnitude vector".to_string(),
            });
        }
        if !norm.is_finite() {
            return Err(AppError::DegenerateVector {
                reason: "vector has non-finite components".to_string(),
            });
        }

        Ok(Self {
            values: vector.iter().map(|&x| x as f64 / norm).collect(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity with another unit vector
    pub fn dot(&self, other: &UnitVector) -> Result<f32> {
        check_dimensions(self.dimension(), other.dimension())?;
        let dot: f64 = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| a * b)
            .sum();
        finish(dot)
    }

    /// Single-precision copy, for indexes that store `f32`
    pub fn to_f32(&self) -> Vec<f32> {
        self.values.iter().map(|&x| x as f32).collect()
    }
}

/// Euclidean norm in double precision
pub fn norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|&x| {
            let x = x as f64;
            x * x
        })
        .sum::<f64>()
        .sqrt()
}

/// True when the vector cannot be normalised
pub fn is_degenerate(vector: &[f32]) -> bool {
    let norm = norm(vector);
    norm == 0.0 || !norm.is_finite()
}

fn check_dimensions(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(AppError::DimensionMismatch { expected, got });
    }
    Ok(())
}

fn finish(similarity: f64) -> Result<f32> {
    if !similarity.is_finite() {
        return Err(AppError::DegenerateVector {
            reason: format!("similarity evaluated to {}", similarity),
        });
    }
    Ok(similarity.clamp(-1.0, 1.0) as f32)
}

/// Cosine similarity of two raw vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dimensions(a.len(), b.len())?;
    UnitVector::new(a)?.dot(&UnitVector::new(b)?)
}

/// Pairwise similarities of prepared vectors, one row per reference.
///
/// Rows are computed on the rayon pool and collected in reference order.
pub fn similarity_matrix(references: &[UnitVector], candidates: &[UnitVector]) -> Result<Vec<Vec<f32>>> {
    references
        .par_iter()
        .map(|reference| {
            candidates
                .iter()
                .map(|candidate| reference.dot(candidate))
                .collect::<Result<Vec<f32>>>()
        })
        .collect()
}

/// `|refs| x |cands|` matrix of cosine similarities of raw vectors
pub fn batch_similarity(references: &[Vec<f32>], candidates: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
    let references = references
        .iter()
        .map(|v| UnitVector::new(v))
        .collect::<Result<Vec<_>>>()?;
    let candidates = candidates
        .iter()
        .map(|v| UnitVector::new(v))
        .collect::<Result<Vec<_>>>()?;
    similarity_matrix(&references, &candidates)
}
