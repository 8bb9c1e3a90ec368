//! Euclidean distance with a SIMD accumulation path.
//!
//! The kernel walks both vectors in chunks of [`LANES`] floats using
//! `wide::f32x8`, reduces each chunk into an `f64` accumulator and finishes the
//! remainder with a scalar loop. The scalar path alone produces the same result
//! up to floating-point associativity.
//!
//! Ranking code compares squared distances; `sqrt` is monotone so the order is
//! identical and the training and query paths agree on ties.

use wide::f32x8;

use crate::vector::types::{Vector, VectorError};

/// Width of one SIMD accumulation step.
pub const LANES: usize = 8;

/// Squared Euclidean distance between two equal-length vectors.
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> Result<f64, VectorError> {
    check_dimensions(a, b)?;
    Ok(squared_unchecked(a, b))
}

/// Euclidean distance between two equal-length vectors.
pub fn euclidean(a: &[f32], b: &[f32]) -> Result<f64, VectorError> {
    squared_euclidean(a, b).map(f64::sqrt)
}

/// Scalar reference implementation, used for the tail and in tests.
#[must_use]
pub fn squared_euclidean_scalar(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = x - y;
            f64::from(diff * diff)
        })
        .sum()
}

#[inline]
fn check_dimensions(a: &[f32], b: &[f32]) -> Result<(), VectorError> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(())
}

/// Caller guarantees `a.len() == b.len()`.
#[inline]
pub(crate) fn squared_unchecked(a: &[f32], b: &[f32]) -> f64 {
    let a_chunks = a.chunks_exact(LANES);
    let b_chunks = b.chunks_exact(LANES);
    let a_tail = a_chunks.remainder();
    let b_tail = b_chunks.remainder();

    let mut sum = 0.0f64;
    let mut lane_a = [0.0f32; LANES];
    let mut lane_b = [0.0f32; LANES];
    for (ca, cb) in a_chunks.zip(b_chunks) {
        lane_a.copy_from_slice(ca);
        lane_b.copy_from_slice(cb);
        let diff = f32x8::new(lane_a) - f32x8::new(lane_b);
        sum += f64::from((diff * diff).reduce_add());
    }

    sum + squared_euclidean_scalar(a_tail, b_tail)
}

/// A query vector bound once and scored against many candidates.
///
/// Holds the query so hot loops only pass the candidate. Results are identical
/// to [`euclidean`].
#[derive(Debug, Clone)]
pub struct DistanceScorer {
    query: Vector,
}

impl DistanceScorer {
    #[must_use]
    pub fn new(query: Vector) -> Self {
        Self { query }
    }

    #[must_use]
    pub fn query(&self) -> &Vector {
        &self.query
    }

    /// Euclidean distance from the bound query to `candidate`.
    pub fn distance(&self, candidate: &[f32]) -> Result<f64, VectorError> {
        euclidean(self.query.as_slice(), candidate)
    }

    /// Squared distance, for ranking.
    pub fn squared_distance(&self, candidate: &[f32]) -> Result<f64, VectorError> {
        squared_euclidean(self.query.as_slice(), candidate)
    }
}
