//! Distance kernels.
//!
//! Loops are unrolled over four independent accumulators so the compiler
//! can auto-vectorize them without any target-specific intrinsics.

use crate::Metric;

/// Squared L2 (Euclidean) distance.
///
/// Ordering by squared distance is identical to ordering by distance, so
/// every ranking path in the workspace uses this form and skips the sqrt.
#[inline]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let mut acc = [0.0f32; 4];
    let a_chunks = a.chunks_exact(4);
    let b_chunks = b.chunks_exact(4);
    let tail: f32 = a_chunks
        .remainder()
        .iter()
        .zip(b_chunks.remainder())
        .map(|(x, y)| (x - y) * (x - y))
        .sum();

    for (x, y) in a_chunks.zip(b_chunks) {
        for lane in 0..4 {
            let d = x[lane] - y[lane];
            acc[lane] += d * d;
        }
    }

    acc[0] + acc[1] + acc[2] + acc[3] + tail
}

/// L2 (Euclidean) distance.
#[inline]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    l2_distance_squared(a, b).sqrt()
}

/// Dot product of two vectors.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let mut acc = [0.0f32; 4];
    let a_chunks = a.chunks_exact(4);
    let b_chunks = b.chunks_exact(4);
    let tail: f32 = a_chunks
        .remainder()
        .iter()
        .zip(b_chunks.remainder())
        .map(|(x, y)| x * y)
        .sum();

    for (x, y) in a_chunks.zip(b_chunks) {
        for lane in 0..4 {
            acc[lane] += x[lane] * y[lane];
        }
    }

    acc[0] + acc[1] + acc[2] + acc[3] + tail
}

/// L2 norm (magnitude) of a vector.
#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    dot_product(v, v).sqrt()
}

/// Cosine distance, `1 - cos(a, b)`, in [0, 2].
///
/// A zero vector has no direction; its distance to anything is 1.
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot_product(a, b) / (norm_a * norm_b)
}

/// Distance between two vectors under `metric`.
#[inline]
pub fn distance(a: &[f32], b: &[f32], metric: Metric) -> f32 {
    match metric {
        Metric::L2 => l2_distance_squared(a, b),
        Metric::Cosine => cosine_distance(a, b),
    }
}

/// Scale a vector to unit length in place. Zero vectors are left alone.
pub fn normalize(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm > 0.0 {
        let inv = 1.0 / norm;
        v.iter_mut().for_each(|x| *x *= inv);
    }
}
