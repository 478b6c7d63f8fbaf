//! Distance spaces: dimensionality plus a distance function.
//!
//! The metric is a closed tagged variant resolved at construction time, so
//! the hot path dispatches on a copied enum rather than a trait object.
//! All distances are "lower is better": squared L2, or negated inner
//! product.

use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{IndexError, Result};

/// Distance function tag.
///
/// Determines how distances between vectors are computed. Both variants
/// return values where **lower is better** (more similar).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpaceKind {
    /// Squared Euclidean distance (L2²). Range: \[0, ∞).
    L2,
    /// Negated inner product: `-dot(a, b)`. Lower = higher similarity.
    InnerProduct,
}

impl SpaceKind {
    /// Parse a space tag. Recognized tags: `"l2"`, `"ip"`.
    pub fn parse(tag: &str) -> Result<Self> {
        match tag {
            "l2" => Ok(SpaceKind::L2),
            "ip" => Ok(SpaceKind::InnerProduct),
            other => Err(IndexError::invalid(format!(
                "unknown space tag {other:?} (expected \"l2\" or \"ip\")"
            ))),
        }
    }

    /// The canonical tag for this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            SpaceKind::L2 => "l2",
            SpaceKind::InnerProduct => "ip",
        }
    }
}

/// A distance space: fixed dimensionality plus a [`SpaceKind`].
///
/// Immutable and `Copy`; shared freely between the index and its callers
/// without synchronization. Distance computation is deterministic and
/// side-effect-free.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Space {
    kind: SpaceKind,
    dim: usize,
}

impl Space {
    /// Create a space. Fails with `InvalidArgument` for a zero or oversized
    /// dimension.
    pub fn new(kind: SpaceKind, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(IndexError::invalid("dimension must be non-zero"));
        }
        if dim > config::MAX_DIMENSION {
            return Err(IndexError::invalid(format!(
                "dimension {dim} exceeds maximum {}",
                config::MAX_DIMENSION
            )));
        }
        Ok(Self { kind, dim })
    }

    /// The space's distance kind.
    #[inline]
    pub fn kind(&self) -> SpaceKind {
        self.kind
    }

    /// The space's dimensionality.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Distance between two vectors of this space's dimensionality.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), self.dim);
        debug_assert_eq!(b.len(), self.dim);
        match self.kind {
            SpaceKind::L2 => l2_squared(a, b),
            SpaceKind::InnerProduct => -dot_product(a, b),
        }
    }
}

/// SIMD-friendly chunk width for the f32 kernels. Eight independent partial
/// sums let the compiler auto-vectorize without reassociation concerns.
const LANES: usize = 8;

/// Squared Euclidean distance with chunked accumulation.
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut sums = [0.0f32; LANES];
    let a_chunks = a.chunks_exact(LANES);
    let b_chunks = b.chunks_exact(LANES);
    let a_rem = a_chunks.remainder();
    let b_rem = b_chunks.remainder();
    for (ca, cb) in a_chunks.zip(b_chunks) {
        for j in 0..LANES {
            let d = ca[j] - cb[j];
            sums[j] += d * d;
        }
    }
    let mut total: f32 = sums.iter().sum();
    for (x, y) in a_rem.iter().zip(b_rem) {
        let d = x - y;
        total += d * d;
    }
    total
}

/// Dot product with chunked accumulation.
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut sums = [0.0f32; LANES];
    let a_chunks = a.chunks_exact(LANES);
    let b_chunks = b.chunks_exact(LANES);
    let a_rem = a_chunks.remainder();
    let b_rem = b_chunks.remainder();
    for (ca, cb) in a_chunks.zip(b_chunks) {
        for j in 0..LANES {
            sums[j] += ca[j] * cb[j];
        }
    }
    let mut total: f32 = sums.iter().sum();
    for (x, y) in a_rem.iter().zip(b_rem) {
        total += x * y;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags() {
        assert_eq!(SpaceKind::parse("l2").unwrap(), SpaceKind::L2);
        assert_eq!(SpaceKind::parse("ip").unwrap(), SpaceKind::InnerProduct);
        assert!(matches!(
            SpaceKind::parse("cosine"),
            Err(IndexError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(matches!(
            Space::new(SpaceKind::L2, 0),
            Err(IndexError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_oversized_dimension_rejected() {
        assert!(Space::new(SpaceKind::L2, crate::config::MAX_DIMENSION + 1).is_err());
    }

    #[test]
    fn test_l2_squared_basic() {
        let a = [0.0, 0.0, 0.0];
        let b = [3.0, 4.0, 0.0];
        let space = Space::new(SpaceKind::L2, 3).unwrap();
        assert!((space.distance(&a, &b) - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_self_distance_zero() {
        let v: Vec<f32> = (0..19).map(|i| i as f32 * 0.37).collect();
        let space = Space::new(SpaceKind::L2, 19).unwrap();
        assert_eq!(space.distance(&v, &v), 0.0);
    }

    #[test]
    fn test_inner_product_negated() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        let space = Space::new(SpaceKind::InnerProduct, 3).unwrap();
        assert!((space.distance(&a, &b) - (-32.0)).abs() < 1e-6);
    }

    #[test]
    fn test_inner_product_orthogonal() {
        let a = [1.0, 0.0, 0.0, 0.0];
        let b = [0.0, 1.0, 0.0, 0.0];
        let space = Space::new(SpaceKind::InnerProduct, 4).unwrap();
        assert_eq!(space.distance(&a, &b), 0.0);
    }

    #[test]
    fn test_kernels_cover_remainder_lanes() {
        // Length 11 exercises both the chunked loop and the tail.
        let a: Vec<f32> = (0..11).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..11).map(|i| (i as f32) + 1.0).collect();
        assert!((l2_squared(&a, &b) - 11.0).abs() < 1e-6);
        let expected: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!((dot_product(&a, &b) - expected).abs() < 1e-4);
    }
}
