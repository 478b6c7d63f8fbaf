//! Compile-time defaults and limits for the index engine.
//!
//! Runtime tuning (ef, nprobe) is per-handle state; everything here is a
//! fixed default or a validation ceiling.

/// Default number of bidirectional links per graph node.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default candidate list size during graph construction.
///
/// Higher values produce a better-connected graph at the cost of build time.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default candidate list size during graph search.
///
/// Higher values improve recall at the cost of latency. The effective beam
/// width of a query is `max(ef, k)`.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 50;

/// Maximum number of layers in the graph.
pub const HNSW_DEFAULT_MAX_LAYERS: usize = 16;

/// Default element ceiling for a graph index.
pub const HNSW_DEFAULT_CAPACITY: usize = 100_000;

/// Default number of coarse clusters in a clustered index.
pub const IVF_DEFAULT_NLIST: usize = 100;

/// Default number of clusters probed per query.
pub const IVF_DEFAULT_NPROBE: usize = 10;

/// Iteration cap for k-means during clustered-index training.
pub const IVF_MAX_KMEANS_ITERATIONS: usize = 40;

/// Maximum allowed vector dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Maximum number of results (`k`) per search.
pub const MAX_K: usize = 10_000;
