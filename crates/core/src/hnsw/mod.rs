//! Layered proximity-graph index (HNSW).
//!
//! Points live in a multi-layer navigable small-world graph: upper layers
//! are exponentially sparser and provide coarse routing, layer 0 holds every
//! node. Search greedy-descends the upper layers and beam-searches layer 0;
//! insertion links each new node bidirectionally with diversity-aware
//! pruning. Deletion is soft: flagged nodes keep routing but leave results.
//!
//! The graph uses a Struct-of-Arrays layout: one contiguous f32 arena for
//! vectors, with parallel arrays for neighbor lists, layer assignments,
//! delete flags, and labels.

/// Graph structure, configuration, and SoA storage.
pub mod graph;
/// Insertion with bidirectional linking and heuristic pruning.
pub mod insert;
/// Single-layer beam search and multi-layer k-NN.
pub mod search;
/// Epoch-stamped visited set for graph traversal.
pub mod visited;

pub use graph::{GraphIndex, HnswConfig};
