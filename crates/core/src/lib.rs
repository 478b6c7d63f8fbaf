//! # proxima-core
//!
//! Embeddable approximate-nearest-neighbor engine with two interchangeable
//! index families: a layered proximity graph (HNSW) and a clustered
//! inverted file (IVF-Flat), unified behind one [`VectorIndex`] facade with
//! snapshot persistence and lifetime query statistics.
//!
//! This is a synchronous library crate with no async dependencies —
//! suitable for embedding directly in Rust services or language bindings.

/// Compile-time defaults and validation limits.
pub mod config;
/// Error taxonomy and the crate-wide `Result` alias.
pub mod error;
/// Layered proximity-graph index: structure, insertion, search.
pub mod hnsw;
/// Unified facade over both index families.
pub mod index;
/// Clustered inverted-file index: quantizer training and posting lists.
pub mod ivf;
/// Distance spaces: L2 and inner-product kernels.
pub mod space;
/// Lifetime query statistics.
pub mod stats;
/// Snapshot persistence for both families.
pub mod storage;

pub use error::{IndexError, Result};
pub use hnsw::{GraphIndex, HnswConfig};
pub use index::{IndexFamily, IndexStats, Label, SearchHit, VectorIndex};
pub use ivf::{ClusteredIndex, NO_LABEL};
pub use space::{Space, SpaceKind};
pub use stats::QueryStats;
