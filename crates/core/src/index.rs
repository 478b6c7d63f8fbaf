//! Unified index facade.
//!
//! [`VectorIndex`] owns one engine of either family behind an
//! `Arc<RwLock<..>>`: searches share a read lock, mutations take the write
//! lock, and cloning produces another handle to the same index. The facade
//! validates inputs and rejects cross-family operations before delegating;
//! the engines never see a call their family does not support.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::hnsw::{GraphIndex, HnswConfig};
use crate::ivf::ClusteredIndex;
use crate::space::{Space, SpaceKind};
use crate::storage::snapshot;

/// Caller-assigned 64-bit identity for a stored vector, distinct from any
/// internal storage position.
pub type Label = i64;

/// One ranked search result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub label: Label,
    pub distance: f32,
}

/// The two interchangeable index families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexFamily {
    /// Layered proximity graph (HNSW).
    Graph,
    /// Clustered inverted file (IVF-Flat).
    Clustered,
}

impl IndexFamily {
    /// The canonical tag for this family.
    pub fn tag(&self) -> &'static str {
        match self {
            IndexFamily::Graph => "hnsw",
            IndexFamily::Clustered => "ivf_flat",
        }
    }
}

/// Point-in-time counters for an index handle.
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub family: IndexFamily,
    pub space: SpaceKind,
    pub dimension: usize,
    /// Configured element ceiling; `None` for the clustered family.
    pub max_elements: Option<usize>,
    /// Stored elements, live plus soft-deleted.
    pub element_count: usize,
    pub deleted_count: usize,
    pub query_count: u64,
    pub avg_hops: f32,
    pub avg_distance_computations: f32,
}

#[derive(Debug)]
pub(crate) enum Engine {
    Graph(GraphIndex),
    Clustered(ClusteredIndex),
}

impl Engine {
    fn space(&self) -> Space {
        match self {
            Engine::Graph(g) => g.space(),
            Engine::Clustered(c) => c.space(),
        }
    }

    fn family(&self) -> IndexFamily {
        match self {
            Engine::Graph(_) => IndexFamily::Graph,
            Engine::Clustered(_) => IndexFamily::Clustered,
        }
    }
}

/// Shared handle to a vector index of either family.
///
/// Cloning is cheap and yields another handle to the same index. Searches
/// from any number of threads run concurrently; mutations serialize behind
/// the write lock.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    engine: Arc<RwLock<Engine>>,
}

impl VectorIndex {
    /// Create a graph (HNSW) index.
    pub fn graph(kind: SpaceKind, dim: usize, config: HnswConfig) -> Result<Self> {
        let space = Space::new(kind, dim)?;
        let index = GraphIndex::new(space, config)?;
        tracing::info!(
            space = kind.tag(),
            dim,
            capacity = index.capacity(),
            "created graph index"
        );
        Ok(Self::from_engine(Engine::Graph(index)))
    }

    /// Create a clustered (IVF-Flat) index with `nlist` centroid slots.
    /// The quantizer must be trained before add or search.
    pub fn clustered(kind: SpaceKind, dim: usize, nlist: usize) -> Result<Self> {
        let space = Space::new(kind, dim)?;
        let index = ClusteredIndex::new(space, nlist)?;
        tracing::info!(space = kind.tag(), dim, nlist, "created clustered index");
        Ok(Self::from_engine(Engine::Clustered(index)))
    }

    pub(crate) fn from_engine(engine: Engine) -> Self {
        Self {
            engine: Arc::new(RwLock::new(engine)),
        }
    }

    /// The index family of this handle.
    pub fn family(&self) -> IndexFamily {
        self.engine.read().family()
    }

    /// The index's vector dimensionality.
    pub fn dimension(&self) -> usize {
        self.engine.read().space().dim()
    }

    /// The index's distance kind.
    pub fn space_kind(&self) -> SpaceKind {
        self.engine.read().space().kind()
    }

    /// Live (returnable) point count.
    pub fn len(&self) -> usize {
        match &*self.engine.read() {
            Engine::Graph(g) => g.live_count(),
            Engine::Clustered(c) => c.ntotal(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Train the clustered quantizer on a flat `n * dim` buffer.
    ///
    /// Graph indexes do not train; the call fails with `InvalidArgument`.
    pub fn train(&self, vectors: &[f32]) -> Result<()> {
        match &mut *self.engine.write() {
            Engine::Graph(_) => Err(IndexError::invalid(
                "train is not supported by the graph index family",
            )),
            Engine::Clustered(c) => c.train(vectors),
        }
    }

    /// Insert one point under a caller-assigned label.
    pub fn add(&self, label: Label, vector: &[f32]) -> Result<()> {
        match &mut *self.engine.write() {
            Engine::Graph(g) => g.add_point(label, vector),
            Engine::Clustered(c) => c.add(label, vector),
        }
    }

    /// Insert a batch of points from a flat `n * dim` buffer under one lock
    /// acquisition. Graph inserts stop at the first failure.
    pub fn add_batch(&self, labels: &[Label], vectors: &[f32]) -> Result<()> {
        let mut engine = self.engine.write();
        match &mut *engine {
            Engine::Graph(g) => {
                let dim = g.space().dim();
                let n = batch_count(labels.len(), vectors, dim)?;
                for (label, vector) in labels.iter().take(n).zip(vectors.chunks_exact(dim)) {
                    g.add_point(*label, vector)?;
                }
                Ok(())
            }
            Engine::Clustered(c) => c.add_batch(labels, vectors),
        }
    }

    /// Approximate k-nearest-neighbor search.
    ///
    /// Graph indexes use the current `ef`; clustered indexes use their
    /// default `nprobe`. Results ascend by distance.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        match &*self.engine.read() {
            Engine::Graph(g) => g.search_knn(query, k),
            Engine::Clustered(c) => c.search(query, k, c.nprobe()),
        }
    }

    /// Clustered search with an explicit probe width. Fails with
    /// `InvalidArgument` on graph indexes.
    pub fn search_with_nprobe(&self, query: &[f32], k: usize, nprobe: usize) -> Result<Vec<SearchHit>> {
        match &*self.engine.read() {
            Engine::Graph(_) => Err(IndexError::invalid(
                "nprobe is not supported by the graph index family",
            )),
            Engine::Clustered(c) => c.search(query, k, nprobe),
        }
    }

    /// Search a batch of queries (flat `n * dim` buffer) under one lock
    /// acquisition.
    pub fn search_batch(&self, queries: &[f32], k: usize) -> Result<Vec<Vec<SearchHit>>> {
        let engine = self.engine.read();
        let dim = engine.space().dim();
        if queries.is_empty() {
            return Err(IndexError::invalid("query buffer is empty"));
        }
        if queries.len() % dim != 0 {
            return Err(IndexError::invalid(format!(
                "query buffer length {} is not a multiple of dimension {dim}",
                queries.len()
            )));
        }
        queries
            .chunks_exact(dim)
            .map(|query| match &*engine {
                Engine::Graph(g) => g.search_knn(query, k),
                Engine::Clustered(c) => c.search(query, k, c.nprobe()),
            })
            .collect()
    }

    /// Set the graph search beam width for subsequent queries. Fails with
    /// `InvalidArgument` on clustered indexes.
    pub fn set_ef(&self, ef: usize) -> Result<()> {
        match &*self.engine.read() {
            Engine::Graph(g) => g.set_ef(ef),
            Engine::Clustered(_) => Err(IndexError::invalid(
                "ef is not supported by the clustered index family",
            )),
        }
    }

    /// Set the clustered default probe width (`1..=nlist`). Fails with
    /// `InvalidArgument` on graph indexes.
    pub fn set_nprobe(&self, nprobe: usize) -> Result<()> {
        match &mut *self.engine.write() {
            Engine::Graph(_) => Err(IndexError::invalid(
                "nprobe is not supported by the graph index family",
            )),
            Engine::Clustered(c) => c.set_nprobe(nprobe),
        }
    }

    /// Soft-delete a single label.
    ///
    /// Graph: fails with `NotFound` if the label was never inserted.
    /// Clustered: batch semantics, silently ignores an absent label.
    pub fn mark_deleted(&self, label: Label) -> Result<()> {
        match &mut *self.engine.write() {
            Engine::Graph(g) => g.mark_deleted(label),
            Engine::Clustered(c) => c.remove(std::slice::from_ref(&label)),
        }
    }

    /// Remove a batch of labels.
    ///
    /// Graph labels are soft-deleted one by one and an absent label fails
    /// with `NotFound`; clustered removal is physical and silently ignores
    /// absent ids.
    pub fn remove(&self, labels: &[Label]) -> Result<()> {
        match &mut *self.engine.write() {
            Engine::Graph(g) => {
                for &label in labels {
                    g.mark_deleted(label)?;
                }
                Ok(())
            }
            Engine::Clustered(c) => c.remove(labels),
        }
    }

    /// Copy out the stored vector for `label`; `NotFound` if it was never
    /// stored.
    pub fn get_vector(&self, label: Label) -> Result<Vec<f32>> {
        match &*self.engine.read() {
            Engine::Graph(g) => g.get_vector(label),
            Engine::Clustered(c) => c.get_vector(label),
        }
    }

    /// Counters and lifetime query averages. Always succeeds.
    pub fn stats(&self) -> IndexStats {
        let engine = self.engine.read();
        let space = engine.space();
        match &*engine {
            Engine::Graph(g) => IndexStats {
                family: IndexFamily::Graph,
                space: space.kind(),
                dimension: space.dim(),
                max_elements: Some(g.capacity()),
                element_count: g.element_count(),
                deleted_count: g.deleted_count(),
                query_count: g.query_stats().query_count(),
                avg_hops: g.query_stats().avg_hops(),
                avg_distance_computations: g.query_stats().avg_distance_computations(),
            },
            Engine::Clustered(c) => IndexStats {
                family: IndexFamily::Clustered,
                space: space.kind(),
                dimension: space.dim(),
                max_elements: None,
                element_count: c.ntotal(),
                deleted_count: 0,
                query_count: c.query_stats().query_count(),
                avg_hops: c.query_stats().avg_hops(),
                avg_distance_computations: c.query_stats().avg_distance_computations(),
            },
        }
    }

    // ── Persistence ────────────────────────────────────────────────────

    /// Serialize the index to a byte sink.
    pub fn save_to_writer(&self, sink: &mut impl Write) -> Result<()> {
        let engine = self.engine.read();
        let envelope = match &*engine {
            Engine::Graph(g) => g.to_snapshot(),
            Engine::Clustered(c) => c.to_snapshot(),
        };
        snapshot::write_snapshot(&envelope, sink)
    }

    /// Serialize the index to a file, atomically (temp file + rename).
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let engine = self.engine.read();
        let envelope = match &*engine {
            Engine::Graph(g) => g.to_snapshot(),
            Engine::Clustered(c) => c.to_snapshot(),
        };
        snapshot::write_snapshot_file(&envelope, path.as_ref())
    }

    /// Reconstruct an index from a snapshot byte stream.
    pub fn load_from_reader(source: &mut impl Read) -> Result<Self> {
        let envelope = snapshot::read_snapshot(source)?;
        Self::from_envelope(envelope)
    }

    /// Reconstruct from a snapshot, validating a caller-declared dimension
    /// and space kind against the stored header first.
    pub fn load_from_reader_checked(
        source: &mut impl Read,
        dim: usize,
        kind: SpaceKind,
    ) -> Result<Self> {
        let envelope = snapshot::read_snapshot(source)?;
        if envelope.dimension as usize != dim {
            return Err(IndexError::DimensionMismatch {
                expected: dim,
                actual: envelope.dimension as usize,
            });
        }
        if envelope.space != kind {
            return Err(IndexError::invalid(format!(
                "snapshot stores space {:?}, caller declared {:?}",
                envelope.space.tag(),
                kind.tag()
            )));
        }
        Self::from_envelope(envelope)
    }

    /// Reconstruct an index from a snapshot file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = std::fs::File::open(path.as_ref())?;
        Self::load_from_reader(&mut file)
    }

    fn from_envelope(envelope: snapshot::SnapshotEnvelope) -> Result<Self> {
        let space = Space::new(envelope.space, envelope.dimension as usize)
            .map_err(|e| IndexError::CorruptData(format!("stored space invalid: {e}")))?;
        let engine = match (envelope.family, envelope.payload) {
            (IndexFamily::Graph, snapshot::SnapshotPayload::Graph(s)) => {
                Engine::Graph(s.into_index(space)?)
            }
            (IndexFamily::Clustered, snapshot::SnapshotPayload::Clustered(s)) => {
                Engine::Clustered(s.into_index(space)?)
            }
            _ => {
                return Err(IndexError::CorruptData(
                    "family tag disagrees with payload".into(),
                ))
            }
        };
        Ok(Self::from_engine(engine))
    }
}

/// Validate a parallel labels/flat-vectors batch, returning the count.
fn batch_count(labels: usize, vectors: &[f32], dim: usize) -> Result<usize> {
    if labels == 0 || vectors.is_empty() {
        return Err(IndexError::invalid("batch is empty"));
    }
    if vectors.len() % dim != 0 {
        return Err(IndexError::invalid(format!(
            "vector buffer length {} is not a multiple of dimension {dim}",
            vectors.len()
        )));
    }
    let n = vectors.len() / dim;
    if n != labels {
        return Err(IndexError::invalid(format!("{labels} labels for {n} vectors")));
    }
    Ok(n)
}
