//! Graph index structure and configuration.
//!
//! [`HnswConfig`] defines tuning parameters (M, ef_construction, layer cap,
//! element capacity). [`GraphIndex`] stores the graph in a Struct-of-Arrays
//! layout: one contiguous f32 arena for vectors, parallel arrays for
//! neighbor lists, layer assignments, delete flags, and labels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{IndexError, Result};
use crate::index::Label;
use crate::space::Space;
use crate::stats::QueryStats;

/// Configuration parameters for a graph index.
///
/// Controls the trade-off between build speed, search speed, recall, and
/// memory usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Number of bidirectional links per node (layer 0 uses `m_max0`).
    pub m: usize,
    /// Maximum links per node at layer 0 (typically `2 * m`).
    pub m_max0: usize,
    /// Candidate list size during construction.
    pub ef_construction: usize,
    /// Maximum number of layers in the graph.
    pub max_layers: usize,
    /// Hard element ceiling; inserts beyond it fail with `CapacityExceeded`.
    pub capacity: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: config::HNSW_DEFAULT_M,
            m_max0: config::HNSW_DEFAULT_M * 2,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            max_layers: config::HNSW_DEFAULT_MAX_LAYERS,
            capacity: config::HNSW_DEFAULT_CAPACITY,
        }
    }
}

impl HnswConfig {
    /// Default configuration with an explicit element ceiling.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Parameter sanity checks, shared by construction and snapshot load.
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        if self.m < 2 {
            return Err("M must be at least 2".into());
        }
        if self.m_max0 < self.m {
            return Err("m_max0 must be at least M".into());
        }
        if self.ef_construction == 0 {
            return Err("ef_construction must be non-zero".into());
        }
        if self.max_layers == 0 || self.max_layers > 64 {
            return Err("max_layers must be in 1..=64".into());
        }
        if self.capacity == 0 {
            return Err("capacity must be non-zero".into());
        }
        Ok(())
    }
}

/// Layered proximity-graph index (HNSW).
///
/// Nodes are addressed internally by dense `u32` ids in insertion order;
/// callers see only their own [`Label`]s. Soft-deleted nodes keep their
/// storage and edges for routing but never appear in results.
#[derive(Debug)]
pub struct GraphIndex {
    pub(crate) space: Space,
    pub(crate) config: HnswConfig,
    /// SoA vector arena: `element_count * dim` contiguous f32 values.
    pub(crate) vectors: Vec<f32>,
    /// Per-node, per-layer neighbor lists: `[node][layer][neighbor_ids]`.
    pub(crate) neighbors: Vec<Vec<Vec<u32>>>,
    /// Top layer each node participates in.
    pub(crate) layers: Vec<u8>,
    /// Soft-delete flags, parallel to `layers`.
    pub(crate) deleted: Vec<bool>,
    /// Internal id → caller label, in insertion order.
    pub(crate) labels: Vec<Label>,
    /// Caller label → internal id.
    pub(crate) label_map: HashMap<Label, u32>,
    pub(crate) entry_point: Option<u32>,
    pub(crate) max_layer: usize,
    pub(crate) deleted_count: usize,
    /// Runtime beam width; a plain scalar by contract, so last-write-wins
    /// races with concurrent searches are benign.
    pub(crate) ef_search: AtomicUsize,
    pub(crate) stats: QueryStats,
}

impl GraphIndex {
    /// Create an empty graph index over `space`.
    pub fn new(space: Space, config: HnswConfig) -> Result<Self> {
        config.validate().map_err(IndexError::InvalidArgument)?;
        Ok(Self {
            space,
            config,
            vectors: Vec::new(),
            neighbors: Vec::new(),
            layers: Vec::new(),
            deleted: Vec::new(),
            labels: Vec::new(),
            label_map: HashMap::new(),
            entry_point: None,
            max_layer: 0,
            deleted_count: 0,
            ef_search: AtomicUsize::new(config::HNSW_DEFAULT_EF_SEARCH),
            stats: QueryStats::new(),
        })
    }

    /// The distance space this index searches in.
    pub fn space(&self) -> Space {
        self.space
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    /// The configured element ceiling.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Total stored elements, live and soft-deleted.
    pub fn element_count(&self) -> usize {
        self.labels.len()
    }

    /// Number of soft-deleted elements.
    pub fn deleted_count(&self) -> usize {
        self.deleted_count
    }

    /// Number of live (returnable) elements.
    pub fn live_count(&self) -> usize {
        self.element_count() - self.deleted_count
    }

    pub fn is_empty(&self) -> bool {
        self.live_count() == 0
    }

    /// Current search beam width.
    pub fn ef(&self) -> usize {
        self.ef_search.load(Ordering::Relaxed)
    }

    /// Set the search beam width for subsequent queries.
    pub fn set_ef(&self, ef: usize) -> Result<()> {
        if ef == 0 {
            return Err(IndexError::invalid("ef must be non-zero"));
        }
        self.ef_search.store(ef, Ordering::Relaxed);
        Ok(())
    }

    /// Whether `label` was ever inserted (deleted or not).
    pub fn contains(&self, label: Label) -> bool {
        self.label_map.contains_key(&label)
    }

    /// Lifetime query statistics.
    pub fn query_stats(&self) -> &QueryStats {
        &self.stats
    }

    /// Soft-delete a point. The node keeps its storage and edges for
    /// routing but is excluded from all subsequent results. Idempotent for
    /// already-deleted labels; `NotFound` if the label was never inserted.
    pub fn mark_deleted(&mut self, label: Label) -> Result<()> {
        let id = *self
            .label_map
            .get(&label)
            .ok_or(IndexError::NotFound(label))?;
        let flag = &mut self.deleted[id as usize];
        if !*flag {
            *flag = true;
            self.deleted_count += 1;
        }
        Ok(())
    }

    /// Copy out the stored vector for `label`.
    ///
    /// Soft-deleted points still return their data (storage stays resident
    /// for routing); `NotFound` means the label was never inserted.
    pub fn get_vector(&self, label: Label) -> Result<Vec<f32>> {
        let id = *self
            .label_map
            .get(&label)
            .ok_or(IndexError::NotFound(label))?;
        Ok(self.vector(id).to_vec())
    }

    /// Borrow the vector slice for an internal id. O(1) into the arena.
    #[inline]
    pub(crate) fn vector(&self, id: u32) -> &[f32] {
        let dim = self.space.dim();
        let start = id as usize * dim;
        &self.vectors[start..start + dim]
    }

    #[inline]
    pub(crate) fn is_deleted(&self, id: u32) -> bool {
        self.deleted[id as usize]
    }

    /// Draw a random layer for a new node. P(layer ≥ k) decays
    /// geometrically with multiplier `1 / ln(M)`.
    pub(crate) fn random_level(&self) -> usize {
        let ml = 1.0 / (self.config.m as f64).ln();
        let r: f64 = rand::random();
        let level = (-r.ln() * ml).floor() as usize;
        level.min(self.config.max_layers - 1)
    }

    /// Fan-out cap at `layer`.
    #[inline]
    pub(crate) fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.config.m_max0
        } else {
            self.config.m
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::SpaceKind;

    fn l2_space(dim: usize) -> Space {
        Space::new(SpaceKind::L2, dim).unwrap()
    }

    #[test]
    fn test_new_empty() {
        let idx = GraphIndex::new(l2_space(4), HnswConfig::default()).unwrap();
        assert_eq!(idx.element_count(), 0);
        assert_eq!(idx.deleted_count(), 0);
        assert!(idx.is_empty());
    }

    #[test]
    fn test_config_validation() {
        let bad = HnswConfig {
            m: 1,
            ..HnswConfig::default()
        };
        assert!(GraphIndex::new(l2_space(4), bad).is_err());

        let bad = HnswConfig {
            capacity: 0,
            ..HnswConfig::default()
        };
        assert!(GraphIndex::new(l2_space(4), bad).is_err());

        let bad = HnswConfig {
            ef_construction: 0,
            ..HnswConfig::default()
        };
        assert!(GraphIndex::new(l2_space(4), bad).is_err());
    }

    #[test]
    fn test_set_ef() {
        let idx = GraphIndex::new(l2_space(4), HnswConfig::default()).unwrap();
        idx.set_ef(128).unwrap();
        assert_eq!(idx.ef(), 128);
        assert!(idx.set_ef(0).is_err());
    }

    #[test]
    fn test_random_level_bounded() {
        let idx = GraphIndex::new(l2_space(4), HnswConfig::default()).unwrap();
        for _ in 0..1000 {
            assert!(idx.random_level() < idx.config.max_layers);
        }
    }

    #[test]
    fn test_mark_deleted_not_found() {
        let mut idx = GraphIndex::new(l2_space(4), HnswConfig::default()).unwrap();
        assert!(matches!(
            idx.mark_deleted(7),
            Err(IndexError::NotFound(7))
        ));
    }
}
