//! Graph insertion.
//!
//! Three phases: greedy descent through the upper layers, beam search per
//! target layer to collect candidates, then bidirectional linking with
//! diversity-aware pruning (Algorithm 4 from the HNSW paper) so overflowing
//! neighbor lists keep long-range edges instead of collapsing into one
//! cluster.

use crate::error::{IndexError, Result};
use crate::hnsw::graph::GraphIndex;
use crate::hnsw::search::search_layer;
use crate::hnsw::visited::VisitedSet;
use crate::index::Label;
use crate::stats::SearchCounters;

impl GraphIndex {
    /// Insert a point under a caller-assigned label.
    ///
    /// Fails with `DuplicateLabel` if the label is already present (deleted
    /// or not), `CapacityExceeded` at the configured ceiling, and
    /// `InvalidArgument` on a dimension mismatch.
    pub fn add_point(&mut self, label: Label, vector: &[f32]) -> Result<()> {
        let dim = self.space.dim();
        if vector.len() != dim {
            return Err(IndexError::invalid(format!(
                "vector has dimension {}, index expects {dim}",
                vector.len()
            )));
        }
        if self.label_map.contains_key(&label) {
            return Err(IndexError::DuplicateLabel(label));
        }
        if self.element_count() >= self.config.capacity {
            return Err(IndexError::CapacityExceeded {
                capacity: self.config.capacity,
            });
        }

        let internal_id = self.element_count() as u32;
        let level = self.random_level();
        self.vectors.try_reserve(dim)?;

        // First node: no traversal, it simply becomes the entry point.
        let Some(entry_point) = self.entry_point else {
            self.push_node(label, vector, level, vec![Vec::new(); level + 1]);
            self.entry_point = Some(internal_id);
            self.max_layer = level;
            return Ok(());
        };

        let mut visited = VisitedSet::new(self.element_count());
        let mut counters = SearchCounters::default();
        let mut current_ep = entry_point;

        // Phase 1: greedy descent from the top layer down to level + 1,
        // moving to the single closest neighbor at each layer.
        for layer in (level + 1..=self.max_layer).rev() {
            let nearest = search_layer(
                self,
                vector,
                std::slice::from_ref(&current_ep),
                1,
                layer,
                &mut visited,
                &mut counters,
            );
            if let Some(&(_, id)) = nearest.first() {
                current_ep = id;
            }
        }

        // Phase 2: beam search each layer from min(level, max_layer) down to
        // 0 and pick up to max_links(layer) diverse neighbors.
        let top = level.min(self.max_layer);
        let mut node_neighbors: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
        let mut layer_eps: Vec<u32> = vec![current_ep];
        for layer in (0..=top).rev() {
            let candidates = search_layer(
                self,
                vector,
                &layer_eps,
                self.config.ef_construction,
                layer,
                &mut visited,
                &mut counters,
            );

            let selected = select_neighbors_heuristic(self, &candidates, self.max_links(layer));
            node_neighbors[layer] = selected.iter().map(|&(_, id)| id).collect();

            // The full candidate set seeds the next (lower) layer.
            layer_eps.clear();
            layer_eps.extend(candidates.iter().map(|&(_, id)| id));
            if layer_eps.is_empty() {
                layer_eps.push(entry_point);
            }
        }

        self.push_node(label, vector, level, node_neighbors);

        // Phase 3: make the edges bidirectional; re-prune any neighbor whose
        // list overflows, with the same diversity heuristic.
        for layer in 0..=top {
            let m_max = self.max_links(layer);
            let outgoing = self.neighbors[internal_id as usize][layer].clone();
            for neighbor_id in outgoing {
                let nid = neighbor_id as usize;
                debug_assert!(layer < self.neighbors[nid].len());
                self.neighbors[nid][layer].push(internal_id);

                if self.neighbors[nid][layer].len() > m_max {
                    let base = self.vector(neighbor_id);
                    let candidates: Vec<(f32, u32)> = self.neighbors[nid][layer]
                        .iter()
                        .map(|&cid| (self.space.distance(base, self.vector(cid)), cid))
                        .collect();
                    let pruned = select_neighbors_heuristic(self, &candidates, m_max);
                    self.neighbors[nid][layer] = pruned.iter().map(|&(_, id)| id).collect();
                }
            }
        }

        // Promote the entry point when the new node tops the graph.
        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(internal_id);
        }
        Ok(())
    }

    /// Append one node's SoA fields. The internal id is implicitly the
    /// current element count.
    fn push_node(
        &mut self,
        label: Label,
        vector: &[f32],
        level: usize,
        layer_neighbors: Vec<Vec<u32>>,
    ) {
        debug_assert_eq!(layer_neighbors.len(), level + 1);
        let internal_id = self.element_count() as u32;
        self.vectors.extend_from_slice(vector);
        self.neighbors.push(layer_neighbors);
        self.layers.push(level as u8);
        self.deleted.push(false);
        self.labels.push(label);
        self.label_map.insert(label, internal_id);
    }
}

/// Diversity-aware neighbor selection (Algorithm 4 from the HNSW paper).
///
/// A candidate is kept only if it is closer to the base than to every
/// already-selected neighbor; this spreads edges across directions instead
/// of stacking them in one region. Remaining slots are backfilled with the
/// nearest rejected candidates so pruning never starves a node of degree.
fn select_neighbors_heuristic(
    index: &GraphIndex,
    candidates: &[(f32, u32)],
    m: usize,
) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });

    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
    for &(dist_to_base, cid) in &sorted {
        if selected.len() >= m {
            break;
        }
        let cand_vec = index.vector(cid);
        let is_diverse = selected.iter().all(|&(_, sid)| {
            let dist_to_selected = index.space.distance(cand_vec, index.vector(sid));
            dist_to_base <= dist_to_selected
        });
        if is_diverse {
            selected.push((dist_to_base, cid));
        }
    }

    // Backfill with the closest unused candidates if the heuristic left
    // slots empty.
    if selected.len() < m {
        for &(dist, cid) in &sorted {
            if selected.len() >= m {
                break;
            }
            if !selected.iter().any(|&(_, sid)| sid == cid) {
                selected.push((dist, cid));
            }
        }
    }

    selected
}
