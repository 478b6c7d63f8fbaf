//! Graph search: single-layer beam search and multi-layer k-NN.
//!
//! Deleted nodes are traversed for routing but never enter the result set.
//! Heap entries order by `(distance, internal id)`, a total order, so ties
//! resolve by insertion order and results are deterministic for a fixed
//! index state.

use std::cell::RefCell;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use crate::config;
use crate::error::{IndexError, Result};
use crate::hnsw::graph::GraphIndex;
use crate::hnsw::visited::VisitedSet;
use crate::index::SearchHit;
use crate::stats::SearchCounters;

thread_local! {
    /// Per-thread visited-set pool, reused across queries to avoid a fresh
    /// allocation per search.
    static SEARCH_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::new(0));
}

/// Expansion candidate: max-heap on negated distance gives min-heap
/// behavior; ties pop the earlier-inserted node first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance
            .cmp(&other.neg_distance)
            .then(other.id.cmp(&self.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Result-set entry: max-heap by `(distance, id)` keeps the worst entry on
/// top for O(log ef) eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Beam search within one layer.
///
/// Returns up to `ef` live nodes closest to `query`, ascending by
/// `(distance, id)`. `visited` is reset at the start of the call;
/// `counters` accumulates hop and distance-computation counts.
pub(crate) fn search_layer(
    index: &GraphIndex,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
    counters: &mut SearchCounters,
) -> Vec<(f32, u32)> {
    visited.reset();
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(ef + 1);
    // Cached worst distance avoids a heap peek per neighbor in the hot loop.
    let mut worst_dist = f32::MAX;

    for &ep in entry_points {
        if visited.mark(ep) {
            counters.distance_computations += 1;
            let dist = index.space().distance(query, index.vector(ep));
            candidates.push(Candidate {
                neg_distance: OrderedFloat(-dist),
                id: ep,
            });
            if !index.is_deleted(ep) {
                results.push(ResultEntry {
                    distance: OrderedFloat(dist),
                    id: ep,
                });
                if results.len() >= ef {
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    while let Some(candidate) = candidates.pop() {
        let c_dist = -candidate.neg_distance.0;

        // The frontier is monotonically farther; once it passes the worst
        // kept result the beam is exhausted.
        if results.len() >= ef && c_dist > worst_dist {
            break;
        }
        counters.hops += 1;

        let node = candidate.id as usize;
        if layer >= index.neighbors[node].len() {
            continue;
        }
        for &neighbor_id in &index.neighbors[node][layer] {
            if !visited.mark(neighbor_id) {
                continue;
            }
            counters.distance_computations += 1;
            let dist = index.space().distance(query, index.vector(neighbor_id));

            if results.len() < ef || dist < worst_dist {
                candidates.push(Candidate {
                    neg_distance: OrderedFloat(-dist),
                    id: neighbor_id,
                });
                if !index.is_deleted(neighbor_id) {
                    results.push(ResultEntry {
                        distance: OrderedFloat(dist),
                        id: neighbor_id,
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.distance.0, r.id))
        .collect()
}

impl GraphIndex {
    /// Approximate k-nearest-neighbor search.
    ///
    /// Greedy-descends the upper layers, then beam-searches layer 0 with
    /// width `max(ef, k)`. Returns up to `k` live points ascending by
    /// distance; fewer than `k` only when fewer live points exist.
    pub fn search_knn(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let dim = self.space.dim();
        if query.len() != dim {
            return Err(IndexError::invalid(format!(
                "query has dimension {}, index expects {dim}",
                query.len()
            )));
        }
        if k == 0 || k > config::MAX_K {
            return Err(IndexError::invalid(format!(
                "k must be in 1..={}",
                config::MAX_K
            )));
        }

        let Some(entry_point) = self.entry_point else {
            self.stats.record(0, 0);
            return Ok(Vec::new());
        };

        SEARCH_VISITED.with(|cell| {
            let mut visited = cell.borrow_mut();
            visited.ensure_capacity(self.element_count());
            let mut counters = SearchCounters::default();

            // Coarse routing: single-closest descent to layer 1.
            let mut current_ep = entry_point;
            for layer in (1..=self.max_layer).rev() {
                let nearest = search_layer(
                    self,
                    query,
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

            let ef = self.ef().max(k);
            let mut found = search_layer(
                self,
                query,
                std::slice::from_ref(&current_ep),
                ef,
                0,
                &mut visited,
                &mut counters,
            );
            found.truncate(k);

            self.stats
                .record(counters.hops, counters.distance_computations);

            Ok(found
                .into_iter()
                .map(|(distance, id)| SearchHit {
                    label: self.labels[id as usize],
                    distance,
                })
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::graph::HnswConfig;
    use crate::space::{Space, SpaceKind};

    fn build_line_index(n: usize) -> GraphIndex {
        let space = Space::new(SpaceKind::L2, 2).unwrap();
        let mut idx = GraphIndex::new(space, HnswConfig::with_capacity(n)).unwrap();
        for i in 0..n {
            idx.add_point(i as i64, &[i as f32, 0.0]).unwrap();
        }
        idx
    }

    #[test]
    fn test_search_empty_index() {
        let space = Space::new(SpaceKind::L2, 2).unwrap();
        let idx = GraphIndex::new(space, HnswConfig::default()).unwrap();
        assert!(idx.search_knn(&[0.0, 0.0], 3).unwrap().is_empty());
    }

    #[test]
    fn test_search_validates_inputs() {
        let idx = build_line_index(4);
        assert!(idx.search_knn(&[0.0], 1).is_err());
        assert!(idx.search_knn(&[0.0, 0.0], 0).is_err());
    }

    #[test]
    fn test_exact_self_match() {
        let idx = build_line_index(50);
        let hits = idx.search_knn(&[17.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].label, 17);
        assert_eq!(hits[0].distance, 0.0);
    }

    #[test]
    fn test_results_ascend_by_distance() {
        let idx = build_line_index(40);
        let hits = idx.search_knn(&[11.2, 0.0], 8).unwrap();
        assert_eq!(hits.len(), 8);
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn test_deleted_excluded_but_routed_through() {
        let mut idx = build_line_index(30);
        idx.mark_deleted(15).unwrap();
        let hits = idx.search_knn(&[15.0, 0.0], 5).unwrap();
        assert!(hits.iter().all(|h| h.label != 15));
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn test_fewer_results_than_k_when_index_small() {
        let idx = build_line_index(3);
        let hits = idx.search_knn(&[0.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_search_is_deterministic() {
        let idx = build_line_index(64);
        let a = idx.search_knn(&[7.3, 0.0], 10).unwrap();
        let b = idx.search_knn(&[7.3, 0.0], 10).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.label, y.label);
            assert_eq!(x.distance, y.distance);
        }
    }

    #[test]
    fn test_stats_accumulate() {
        let idx = build_line_index(32);
        assert_eq!(idx.query_stats().query_count(), 0);
        idx.search_knn(&[1.0, 0.0], 4).unwrap();
        idx.search_knn(&[2.0, 0.0], 4).unwrap();
        assert_eq!(idx.query_stats().query_count(), 2);
        assert!(idx.query_stats().avg_distance_computations() > 0.0);
        assert!(idx.query_stats().avg_hops() > 0.0);
    }

    #[test]
    fn test_recall_never_drops_with_larger_ef() {
        // Deterministic pseudo-random points on a 2-D grid jitter.
        let space = Space::new(SpaceKind::L2, 2).unwrap();
        let mut idx = GraphIndex::new(space, HnswConfig::with_capacity(300)).unwrap();
        let points: Vec<[f32; 2]> = (0..300)
            .map(|i| {
                let h = (i as u32).wrapping_mul(2654435761);
                [(h & 0xFFFF) as f32 / 655.35, (h >> 16) as f32 / 655.35]
            })
            .collect();
        for (i, p) in points.iter().enumerate() {
            idx.add_point(i as i64, p).unwrap();
        }

        let query = [50.0, 50.0];
        let k = 10;
        // Brute-force baseline.
        let mut exact: Vec<(f32, i64)> = points
            .iter()
            .enumerate()
            .map(|(i, p)| (crate::space::l2_squared(&query, p), i as i64))
            .collect();
        exact.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let truth: std::collections::HashSet<i64> =
            exact[..k].iter().map(|&(_, l)| l).collect();

        let mut last_recall = 0usize;
        for ef in [10usize, 40, 160, 300] {
            idx.set_ef(ef).unwrap();
            let hits = idx.search_knn(&query, k).unwrap();
            let recall = hits.iter().filter(|h| truth.contains(&h.label)).count();
            assert!(
                recall >= last_recall,
                "recall dropped from {last_recall} to {recall} at ef={ef}"
            );
            last_recall = recall;
        }
        // At ef == n the beam covers the whole component.
        assert_eq!(last_recall, k);
    }
}
