//! Clustered inverted-file index (IVF-Flat).
//!
//! A trained coarse quantizer of `nlist` centroids partitions the space;
//! each point lands in the posting list of its nearest centroid at insertion
//! time. Search probes the `nprobe` nearest lists exhaustively. State
//! machine: `Untrained → Trained → add/search/remove`.
//!
//! Posting lists are independent growable arenas (parallel label and vector
//! vectors per list), so add and remove touch one container without
//! perturbing the others.

/// Lloyd k-means for quantizer training.
pub mod kmeans;

use std::collections::HashSet;

use crate::config;
use crate::error::{IndexError, Result};
use crate::index::{Label, SearchHit};
use crate::space::Space;
use crate::stats::QueryStats;

/// Sentinel label used to pad short search results.
pub const NO_LABEL: Label = -1;

/// One centroid's points: parallel label/vector arenas.
#[derive(Debug, Default)]
pub(crate) struct PostingList {
    pub(crate) labels: Vec<Label>,
    pub(crate) vectors: Vec<f32>,
}

impl PostingList {
    pub(crate) fn len(&self) -> usize {
        self.labels.len()
    }

    fn push(&mut self, label: Label, vector: &[f32]) {
        self.labels.push(label);
        self.vectors.extend_from_slice(vector);
    }

    fn vector(&self, i: usize, dim: usize) -> &[f32] {
        &self.vectors[i * dim..(i + 1) * dim]
    }

    /// Drop every entry whose label is in `victims`. Returns the number
    /// removed.
    fn purge(&mut self, victims: &HashSet<Label>, dim: usize) -> usize {
        let before = self.labels.len();
        let mut write = 0;
        for read in 0..before {
            if victims.contains(&self.labels[read]) {
                continue;
            }
            if write != read {
                self.labels[write] = self.labels[read];
                let (dst, src) = (write * dim, read * dim);
                self.vectors.copy_within(src..src + dim, dst);
            }
            write += 1;
        }
        self.labels.truncate(write);
        self.vectors.truncate(write * dim);
        before - write
    }
}

/// Clustered inverted-file index over a fixed [`Space`].
#[derive(Debug)]
pub struct ClusteredIndex {
    pub(crate) space: Space,
    pub(crate) nlist: usize,
    /// Default probe width used when a search does not override it.
    pub(crate) nprobe: usize,
    /// Centroid arena, `nlist * dim` once trained, empty before.
    pub(crate) centroids: Vec<f32>,
    pub(crate) lists: Vec<PostingList>,
    pub(crate) trained: bool,
    pub(crate) stats: QueryStats,
}

impl ClusteredIndex {
    /// Create an untrained index with `nlist` centroid slots.
    pub fn new(space: Space, nlist: usize) -> Result<Self> {
        if nlist == 0 {
            return Err(IndexError::invalid("nlist must be non-zero"));
        }
        Ok(Self {
            space,
            nlist,
            nprobe: config::IVF_DEFAULT_NPROBE.min(nlist),
            centroids: Vec::new(),
            lists: (0..nlist).map(|_| PostingList::default()).collect(),
            trained: false,
            stats: QueryStats::new(),
        })
    }

    pub fn space(&self) -> Space {
        self.space
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }

    /// Default probe width for searches that do not pass one explicitly.
    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    /// Set the default probe width. Must be in `1..=nlist`.
    pub fn set_nprobe(&mut self, nprobe: usize) -> Result<()> {
        if nprobe == 0 || nprobe > self.nlist {
            return Err(IndexError::invalid(format!(
                "nprobe must be in 1..={}",
                self.nlist
            )));
        }
        self.nprobe = nprobe;
        Ok(())
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Total live points across all posting lists.
    pub fn ntotal(&self) -> usize {
        self.lists.iter().map(PostingList::len).sum()
    }

    /// Lifetime query statistics.
    pub fn query_stats(&self) -> &QueryStats {
        &self.stats
    }

    /// Train the coarse quantizer on `vectors` (row-major, count derived
    /// from the length).
    ///
    /// Requires at least `nlist` training vectors. Training an
    /// already-trained index is a successful no-op; retraining is out of
    /// scope.
    pub fn train(&mut self, vectors: &[f32]) -> Result<()> {
        let dim = self.space.dim();
        let n = checked_count(vectors, dim, "training buffer")?;
        if self.trained {
            return Ok(());
        }
        if n < self.nlist {
            return Err(IndexError::invalid(format!(
                "training needs at least nlist={} vectors, got {n}",
                self.nlist
            )));
        }

        let mut centroids = Vec::new();
        centroids.try_reserve_exact(self.nlist * dim)?;
        centroids.extend_from_slice(&kmeans::lloyd(
            vectors,
            dim,
            self.nlist,
            config::IVF_MAX_KMEANS_ITERATIONS,
        ));
        if centroids.len() != self.nlist * dim {
            return Err(IndexError::BuildFailure(format!(
                "quantizer produced {} centroid values, expected {}",
                centroids.len(),
                self.nlist * dim
            )));
        }

        self.centroids = centroids;
        self.trained = true;
        tracing::info!(nlist = self.nlist, n, "trained clustered index quantizer");
        Ok(())
    }

    /// Append points, each to the posting list of its nearest centroid.
    ///
    /// Duplicate labels across calls are accepted (caller responsibility).
    pub fn add_batch(&mut self, labels: &[Label], vectors: &[f32]) -> Result<()> {
        let dim = self.space.dim();
        let n = checked_count(vectors, dim, "vector buffer")?;
        if labels.len() != n {
            return Err(IndexError::invalid(format!(
                "{} labels for {n} vectors",
                labels.len()
            )));
        }
        if !self.trained {
            return Err(IndexError::NotTrained);
        }

        for (label, vector) in labels.iter().zip(vectors.chunks_exact(dim)) {
            let c = kmeans::nearest(vector, &self.centroids, dim);
            self.lists[c].push(*label, vector);
        }
        Ok(())
    }

    /// Append a single point.
    pub fn add(&mut self, label: Label, vector: &[f32]) -> Result<()> {
        self.add_batch(std::slice::from_ref(&label), vector)
    }

    /// k-nearest-neighbor search probing the `nprobe` nearest posting lists.
    ///
    /// Returns exactly `k` entries ascending by distance, padded with
    /// `(NO_LABEL, +∞)` when fewer points were found. `nprobe` is clamped to
    /// `nlist`; `nprobe == nlist` degenerates to an exact scan.
    pub fn search(&self, query: &[f32], k: usize, nprobe: usize) -> Result<Vec<SearchHit>> {
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
        if nprobe == 0 {
            return Err(IndexError::invalid("nprobe must be non-zero"));
        }
        if !self.trained {
            return Err(IndexError::NotTrained);
        }
        let nprobe = nprobe.min(self.nlist);

        // Exact scan of the quantizer for the nprobe nearest centroids.
        let mut by_centroid: Vec<(f32, usize)> = self
            .centroids
            .chunks_exact(dim)
            .enumerate()
            .map(|(c, centroid)| (crate::space::l2_squared(query, centroid), c))
            .collect();
        by_centroid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        by_centroid.truncate(nprobe);

        // Exhaustive scan of the selected lists only.
        let mut distance_computations = self.nlist as u64;
        let mut candidates: Vec<SearchHit> = Vec::new();
        for &(_, c) in &by_centroid {
            let list = &self.lists[c];
            distance_computations += list.len() as u64;
            for i in 0..list.len() {
                candidates.push(SearchHit {
                    label: list.labels[i],
                    distance: self.space.distance(query, list.vector(i, dim)),
                });
            }
        }

        // Stable sort keeps ties in probe/scan order, which is fixed for a
        // given index state.
        candidates.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(k);
        while candidates.len() < k {
            candidates.push(SearchHit {
                label: NO_LABEL,
                distance: f32::INFINITY,
            });
        }

        self.stats.record(nprobe as u64, distance_computations);
        Ok(candidates)
    }

    /// Remove points by label across all posting lists.
    ///
    /// Batch semantics: labels that are not present are silently ignored;
    /// an empty batch is a successful no-op.
    pub fn remove(&mut self, labels: &[Label]) -> Result<()> {
        if labels.is_empty() {
            return Ok(());
        }
        let victims: HashSet<Label> = labels.iter().copied().collect();
        let dim = self.space.dim();
        let mut removed = 0;
        for list in &mut self.lists {
            removed += list.purge(&victims, dim);
        }
        tracing::debug!(requested = labels.len(), removed, "removed points");
        Ok(())
    }

    /// Copy out the stored vector for `label` (first match across lists).
    pub fn get_vector(&self, label: Label) -> Result<Vec<f32>> {
        let dim = self.space.dim();
        for list in &self.lists {
            if let Some(i) = list.labels.iter().position(|&l| l == label) {
                return Ok(list.vector(i, dim).to_vec());
            }
        }
        Err(IndexError::NotFound(label))
    }
}

/// Derive the vector count from a flat buffer, rejecting empty or ragged
/// input.
fn checked_count(vectors: &[f32], dim: usize, what: &str) -> Result<usize> {
    if vectors.is_empty() {
        return Err(IndexError::invalid(format!("{what} is empty")));
    }
    if vectors.len() % dim != 0 {
        return Err(IndexError::invalid(format!(
            "{what} length {} is not a multiple of dimension {dim}",
            vectors.len()
        )));
    }
    Ok(vectors.len() / dim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::SpaceKind;

    fn l2_index(dim: usize, nlist: usize) -> ClusteredIndex {
        let space = Space::new(SpaceKind::L2, dim).unwrap();
        ClusteredIndex::new(space, nlist).unwrap()
    }

    /// Deterministic pseudo-random vectors, `n * dim` row-major.
    fn make_vectors(n: usize, dim: usize, seed: u32) -> Vec<f32> {
        (0..n * dim)
            .map(|i| {
                let h = (i as u32)
                    .wrapping_add(seed)
                    .wrapping_mul(2654435761)
                    .rotate_left(13);
                (h & 0xFFFF) as f32 / 65535.0
            })
            .collect()
    }

    #[test]
    fn test_untrained_rejects_add_and_search() {
        let mut idx = l2_index(4, 2);
        assert!(matches!(
            idx.add_batch(&[1], &[0.0; 4]),
            Err(IndexError::NotTrained)
        ));
        assert!(matches!(
            idx.search(&[0.0; 4], 1, 1),
            Err(IndexError::NotTrained)
        ));
    }

    #[test]
    fn test_train_requires_nlist_vectors() {
        let mut idx = l2_index(4, 8);
        let too_few = make_vectors(5, 4, 1);
        assert!(matches!(
            idx.train(&too_few),
            Err(IndexError::InvalidArgument(_))
        ));
        assert!(matches!(
            idx.train(&[]),
            Err(IndexError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_train_is_idempotent() {
        let mut idx = l2_index(4, 2);
        let data = make_vectors(10, 4, 7);
        idx.train(&data).unwrap();
        let centroids = idx.centroids.clone();
        // A second train call succeeds without retraining.
        idx.train(&make_vectors(10, 4, 99)).unwrap();
        assert_eq!(idx.centroids, centroids);
    }

    #[test]
    fn test_self_match_with_full_probe() {
        // dim 8, nlist 4: train on 16 vectors, add them with ids 0..15,
        // then search each with k=1 nprobe=4 (full scan).
        let mut idx = l2_index(8, 4);
        let data = make_vectors(16, 8, 42);
        idx.train(&data).unwrap();
        let ids: Vec<Label> = (0..16).collect();
        idx.add_batch(&ids, &data).unwrap();
        assert_eq!(idx.ntotal(), 16);

        for (i, query) in data.chunks_exact(8).enumerate() {
            let hits = idx.search(query, 1, 4).unwrap();
            assert_eq!(hits[0].label, i as Label);
            assert_eq!(hits[0].distance, 0.0);
        }
    }

    #[test]
    fn test_padding_sentinel() {
        let mut idx = l2_index(2, 2);
        let data = vec![0.0, 0.0, 10.0, 10.0];
        idx.train(&data).unwrap();
        idx.add_batch(&[5], &[0.0, 0.0]).unwrap();

        let hits = idx.search(&[0.0, 0.0], 4, 2).unwrap();
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[0].label, 5);
        for hit in &hits[1..] {
            assert_eq!(hit.label, NO_LABEL);
            assert_eq!(hit.distance, f32::INFINITY);
        }
    }

    #[test]
    fn test_remove_is_silent_for_unknown_ids() {
        let mut idx = l2_index(2, 2);
        idx.train(&make_vectors(8, 2, 3)).unwrap();
        idx.add_batch(&[1, 2, 3], &make_vectors(3, 2, 3)).unwrap();
        idx.remove(&[2, 999]).unwrap();
        assert_eq!(idx.ntotal(), 2);
        idx.remove(&[]).unwrap();
        assert_eq!(idx.ntotal(), 2);
    }

    #[test]
    fn test_removed_labels_never_returned() {
        let mut idx = l2_index(2, 2);
        let data = make_vectors(12, 2, 11);
        idx.train(&data).unwrap();
        let ids: Vec<Label> = (0..12).collect();
        idx.add_batch(&ids, &data).unwrap();

        idx.remove(&[4]).unwrap();
        let query = &data[8..10];
        let hits = idx.search(query, 12, 2).unwrap();
        assert!(hits.iter().all(|h| h.label != 4));
    }

    #[test]
    fn test_duplicate_ids_accepted() {
        let mut idx = l2_index(2, 2);
        idx.train(&make_vectors(4, 2, 5)).unwrap();
        idx.add(7, &[0.5, 0.5]).unwrap();
        idx.add(7, &[0.6, 0.6]).unwrap();
        assert_eq!(idx.ntotal(), 2);
        // Remove strips every occurrence.
        idx.remove(&[7]).unwrap();
        assert_eq!(idx.ntotal(), 0);
    }

    #[test]
    fn test_recall_never_drops_with_larger_nprobe() {
        let mut idx = l2_index(4, 8);
        let data = make_vectors(200, 4, 17);
        idx.train(&data).unwrap();
        let ids: Vec<Label> = (0..200).collect();
        idx.add_batch(&ids, &data).unwrap();

        let query = &data[40..44];
        let k = 10;
        // nprobe == nlist is the exact baseline.
        let exact: Vec<Label> = idx
            .search(query, k, 8)
            .unwrap()
            .iter()
            .map(|h| h.label)
            .collect();
        let truth: HashSet<Label> = exact.into_iter().collect();

        let mut last_recall = 0usize;
        for nprobe in [1usize, 2, 4, 8] {
            let hits = idx.search(query, k, nprobe).unwrap();
            let recall = hits.iter().filter(|h| truth.contains(&h.label)).count();
            assert!(
                recall >= last_recall,
                "recall dropped from {last_recall} to {recall} at nprobe={nprobe}"
            );
            last_recall = recall;
        }
        assert_eq!(last_recall, k);
    }

    #[test]
    fn test_get_vector() {
        let mut idx = l2_index(2, 2);
        idx.train(&make_vectors(4, 2, 9)).unwrap();
        idx.add(3, &[0.25, 0.75]).unwrap();
        assert_eq!(idx.get_vector(3).unwrap(), vec![0.25, 0.75]);
        assert!(matches!(idx.get_vector(4), Err(IndexError::NotFound(4))));
    }

    #[test]
    fn test_set_nprobe_bounds() {
        let mut idx = l2_index(2, 4);
        idx.set_nprobe(4).unwrap();
        assert!(idx.set_nprobe(0).is_err());
        assert!(idx.set_nprobe(5).is_err());
    }

    #[test]
    fn test_search_stats_accumulate() {
        let mut idx = l2_index(2, 2);
        let data = make_vectors(8, 2, 21);
        idx.train(&data).unwrap();
        idx.add_batch(&[0, 1, 2, 3, 4, 5, 6, 7], &data).unwrap();
        idx.search(&[0.5, 0.5], 3, 2).unwrap();
        assert_eq!(idx.query_stats().query_count(), 1);
        // Centroid scan alone contributes nlist computations.
        assert!(idx.query_stats().avg_distance_computations() >= 2.0);
        assert_eq!(idx.query_stats().avg_hops(), 2.0);
    }
}
