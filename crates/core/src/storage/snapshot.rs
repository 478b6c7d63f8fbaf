//! Snapshot codec for both index families.
//!
//! Byte layout: `[magic "PXI1"][version u16 LE][bincode envelope][CRC32 BE]`.
//! The CRC covers the bincode payload only. The envelope carries the family
//! tag, space kind, and dimension ahead of the structural payload, so a
//! loader can reject mismatches before touching the structure. Decoded
//! snapshots are structurally validated (array lengths, id bounds, entry
//! point) before an index is built from them; any violation is
//! `CorruptData`.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::AtomicUsize;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::hnsw::graph::{GraphIndex, HnswConfig};
use crate::index::{IndexFamily, Label};
use crate::ivf::{ClusteredIndex, PostingList};
use crate::space::{Space, SpaceKind};
use crate::stats::QueryStats;

/// Magic bytes opening every snapshot.
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"PXI1";

/// Current snapshot format version. Older or newer versions are rejected
/// with `CorruptData` rather than misparsed.
pub const SNAPSHOT_VERSION: u16 = 1;

/// Everything a snapshot stores, in decode order.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SnapshotEnvelope {
    pub family: IndexFamily,
    pub space: SpaceKind,
    pub dimension: u32,
    pub payload: SnapshotPayload,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum SnapshotPayload {
    Graph(GraphSnapshot),
    Clustered(ClusteredSnapshot),
}

/// Full structural state of a graph index. Neighbor lists are persisted in
/// stored order, and the runtime `ef` rides along, so post-load searches
/// reproduce pre-save results exactly.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct GraphSnapshot {
    pub config: HnswConfig,
    pub vectors: Vec<f32>,
    pub neighbors: Vec<Vec<Vec<u32>>>,
    pub layers: Vec<u8>,
    pub deleted: Vec<bool>,
    pub labels: Vec<Label>,
    pub entry_point: Option<u32>,
    pub max_layer: u32,
    pub ef_search: u32,
}

/// Full structural state of a clustered index.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ClusteredSnapshot {
    pub nlist: u32,
    pub nprobe: u32,
    pub trained: bool,
    pub centroids: Vec<f32>,
    pub lists: Vec<(Vec<Label>, Vec<f32>)>,
}

// ── Encoding ───────────────────────────────────────────────────────────

impl GraphIndex {
    pub(crate) fn to_snapshot(&self) -> SnapshotEnvelope {
        SnapshotEnvelope {
            family: IndexFamily::Graph,
            space: self.space.kind(),
            dimension: self.space.dim() as u32,
            payload: SnapshotPayload::Graph(GraphSnapshot {
                config: self.config.clone(),
                vectors: self.vectors.clone(),
                neighbors: self.neighbors.clone(),
                layers: self.layers.clone(),
                deleted: self.deleted.clone(),
                labels: self.labels.clone(),
                entry_point: self.entry_point,
                max_layer: self.max_layer as u32,
                ef_search: self.ef() as u32,
            }),
        }
    }
}

impl ClusteredIndex {
    pub(crate) fn to_snapshot(&self) -> SnapshotEnvelope {
        SnapshotEnvelope {
            family: IndexFamily::Clustered,
            space: self.space.kind(),
            dimension: self.space.dim() as u32,
            payload: SnapshotPayload::Clustered(ClusteredSnapshot {
                nlist: self.nlist as u32,
                nprobe: self.nprobe as u32,
                trained: self.trained,
                centroids: self.centroids.clone(),
                lists: self
                    .lists
                    .iter()
                    .map(|l| (l.labels.clone(), l.vectors.clone()))
                    .collect(),
            }),
        }
    }
}

/// Serialize an envelope to `sink` with header and CRC footer.
pub(crate) fn write_snapshot(envelope: &SnapshotEnvelope, sink: &mut dyn Write) -> Result<()> {
    let payload = bincode::serialize(envelope).map_err(|e| {
        tracing::error!(error = %e, "snapshot encoding failed");
        IndexError::Internal(format!("snapshot encoding failed: {e}"))
    })?;
    let crc = crc32fast::hash(&payload);

    sink.write_all(SNAPSHOT_MAGIC)?;
    sink.write_all(&SNAPSHOT_VERSION.to_le_bytes())?;
    sink.write_all(&payload)?;
    sink.write_all(&crc.to_be_bytes())?;
    sink.flush()?;
    tracing::info!(
        bytes = payload.len(),
        crc = format_args!("{crc:#010x}"),
        "saved index snapshot"
    );
    Ok(())
}

/// Read and verify a snapshot from `source`.
pub(crate) fn read_snapshot(source: &mut dyn Read) -> Result<SnapshotEnvelope> {
    let mut raw = Vec::new();
    source.read_to_end(&mut raw)?;

    // Header (6) + footer (4) frame a non-empty payload.
    if raw.len() < 11 {
        return Err(IndexError::CorruptData(format!(
            "snapshot truncated at {} bytes",
            raw.len()
        )));
    }
    if &raw[..4] != SNAPSHOT_MAGIC {
        return Err(IndexError::CorruptData("bad magic bytes".into()));
    }
    let version = u16::from_le_bytes([raw[4], raw[5]]);
    if version != SNAPSHOT_VERSION {
        return Err(IndexError::CorruptData(format!(
            "unsupported snapshot version {version} (expected {SNAPSHOT_VERSION})"
        )));
    }

    let n = raw.len();
    let payload = &raw[6..n - 4];
    let stored_crc = u32::from_be_bytes([raw[n - 4], raw[n - 3], raw[n - 2], raw[n - 1]]);
    let computed_crc = crc32fast::hash(payload);
    if stored_crc != computed_crc {
        return Err(IndexError::CorruptData(format!(
            "CRC32 mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
        )));
    }

    let envelope: SnapshotEnvelope = bincode::deserialize(payload)
        .map_err(|e| IndexError::CorruptData(format!("undecodable payload: {e}")))?;
    tracing::info!(
        family = envelope.family.tag(),
        dimension = envelope.dimension,
        "loaded index snapshot"
    );
    Ok(envelope)
}

/// Atomic path-based save: write `<path>.tmp`, then rename over `path`.
pub(crate) fn write_snapshot_file(envelope: &SnapshotEnvelope, path: &Path) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let mut file = std::fs::File::create(&tmp)?;
    write_snapshot(envelope, &mut file)?;
    file.sync_all()?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ── Decoding ───────────────────────────────────────────────────────────

impl GraphSnapshot {
    /// Validate structural consistency and rebuild the index.
    pub(crate) fn into_index(self, space: Space) -> Result<GraphIndex> {
        let n = self.labels.len();
        let dim = space.dim();

        if self.vectors.len() != n * dim {
            return Err(corrupt(format!(
                "vector arena holds {} values for {n} nodes of dimension {dim}",
                self.vectors.len()
            )));
        }
        if self.neighbors.len() != n || self.layers.len() != n || self.deleted.len() != n {
            return Err(corrupt("parallel node arrays disagree in length"));
        }
        self.config
            .validate()
            .map_err(|e| corrupt(format!("stored config invalid: {e}")))?;

        let mut label_map = HashMap::with_capacity(n);
        for (id, &label) in self.labels.iter().enumerate() {
            if label_map.insert(label, id as u32).is_some() {
                return Err(corrupt(format!("label {label} appears twice")));
            }
        }

        let mut max_node_layer = 0usize;
        for (id, node_layers) in self.neighbors.iter().enumerate() {
            let declared = self.layers[id] as usize;
            if node_layers.len() != declared + 1 {
                return Err(corrupt(format!(
                    "node {id} declares layer {declared} but stores {} lists",
                    node_layers.len()
                )));
            }
            max_node_layer = max_node_layer.max(declared);
            for list in node_layers {
                for &nbr in list {
                    if nbr as usize >= n {
                        return Err(corrupt(format!(
                            "node {id} references out-of-bounds neighbor {nbr}"
                        )));
                    }
                }
            }
        }

        match self.entry_point {
            Some(ep) if ep as usize >= n => {
                return Err(corrupt(format!("entry point {ep} out of bounds")));
            }
            None if n > 0 => {
                return Err(corrupt("populated graph without an entry point"));
            }
            _ => {}
        }
        if self.max_layer as usize != max_node_layer && n > 0 {
            return Err(corrupt(format!(
                "stored max layer {} disagrees with node layers ({max_node_layer})",
                self.max_layer
            )));
        }
        if self.ef_search == 0 {
            return Err(corrupt("stored ef is zero"));
        }
        if n > self.config.capacity {
            return Err(corrupt(format!(
                "{n} nodes exceed stored capacity {}",
                self.config.capacity
            )));
        }

        let deleted_count = self.deleted.iter().filter(|&&d| d).count();
        Ok(GraphIndex {
            space,
            config: self.config,
            vectors: self.vectors,
            neighbors: self.neighbors,
            layers: self.layers,
            deleted: self.deleted,
            labels: self.labels,
            label_map,
            entry_point: self.entry_point,
            max_layer: self.max_layer as usize,
            deleted_count,
            ef_search: AtomicUsize::new(self.ef_search as usize),
            stats: QueryStats::new(),
        })
    }
}

impl ClusteredSnapshot {
    /// Validate structural consistency and rebuild the index.
    pub(crate) fn into_index(self, space: Space) -> Result<ClusteredIndex> {
        let dim = space.dim();
        let nlist = self.nlist as usize;
        if nlist == 0 {
            return Err(corrupt("nlist is zero"));
        }
        if self.lists.len() != nlist {
            return Err(corrupt(format!(
                "{} posting lists for nlist={nlist}",
                self.lists.len()
            )));
        }
        let expected_centroids = if self.trained { nlist * dim } else { 0 };
        if self.centroids.len() != expected_centroids {
            return Err(corrupt(format!(
                "centroid arena holds {} values, expected {expected_centroids}",
                self.centroids.len()
            )));
        }
        let nprobe = self.nprobe as usize;
        if nprobe == 0 || nprobe > nlist {
            return Err(corrupt(format!("stored nprobe {nprobe} out of 1..={nlist}")));
        }

        let mut lists = Vec::with_capacity(nlist);
        for (c, (labels, vectors)) in self.lists.into_iter().enumerate() {
            if vectors.len() != labels.len() * dim {
                return Err(corrupt(format!(
                    "posting list {c} holds {} values for {} labels",
                    vectors.len(),
                    labels.len()
                )));
            }
            if !self.trained && !labels.is_empty() {
                return Err(corrupt("untrained index with populated posting lists"));
            }
            lists.push(PostingList { labels, vectors });
        }

        Ok(ClusteredIndex {
            space,
            nlist,
            nprobe,
            centroids: self.centroids,
            lists,
            trained: self.trained,
            stats: QueryStats::new(),
        })
    }
}

fn corrupt(msg: impl Into<String>) -> IndexError {
    IndexError::CorruptData(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::VectorIndex;

    fn sample_graph() -> VectorIndex {
        let idx = VectorIndex::graph(SpaceKind::L2, 4, HnswConfig::with_capacity(64)).unwrap();
        for i in 0..20i64 {
            let v = [i as f32, (i * i % 7) as f32, 0.5, -(i as f32)];
            idx.add(i, &v).unwrap();
        }
        idx.remove(&[3]).unwrap();
        idx
    }

    fn snapshot_bytes(idx: &VectorIndex) -> Vec<u8> {
        let mut buf = Vec::new();
        idx.save_to_writer(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_graph_round_trip_search_identical() {
        let idx = sample_graph();
        let bytes = snapshot_bytes(&idx);
        let restored = VectorIndex::load_from_reader(&mut bytes.as_slice()).unwrap();

        for q in 0..20 {
            let query = [q as f32, 0.0, 0.5, -(q as f32)];
            let before = idx.search(&query, 5).unwrap();
            let after = restored.search(&query, 5).unwrap();
            assert_eq!(before.len(), after.len());
            for (b, a) in before.iter().zip(&after) {
                assert_eq!(b.label, a.label);
                assert_eq!(b.distance, a.distance);
            }
        }
        // Delete flags survive.
        assert_eq!(restored.stats().deleted_count, 1);
    }

    #[test]
    fn test_clustered_round_trip_search_identical() {
        let idx = VectorIndex::clustered(SpaceKind::L2, 2, 4).unwrap();
        let data: Vec<f32> = (0..32).map(|i| (i % 9) as f32).collect();
        idx.train(&data).unwrap();
        let ids: Vec<Label> = (0..16).collect();
        idx.add_batch(&ids, &data).unwrap();

        let bytes = snapshot_bytes(&idx);
        let restored = VectorIndex::load_from_reader(&mut bytes.as_slice()).unwrap();
        assert_eq!(restored.len(), 16);

        for q in data.chunks_exact(2) {
            let before = idx.search_with_nprobe(q, 3, 4).unwrap();
            let after = restored.search_with_nprobe(q, 3, 4).unwrap();
            for (b, a) in before.iter().zip(&after) {
                assert_eq!(b.label, a.label);
                assert_eq!(b.distance, a.distance);
            }
        }
    }

    #[test]
    fn test_untrained_clustered_round_trip() {
        let idx = VectorIndex::clustered(SpaceKind::InnerProduct, 3, 2).unwrap();
        let bytes = snapshot_bytes(&idx);
        let restored = VectorIndex::load_from_reader(&mut bytes.as_slice()).unwrap();
        assert!(matches!(
            restored.search(&[0.0; 3], 1),
            Err(IndexError::NotTrained)
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = snapshot_bytes(&sample_graph());
        bytes[0] = b'X';
        assert!(matches!(
            VectorIndex::load_from_reader(&mut bytes.as_slice()),
            Err(IndexError::CorruptData(_))
        ));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut bytes = snapshot_bytes(&sample_graph());
        bytes[4] = SNAPSHOT_VERSION as u8 + 1;
        let err = VectorIndex::load_from_reader(&mut bytes.as_slice()).unwrap_err();
        match err {
            IndexError::CorruptData(msg) => assert!(msg.contains("version")),
            other => panic!("expected CorruptData, got {other:?}"),
        }
    }

    #[test]
    fn test_flipped_payload_byte_fails_crc() {
        let mut bytes = snapshot_bytes(&sample_graph());
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        let err = VectorIndex::load_from_reader(&mut bytes.as_slice()).unwrap_err();
        match err {
            IndexError::CorruptData(msg) => assert!(msg.contains("CRC32")),
            other => panic!("expected CorruptData, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let bytes = snapshot_bytes(&sample_graph());
        let mut short = &bytes[..8];
        assert!(matches!(
            VectorIndex::load_from_reader(&mut short),
            Err(IndexError::CorruptData(_))
        ));
    }

    #[test]
    fn test_checked_load_dimension_mismatch() {
        let bytes = snapshot_bytes(&sample_graph());
        let err = VectorIndex::load_from_reader_checked(&mut bytes.as_slice(), 8, SpaceKind::L2)
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 8,
                actual: 4
            }
        ));
    }

    #[test]
    fn test_checked_load_space_mismatch() {
        let bytes = snapshot_bytes(&sample_graph());
        let err = VectorIndex::load_from_reader_checked(
            &mut bytes.as_slice(),
            4,
            SpaceKind::InnerProduct,
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::InvalidArgument(_)));
    }

    #[test]
    fn test_path_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.pxi");
        let idx = sample_graph();
        idx.save_to_path(&path).unwrap();
        let restored = VectorIndex::load_from_path(&path).unwrap();
        assert_eq!(restored.len(), idx.len());
    }
}
