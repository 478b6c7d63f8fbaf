//! Persistence: versioned, checksummed index snapshots.
//!
//! Either index family serializes to a single byte stream (bincode payload
//! framed by a magic/version header and a CRC32 footer) and reconstructs to
//! a search-equivalent index. Path-based saves are atomic (temp file +
//! rename).

/// Snapshot codec: save/load for both index families.
pub mod snapshot;

pub use snapshot::{SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
