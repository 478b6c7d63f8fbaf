//! Error taxonomy for the index engine.
//!
//! Every fault that can cross the engine boundary is one of these variants;
//! internal failures are converted before they reach the caller. Recoverable
//! conditions are reported, never retried internally.

use thiserror::Error;

use crate::index::Label;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, IndexError>;

/// All failures the engine reports to callers.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Malformed input: zero-sized buffer, bad dimension, unknown tag,
    /// or an operation the index family does not support.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A clustered-index operation was attempted before `train`.
    #[error("index is not trained")]
    NotTrained,

    /// The label was never inserted into the index.
    #[error("label {0} not found")]
    NotFound(Label),

    /// The label is already present in the graph index.
    #[error("label {0} already present")]
    DuplicateLabel(Label),

    /// The graph index is at its configured element ceiling.
    #[error("capacity exceeded: index is limited to {capacity} elements")]
    CapacityExceeded { capacity: usize },

    /// Training or construction failed internally.
    #[error("index build failed: {0}")]
    BuildFailure(String),

    /// An allocation the operation required could not be satisfied.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// A snapshot could not be decoded: bad magic, unsupported version,
    /// checksum mismatch, or inconsistent structural state.
    #[error("corrupt snapshot: {0}")]
    CorruptData(String),

    /// Caller-declared dimension disagrees with the stored one.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An underlying I/O operation failed.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all internal fault. Logged with cause at the boundary.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IndexError {
    /// Shorthand for [`IndexError::InvalidArgument`] from any message type.
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        IndexError::InvalidArgument(msg.into())
    }
}

impl From<std::collections::TryReserveError> for IndexError {
    fn from(e: std::collections::TryReserveError) -> Self {
        IndexError::OutOfMemory(e.to_string())
    }
}
