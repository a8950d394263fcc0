use cairn_store::{BlobType, StoreError};
use cairn_types::{BlobHash, Cancelled};

/// Errors from chunking and chunked data trees.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("invalid chunking options: {0}")]
    InvalidOptions(String),

    /// A blob in the tree is neither a leaf nor an interior node.
    #[error("blob {hash} has unexpected type {blob_type}")]
    UnexpectedType { hash: BlobHash, blob_type: BlobType },

    #[error("corrupt node {hash}: {reason}")]
    Corrupt { hash: BlobHash, reason: String },

    #[error("range {offset}+{length} exceeds stream length {total}")]
    OutOfRange { offset: u64, length: u64, total: u64 },

    /// Recomputed stream content does not match what was recorded.
    #[error("stream verification failed: expected {expected} ({expected_len} bytes), actual {actual} ({actual_len} bytes)")]
    VerifyFailed {
        expected: BlobHash,
        expected_len: u64,
        actual: BlobHash,
        actual_len: u64,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for ChunkError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Result alias for chunking operations.
pub type ChunkResult<T> = Result<T, ChunkError>;
