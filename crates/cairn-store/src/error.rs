use std::collections::BTreeSet;

use cairn_types::{BlobHash, Cancelled};

use crate::handle::PendingBlob;

/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested blob is not present in the store.
    #[error("blob not found: {0}")]
    NotFound(BlobHash),

    /// A caller-supplied hash does not match the payload.
    #[error("hash mismatch: expected {expected}, actual {actual}")]
    HashMismatch { expected: BlobHash, actual: BlobHash },

    /// Graph resolution reached blobs the store does not hold.
    #[error("{} blob(s) missing from the store", .0.len())]
    MissingBlobs(BTreeSet<BlobHash>),

    /// A pending handle from a different writer session was used.
    #[error("handle {0} belongs to another writer session")]
    ForeignHandle(PendingBlob),

    /// A pending handle that was never issued by this session.
    #[error("unknown pending handle {0}")]
    UnknownHandle(PendingBlob),

    /// A pending handle whose blob has not been flushed yet.
    #[error("handle {0} has not been flushed")]
    Unflushed(PendingBlob),

    /// The blob data is malformed or cannot be decoded.
    #[error("corrupt blob {hash}: {reason}")]
    Corrupt { hash: BlobHash, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure inside a storage backend (bundle codec, index, ...).
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("operation cancelled")]
    Cancelled,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<Cancelled> for StoreError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
