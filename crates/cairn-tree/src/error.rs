use cairn_chunk::ChunkError;
use cairn_store::StoreError;
use cairn_types::{BlobHash, Cancelled};

/// Errors from directory tree operations.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("invalid entry name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("path not found: {0}")]
    PathNotFound(String),

    #[error("corrupt directory node {hash}: {reason}")]
    Corrupt { hash: BlobHash, reason: String },

    /// An entry still points at a blob that has not been flushed.
    #[error("entry {0:?} refers to an unflushed blob")]
    Unflushed(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for TreeError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl From<zip::result::ZipError> for TreeError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Archive(e.to_string())
    }
}

/// Result alias for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;
