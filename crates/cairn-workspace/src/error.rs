use cairn_chunk::ChunkError;
use cairn_pipeline::PipelineError;
use cairn_store::StoreError;
use cairn_tree::TreeError;
use cairn_types::Cancelled;

/// Fatal workspace errors.
///
/// Problems with individual files do not abort a sync; they are collected as
/// [`SyncFailure`](crate::SyncFailure)s in the report instead.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("invalid layer id {id:?}: {reason}")]
    InvalidLayer { id: String, reason: String },

    #[error("layer not found: {0}")]
    LayerNotFound(String),

    #[error("manifest for layer {layer} is unreadable: {reason}")]
    Manifest { layer: String, reason: String },

    #[error("invalid workspace path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("workspace root is not a directory: {0}")]
    NotADirectory(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("chunked data error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for WorkspaceError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Result alias for workspace operations.
pub type WorkspaceResult<T> = Result<T, WorkspaceError>;
