use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] cairn_store::StoreError),

    #[error("bundle error: {0}")]
    Bundle(#[from] cairn_bundle::BundleError),

    #[error("ref error: {0}")]
    Ref(#[from] cairn_refs::RefError),

    #[error("chunking error: {0}")]
    Chunk(#[from] cairn_chunk::ChunkError),

    #[error("tree error: {0}")]
    Tree(#[from] cairn_tree::TreeError),

    #[error("workspace error: {0}")]
    Workspace(#[from] cairn_workspace::WorkspaceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SdkResult<T> = Result<T, SdkError>;
