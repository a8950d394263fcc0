use cairn_store::StoreError;
use cairn_types::Cancelled;

/// Errors from the blob pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid pipeline options: {0}")]
    InvalidOptions(String),

    /// `submit` was called after `finish_submitting`, or every worker exited.
    #[error("pipeline is closed")]
    Closed,

    /// A blocking read task panicked or was aborted.
    #[error("worker failed: {0}")]
    Worker(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for PipelineError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
