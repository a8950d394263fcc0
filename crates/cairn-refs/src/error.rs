//! Error types for ref and alias operations.

use cairn_types::BlobHash;
use thiserror::Error;

fn describe(hash: &Option<BlobHash>) -> String {
    hash.map(|h| h.short_hex()).unwrap_or_else(|| "<none>".into())
}

/// Errors that can occur during ref and alias operations.
#[derive(Debug, Error)]
pub enum RefError {
    /// The ref was not found.
    #[error("ref not found: {name}")]
    NotFound { name: String },

    /// The ref or alias name is invalid.
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// A compare-and-swap lost a race: the ref held a different value.
    #[error(
        "ref {name} changed concurrently: expected {}, found {}",
        describe(.expected),
        describe(.actual)
    )]
    Conflict {
        name: String,
        expected: Option<BlobHash>,
        actual: Option<BlobHash>,
    },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error during file-based operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for ref operations.
pub type Result<T> = std::result::Result<T, RefError>;
