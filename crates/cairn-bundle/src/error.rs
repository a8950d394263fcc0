use cairn_store::StoreError;
use cairn_types::BlobHash;
use thiserror::Error;

use crate::codec::BundleCodec;
use crate::format::BundleId;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("invalid bundle magic: got {actual:?}")]
    InvalidMagic { actual: String },

    #[error("unsupported bundle format version: {0}")]
    UnsupportedVersion(u16),

    #[error("unknown codec id: {0}")]
    UnknownCodec(u8),

    #[error("bundle checksum mismatch")]
    ChecksumMismatch,

    #[error("truncated bundle: {0}")]
    Truncated(String),

    #[error("corrupt bundle index: {0}")]
    CorruptIndex(String),

    #[error("CRC32 mismatch for blob {hash} in bundle {bundle_id}")]
    CrcMismatch { hash: BlobHash, bundle_id: BundleId },

    #[error("{codec} compression failed: {reason}")]
    Compression { codec: BundleCodec, reason: String },

    #[error("{codec} decompression failed for bundle {bundle_id}: {reason}")]
    Decompression {
        codec: BundleCodec,
        bundle_id: BundleId,
        reason: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BundleResult<T> = Result<T, BundleError>;

impl From<BundleError> for StoreError {
    fn from(err: BundleError) -> Self {
        match err {
            BundleError::Io(e) => StoreError::Io(e),
            other => StoreError::Backend(Box::new(other)),
        }
    }
}
