use cairn_types::BlobHash;

use crate::blob::BlobData;
use crate::error::{StoreError, StoreResult};

/// Content-addressed blob store.
///
/// All implementations must satisfy these invariants:
/// - Blobs are immutable once written; writing an existing hash is a no-op.
/// - `write_batch` publishes the whole batch or nothing visible to readers.
/// - Concurrent reads are always safe.
/// - All I/O errors are propagated, never silently ignored.
pub trait BlobStore: Send + Sync {
    /// Read a blob by hash.
    ///
    /// Returns `Ok(None)` if the blob does not exist.
    /// Returns `Err` on I/O failure or data corruption.
    fn read(&self, hash: &BlobHash) -> StoreResult<Option<BlobData>>;

    /// Check whether a blob exists in the store.
    fn exists(&self, hash: &BlobHash) -> StoreResult<bool>;

    /// Store a batch of blobs keyed by their precomputed hashes.
    ///
    /// Hashes must come from [`BlobData::compute_hash`]. Backends that pack
    /// blobs into bundles write one bundle per call.
    fn write_batch(&self, blobs: Vec<(BlobHash, BlobData)>) -> StoreResult<()>;

    /// Write a single blob and return its hash.
    fn write(&self, blob: BlobData) -> StoreResult<BlobHash> {
        let hash = blob.compute_hash();
        self.write_batch(vec![(hash, blob)])?;
        Ok(hash)
    }

    /// Read a blob that must exist, mapping absence to [`StoreError::NotFound`].
    fn fetch(&self, hash: &BlobHash) -> StoreResult<BlobData> {
        self.read(hash)?.ok_or(StoreError::NotFound(*hash))
    }

    /// Read multiple blobs.
    ///
    /// Default implementation calls `read()` for each hash. Backends may
    /// override for better performance.
    fn read_batch(&self, hashes: &[BlobHash]) -> StoreResult<Vec<Option<BlobData>>> {
        hashes.iter().map(|hash| self.read(hash)).collect()
    }
}
