use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use cairn_types::BlobHash;
use tracing::{debug, warn};

use crate::blob::{blob_hash, BlobData, BlobType};
use crate::error::{StoreError, StoreResult};
use crate::handle::{BlobHandle, PendingBlob};
use crate::traits::BlobStore;

/// Pending payload size at which a session flushes on its own.
pub const DEFAULT_MAX_PENDING_BYTES: usize = 16 * 1024 * 1024;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

struct Entry {
    blob_type: BlobType,
    payload: Option<Bytes>,
    refs: Vec<BlobHandle>,
    hash: Option<BlobHash>,
}

/// A write session over a [`BlobStore`].
///
/// `write` returns a pending handle immediately without hashing. Pending
/// handles from this session can be passed as refs to later writes, so a
/// tree can be assembled bottom-up before any hash is known. `flush` hashes
/// every pending blob in write order and hands them to the store as one
/// batch (one bundle for bundle-backed stores).
pub struct BlobWriter {
    store: Arc<dyn BlobStore>,
    session: u64,
    entries: Vec<Entry>,
    flushed: usize,
    pending_bytes: usize,
    max_pending_bytes: usize,
}

impl BlobWriter {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            session: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
            entries: Vec::new(),
            flushed: 0,
            pending_bytes: 0,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
        }
    }

    /// Flush automatically once this many payload bytes are pending.
    pub fn with_max_pending_bytes(mut self, max: usize) -> Self {
        self.max_pending_bytes = max.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Blobs written but not yet flushed.
    pub fn pending_count(&self) -> usize {
        self.entries.len() - self.flushed
    }

    /// Queue a blob and return a handle to it.
    ///
    /// `refs` may mix hashed handles and pending handles issued earlier by
    /// this session.
    pub fn write(
        &mut self,
        blob_type: BlobType,
        payload: impl Into<Bytes>,
        refs: &[BlobHandle],
    ) -> StoreResult<BlobHandle> {
        for r in refs {
            if let BlobHandle::Pending(pending) = r {
                self.check_owned(pending)?;
            }
        }
        let payload = payload.into();
        let index = u32::try_from(self.entries.len())
            .map_err(|_| StoreError::Serialization("writer session is full".into()))?;
        self.pending_bytes += payload.len();
        self.entries.push(Entry {
            blob_type,
            payload: Some(payload),
            refs: refs.to_vec(),
            hash: None,
        });
        let handle = BlobHandle::Pending(PendingBlob::new(self.session, index));
        if self.pending_bytes >= self.max_pending_bytes {
            self.flush()?;
        }
        Ok(handle)
    }

    /// Like [`write`](Self::write), but rejects the payload unless its plain
    /// BLAKE3 hash equals `expected`.
    pub fn write_verified(
        &mut self,
        blob_type: BlobType,
        payload: impl Into<Bytes>,
        refs: &[BlobHandle],
        expected: BlobHash,
    ) -> StoreResult<BlobHandle> {
        let payload = payload.into();
        let actual = BlobHash::from_bytes(&payload);
        if actual != expected {
            return Err(StoreError::HashMismatch { expected, actual });
        }
        self.write(blob_type, payload, refs)
    }

    /// Hash and store every pending blob. Returns the number of blobs stored.
    pub fn flush(&mut self) -> StoreResult<usize> {
        if self.flushed == self.entries.len() {
            return Ok(0);
        }
        let mut batch = Vec::with_capacity(self.entries.len() - self.flushed);
        for i in self.flushed..self.entries.len() {
            let refs = self.entries[i]
                .refs
                .iter()
                .map(|r| self.resolve_for_flush(r, i))
                .collect::<StoreResult<Vec<_>>>()?;
            let entry = &mut self.entries[i];
            let payload = entry.payload.clone().unwrap_or_default();
            let hash = blob_hash(entry.blob_type, &payload, &refs);
            entry.hash = Some(hash);
            batch.push((hash, BlobData::new(entry.blob_type, payload, refs)));
        }
        let count = batch.len();
        self.store.write_batch(batch)?;
        for entry in &mut self.entries[self.flushed..] {
            entry.payload = None;
        }
        self.flushed = self.entries.len();
        self.pending_bytes = 0;
        debug!(session = self.session, count, "flushed blob batch");
        Ok(count)
    }

    /// Resolve a handle to its hash. Pending handles resolve after flush.
    pub fn resolve(&self, handle: &BlobHandle) -> StoreResult<BlobHash> {
        match handle {
            BlobHandle::Hashed(hash) => Ok(*hash),
            BlobHandle::Pending(pending) => {
                self.check_owned(pending)?;
                self.entries[pending.index()]
                    .hash
                    .ok_or(StoreError::Unflushed(*pending))
            }
        }
    }

    /// Flush, then resolve.
    pub fn flush_and_resolve(&mut self, handle: &BlobHandle) -> StoreResult<BlobHash> {
        self.flush()?;
        self.resolve(handle)
    }

    fn check_owned(&self, pending: &PendingBlob) -> StoreResult<()> {
        if pending.session() != self.session {
            return Err(StoreError::ForeignHandle(*pending));
        }
        if pending.index() >= self.entries.len() {
            return Err(StoreError::UnknownHandle(*pending));
        }
        Ok(())
    }

    // Refs always point at earlier entries, so hashing in write order sees
    // every dependency already hashed.
    fn resolve_for_flush(&self, handle: &BlobHandle, current: usize) -> StoreResult<BlobHash> {
        match handle {
            BlobHandle::Hashed(hash) => Ok(*hash),
            BlobHandle::Pending(pending) if pending.index() < current => self.entries
                [pending.index()]
            .hash
            .ok_or(StoreError::Unflushed(*pending)),
            BlobHandle::Pending(pending) => Err(StoreError::UnknownHandle(*pending)),
        }
    }
}

impl Drop for BlobWriter {
    fn drop(&mut self) {
        let pending = self.pending_count();
        if pending > 0 {
            warn!(session = self.session, pending, "blob writer dropped with unflushed blobs");
        }
    }
}

impl std::fmt::Debug for BlobWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobWriter")
            .field("session", &self.session)
            .field("written", &self.entries.len())
            .field("pending", &self.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBlobStore;

    const NODE: BlobType = BlobType::new(0x4e4f_4445, 1);

    fn writer() -> (Arc<InMemoryBlobStore>, BlobWriter) {
        let store = Arc::new(InMemoryBlobStore::new());
        let writer = BlobWriter::new(store.clone());
        (store, writer)
    }

    #[test]
    fn write_returns_pending_until_flush() {
        let (store, mut writer) = writer();
        let handle = writer.write(BlobType::RAW, &b"leaf"[..], &[]).unwrap();
        assert!(handle.is_pending());
        assert!(matches!(writer.resolve(&handle), Err(StoreError::Unflushed(_))));
        assert!(store.is_empty());

        assert_eq!(writer.flush().unwrap(), 1);
        let hash = writer.resolve(&handle).unwrap();
        assert_eq!(hash, BlobData::new(BlobType::RAW, &b"leaf"[..], vec![]).compute_hash());
        assert!(store.exists(&hash).unwrap());
        assert_eq!(writer.pending_count(), 0);
    }

    #[test]
    fn pending_handles_work_as_refs() {
        let (store, mut writer) = writer();
        let a = writer.write(BlobType::RAW, &b"a"[..], &[]).unwrap();
        let b = writer.write(BlobType::RAW, &b"b"[..], &[]).unwrap();
        let parent = writer.write(NODE, &b"node"[..], &[a, b]).unwrap();
        writer.flush().unwrap();

        let parent_hash = writer.resolve(&parent).unwrap();
        let blob = store.fetch(&parent_hash).unwrap();
        assert_eq!(
            blob.refs,
            vec![writer.resolve(&a).unwrap(), writer.resolve(&b).unwrap()]
        );
    }

    #[test]
    fn refs_across_flushes_resolve() {
        let (store, mut writer) = writer();
        let leaf = writer.write(BlobType::RAW, &b"leaf"[..], &[]).unwrap();
        writer.flush().unwrap();
        let parent = writer.write(NODE, &b""[..], &[leaf]).unwrap();
        let parent_hash = writer.flush_and_resolve(&parent).unwrap();
        assert_eq!(
            store.fetch(&parent_hash).unwrap().refs,
            vec![writer.resolve(&leaf).unwrap()]
        );
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let (_, mut first) = writer();
        let (_, mut second) = writer();
        let handle = first.write(BlobType::RAW, &b"x"[..], &[]).unwrap();
        let err = second.write(NODE, &b""[..], &[handle]).unwrap_err();
        assert!(matches!(err, StoreError::ForeignHandle(_)));
        assert!(matches!(
            second.resolve(&handle),
            Err(StoreError::ForeignHandle(_))
        ));
    }

    #[test]
    fn write_verified_reports_both_hashes() {
        let (_, mut writer) = writer();
        let expected = BlobHash::from_bytes(b"expected");
        let err = writer
            .write_verified(BlobType::RAW, &b"actual"[..], &[], expected)
            .unwrap_err();
        match err {
            StoreError::HashMismatch {
                expected: e,
                actual,
            } => {
                assert_eq!(e, expected);
                assert_eq!(actual, BlobHash::from_bytes(b"actual"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(writer.pending_count(), 0);

        let ok = writer.write_verified(
            BlobType::RAW,
            &b"actual"[..],
            &[],
            BlobHash::from_bytes(b"actual"),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn auto_flush_on_pending_bytes() {
        let store = Arc::new(InMemoryBlobStore::new());
        let mut writer = BlobWriter::new(store.clone()).with_max_pending_bytes(8);
        writer.write(BlobType::RAW, &b"1234"[..], &[]).unwrap();
        assert!(store.is_empty());
        let h = writer.write(BlobType::RAW, &b"5678"[..], &[]).unwrap();
        assert_eq!(store.len(), 2);
        assert!(writer.resolve(&h).is_ok());
    }

    #[test]
    fn hashed_handles_pass_through() {
        let (_, writer) = writer();
        let hash = BlobHash::from_bytes(b"h");
        assert_eq!(writer.resolve(&BlobHandle::from(hash)).unwrap(), hash);
    }
}
