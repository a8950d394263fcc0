use std::collections::HashMap;
use std::sync::RwLock;

use cairn_types::BlobHash;

use crate::blob::BlobData;
use crate::error::StoreResult;
use crate::traits::BlobStore;

/// Arena-style in-memory blob store.
///
/// Blobs live in a `Vec` addressed by integer index, with a hash → index map
/// for lookups. Evicted blobs leave a tombstone so indices stay stable.
/// Intended for tests and embedding.
pub struct InMemoryBlobStore {
    arena: RwLock<Arena>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Option<(BlobHash, BlobData)>>,
    index: HashMap<BlobHash, usize>,
}

impl InMemoryBlobStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            arena: RwLock::new(Arena::default()),
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.arena.read().expect("lock poisoned").index.len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.arena
            .read()
            .expect("lock poisoned")
            .slots
            .iter()
            .flatten()
            .map(|(_, blob)| blob.size())
            .sum()
    }

    /// Arena index of a blob.
    pub fn index_of(&self, hash: &BlobHash) -> Option<usize> {
        self.arena
            .read()
            .expect("lock poisoned")
            .index
            .get(hash)
            .copied()
    }

    /// Blob stored at an arena index.
    pub fn get_by_index(&self, index: usize) -> Option<(BlobHash, BlobData)> {
        self.arena
            .read()
            .expect("lock poisoned")
            .slots
            .get(index)
            .cloned()
            .flatten()
    }

    /// Drop a blob, leaving its arena slot empty. Returns `true` if it existed.
    pub fn evict(&self, hash: &BlobHash) -> bool {
        let mut arena = self.arena.write().expect("lock poisoned");
        match arena.index.remove(hash) {
            Some(slot) => {
                arena.slots[slot] = None;
                true
            }
            None => false,
        }
    }

    /// Sorted list of all blob hashes in the store.
    pub fn hashes(&self) -> Vec<BlobHash> {
        let arena = self.arena.read().expect("lock poisoned");
        let mut hashes: Vec<BlobHash> = arena.index.keys().copied().collect();
        hashes.sort();
        hashes
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn read(&self, hash: &BlobHash) -> StoreResult<Option<BlobData>> {
        let arena = self.arena.read().expect("lock poisoned");
        Ok(arena
            .index
            .get(hash)
            .and_then(|&slot| arena.slots[slot].as_ref())
            .map(|(_, blob)| blob.clone()))
    }

    fn exists(&self, hash: &BlobHash) -> StoreResult<bool> {
        Ok(self
            .arena
            .read()
            .expect("lock poisoned")
            .index
            .contains_key(hash))
    }

    fn write_batch(&self, blobs: Vec<(BlobHash, BlobData)>) -> StoreResult<()> {
        let mut arena = self.arena.write().expect("lock poisoned");
        for (hash, blob) in blobs {
            if arena.index.contains_key(&hash) {
                continue;
            }
            let slot = arena.slots.len();
            arena.slots.push(Some((hash, blob)));
            arena.index.insert(hash, slot);
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("blob_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobType;
    use crate::error::StoreError;

    fn raw(content: &'static [u8]) -> BlobData {
        BlobData::new(BlobType::RAW, content, vec![])
    }

    #[test]
    fn write_and_read() {
        let store = InMemoryBlobStore::new();
        let hash = store.write(raw(b"hello")).unwrap();
        let blob = store.read(&hash).unwrap().unwrap();
        assert_eq!(&blob.payload[..], b"hello");
        assert!(store.exists(&hash).unwrap());
    }

    #[test]
    fn duplicate_writes_are_idempotent() {
        let store = InMemoryBlobStore::new();
        let a = store.write(raw(b"same")).unwrap();
        let b = store.write(raw(b"same")).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.index_of(&a), Some(0));
    }

    #[test]
    fn arena_indices_are_stable_after_evict() {
        let store = InMemoryBlobStore::new();
        let a = store.write(raw(b"a")).unwrap();
        let b = store.write(raw(b"b")).unwrap();
        assert!(store.evict(&a));
        assert!(!store.evict(&a));
        assert_eq!(store.index_of(&b), Some(1));
        assert_eq!(store.get_by_index(1).unwrap().0, b);
        assert!(store.get_by_index(0).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn fetch_reports_not_found() {
        let store = InMemoryBlobStore::new();
        let missing = BlobHash::from_bytes(b"missing");
        assert!(store.read(&missing).unwrap().is_none());
        let err = store.fetch(&missing).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(h) if h == missing));
        assert!(err.is_not_found());
    }

    #[test]
    fn total_bytes_and_hashes() {
        let store = InMemoryBlobStore::new();
        store.write(raw(b"abc")).unwrap();
        store.write(raw(b"de")).unwrap();
        assert_eq!(store.total_bytes(), 5);
        let hashes = store.hashes();
        assert_eq!(hashes.len(), 2);
        assert!(hashes.windows(2).all(|w| w[0] < w[1]));
    }
}
