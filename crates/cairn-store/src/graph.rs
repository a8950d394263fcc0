use std::collections::{BTreeSet, VecDeque};

use cairn_types::{BlobHash, CancellationToken};

use crate::error::{StoreError, StoreResult};
use crate::traits::BlobStore;

/// Outcome of walking a blob graph.
///
/// A graph with some blobs missing is a recoverable state: the caller gets
/// everything that was reachable plus the exact set that was not, and can
/// retry once the missing blobs are replicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphResolution {
    pub reachable: BTreeSet<BlobHash>,
    pub missing: BTreeSet<BlobHash>,
}

impl GraphResolution {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// The reachable set, or [`StoreError::MissingBlobs`] if anything was missing.
    pub fn require_complete(self) -> StoreResult<BTreeSet<BlobHash>> {
        if self.missing.is_empty() {
            Ok(self.reachable)
        } else {
            Err(StoreError::MissingBlobs(self.missing))
        }
    }
}

/// Breadth-first walk of every blob reachable from `roots`.
///
/// Missing blobs are collected rather than aborting the walk. Other read
/// errors are fatal. The token is checked once per blob.
pub fn resolve_graph(
    store: &dyn BlobStore,
    roots: &[BlobHash],
    cancel: &CancellationToken,
) -> StoreResult<GraphResolution> {
    let mut resolution = GraphResolution::default();
    let mut seen: BTreeSet<BlobHash> = BTreeSet::new();
    let mut queue: VecDeque<BlobHash> = roots.iter().copied().collect();

    while let Some(hash) = queue.pop_front() {
        if !seen.insert(hash) {
            continue;
        }
        cancel.check()?;
        match store.read(&hash) {
            Ok(Some(blob)) => {
                resolution.reachable.insert(hash);
                queue.extend(blob.refs.iter().filter(|r| !seen.contains(*r)));
            }
            Ok(None) | Err(StoreError::NotFound(_)) => {
                resolution.missing.insert(hash);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobData, BlobType};
    use crate::memory::InMemoryBlobStore;

    const NODE: BlobType = BlobType::new(0x4e4f_4445, 1);

    fn build() -> (InMemoryBlobStore, BlobHash, BlobHash, BlobHash) {
        let store = InMemoryBlobStore::new();
        let a = store.write(BlobData::new(BlobType::RAW, &b"a"[..], vec![])).unwrap();
        let b = store.write(BlobData::new(BlobType::RAW, &b"b"[..], vec![])).unwrap();
        let root = store
            .write(BlobData::new(NODE, &b"root"[..], vec![a, b, a]))
            .unwrap();
        (store, root, a, b)
    }

    #[test]
    fn complete_graph() {
        let (store, root, a, b) = build();
        let resolution = resolve_graph(&store, &[root], &CancellationToken::none()).unwrap();
        assert!(resolution.is_complete());
        assert_eq!(resolution.reachable, BTreeSet::from([root, a, b]));
    }

    #[test]
    fn missing_blobs_are_reported_not_fatal() {
        let (store, root, a, b) = build();
        store.evict(&b);
        let resolution = resolve_graph(&store, &[root], &CancellationToken::none()).unwrap();
        assert_eq!(resolution.reachable, BTreeSet::from([root, a]));
        assert_eq!(resolution.missing, BTreeSet::from([b]));

        match resolution.require_complete() {
            Err(StoreError::MissingBlobs(missing)) => assert_eq!(missing, BTreeSet::from([b])),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn cancelled_walk_stops() {
        let (store, root, _, _) = build();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = resolve_graph(&store, &[root], &cancel).unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }
}
