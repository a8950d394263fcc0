//! In-memory ref and alias store for testing and ephemeral use.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use cairn_types::BlobHash;

use crate::error::{RefError, Result};
use crate::names::RefName;
use crate::table::RefTable;
use crate::traits::{AliasStore, RefStore};
use crate::types::Alias;

/// An in-memory implementation of [`RefStore`] and [`AliasStore`].
///
/// All data lives behind one `RwLock`, so every update is linearizable.
/// Data is lost when the store is dropped.
#[derive(Debug, Default)]
pub struct InMemoryRefStore {
    table: RwLock<RefTable>,
}

impl InMemoryRefStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RefTable>> {
        self.table
            .read()
            .map_err(|e| RefError::Serialization(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RefTable>> {
        self.table
            .write()
            .map_err(|e| RefError::Serialization(format!("lock poisoned: {e}")))
    }
}

impl RefStore for InMemoryRefStore {
    fn read_ref(&self, name: &RefName) -> Result<Option<BlobHash>> {
        Ok(self.read()?.get(name))
    }

    fn write_ref(&self, name: &RefName, target: BlobHash) -> Result<Option<BlobHash>> {
        Ok(self.write()?.set(name, target))
    }

    fn compare_and_swap(
        &self,
        name: &RefName,
        expected: Option<BlobHash>,
        new: Option<BlobHash>,
    ) -> Result<()> {
        self.write()?.compare_and_swap(name, expected, new)
    }

    fn delete_ref(&self, name: &RefName) -> Result<bool> {
        Ok(self.write()?.remove(name))
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<(RefName, BlobHash)>> {
        Ok(self.read()?.list(prefix))
    }
}

impl AliasStore for InMemoryRefStore {
    fn add_alias(&self, name: &str, alias: Alias) -> Result<()> {
        self.write()?.add_alias(name, alias)
    }

    fn remove_alias(&self, name: &str, target: &BlobHash) -> Result<bool> {
        Ok(self.write()?.remove_alias(name, target))
    }

    fn find_aliases(&self, name: &str, max: usize) -> Result<Vec<Alias>> {
        Ok(self.read()?.find_aliases(name, max))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn name(s: &str) -> RefName {
        RefName::new(s).unwrap()
    }

    fn hash(s: &str) -> BlobHash {
        BlobHash::from_bytes(s.as_bytes())
    }

    // ----------------------------------------------------------------------
    // Refs
    // ----------------------------------------------------------------------

    #[test]
    fn write_read_delete() {
        let store = InMemoryRefStore::new();
        let main = name("builds/main");
        assert_eq!(store.read_ref(&main).unwrap(), None);
        assert_eq!(store.write_ref(&main, hash("a")).unwrap(), None);
        assert_eq!(store.write_ref(&main, hash("b")).unwrap(), Some(hash("a")));
        assert_eq!(store.resolve_ref(&main).unwrap(), hash("b"));
        assert!(store.delete_ref(&main).unwrap());
        assert!(!store.delete_ref(&main).unwrap());
        assert!(matches!(
            store.resolve_ref(&main),
            Err(RefError::NotFound { .. })
        ));
    }

    #[test]
    fn compare_and_swap_detects_conflicts() {
        let store = InMemoryRefStore::new();
        let r = name("release");
        store.compare_and_swap(&r, None, Some(hash("v1"))).unwrap();
        store
            .compare_and_swap(&r, Some(hash("v1")), Some(hash("v2")))
            .unwrap();

        match store.compare_and_swap(&r, Some(hash("v1")), Some(hash("v3"))) {
            Err(RefError::Conflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, Some(hash("v1")));
                assert_eq!(actual, Some(hash("v2")));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(store.read_ref(&r).unwrap(), Some(hash("v2")));

        store.compare_and_swap(&r, Some(hash("v2")), None).unwrap();
        assert_eq!(store.read_ref(&r).unwrap(), None);
    }

    #[test]
    fn concurrent_cas_never_loses_updates() {
        let store = Arc::new(InMemoryRefStore::new());
        let counter = name("counter");
        store.write_ref(&counter, hash("0")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let counter = counter.clone();
                std::thread::spawn(move || {
                    let mut wins = 0;
                    for _ in 0..50 {
                        loop {
                            let current = store.read_ref(&counter).unwrap();
                            let next = BlobHash::from_bytes(current.unwrap().as_bytes());
                            if store
                                .compare_and_swap(&counter, current, Some(next))
                                .is_ok()
                            {
                                wins += 1;
                                break;
                            }
                        }
                    }
                    wins
                })
            })
            .collect();
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 400);

        let mut expected = hash("0");
        for _ in 0..400 {
            expected = BlobHash::from_bytes(expected.as_bytes());
        }
        assert_eq!(store.read_ref(&counter).unwrap(), Some(expected));
    }

    #[test]
    fn list_by_prefix() {
        let store = InMemoryRefStore::new();
        store.write_ref(&name("builds/a"), hash("a")).unwrap();
        store.write_ref(&name("builds/b"), hash("b")).unwrap();
        store.write_ref(&name("tools/c"), hash("c")).unwrap();
        let builds = store.list_refs("builds/").unwrap();
        assert_eq!(
            builds.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            vec!["builds/a", "builds/b"]
        );
        assert_eq!(store.list_refs("").unwrap().len(), 3);
    }

    // ----------------------------------------------------------------------
    // Aliases
    // ----------------------------------------------------------------------

    #[test]
    fn aliases_are_many_to_one_and_ranked() {
        let store = InMemoryRefStore::new();
        store.add_alias("cl:100", Alias::new(hash("low")).with_rank(1)).unwrap();
        store
            .add_alias("cl:100", Alias::new(hash("high")).with_rank(5).with_data(*b"meta"))
            .unwrap();
        store.add_alias("cl:100", Alias::new(hash("mid")).with_rank(3)).unwrap();
        store.add_alias("cl:200", Alias::new(hash("high"))).unwrap();

        let found = store.find_aliases("cl:100", 10).unwrap();
        assert_eq!(
            found.iter().map(|a| a.rank).collect::<Vec<_>>(),
            vec![5, 3, 1]
        );
        assert_eq!(found[0].data, b"meta");
        assert_eq!(store.find_aliases("cl:100", 2).unwrap().len(), 2);
        assert_eq!(store.find_alias("cl:200").unwrap().unwrap().target, hash("high"));
    }

    #[test]
    fn alias_with_same_target_is_replaced() {
        let store = InMemoryRefStore::new();
        store.add_alias("k", Alias::new(hash("t")).with_rank(1)).unwrap();
        store.add_alias("k", Alias::new(hash("t")).with_rank(9)).unwrap();
        let found = store.find_aliases("k", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rank, 9);
    }

    #[test]
    fn remove_alias() {
        let store = InMemoryRefStore::new();
        store.add_alias("k", Alias::new(hash("t"))).unwrap();
        assert!(store.remove_alias("k", &hash("t")).unwrap());
        assert!(!store.remove_alias("k", &hash("t")).unwrap());
        assert!(store.find_alias("k").unwrap().is_none());
        assert!(store.add_alias("", Alias::new(hash("t"))).is_err());
    }
}
