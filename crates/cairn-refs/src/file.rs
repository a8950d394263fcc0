//! File-backed ref and alias store.
//!
//! The whole namespace is one JSON document. Every mutation writes a new
//! document to a temporary file beside it and renames it over the old one,
//! under a process-wide mutex, so readers see either the old or the new
//! state and compare-and-swap stays linearizable.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use cairn_types::BlobHash;
use tracing::debug;

use crate::error::{RefError, Result};
use crate::names::RefName;
use crate::table::RefTable;
use crate::traits::{AliasStore, RefStore};
use crate::types::Alias;

/// JSON-document implementation of [`RefStore`] and [`AliasStore`].
#[derive(Debug)]
pub struct FileRefStore {
    path: PathBuf,
    table: Mutex<RefTable>,
}

impl FileRefStore {
    /// Open the document at `path`, starting empty if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let table = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| RefError::Serialization(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RefTable::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, RefTable>> {
        self.table
            .lock()
            .map_err(|e| RefError::Serialization(format!("lock poisoned: {e}")))
    }

    /// Apply `f` to a copy of the table, persist it, then commit it in memory.
    fn mutate<T>(&self, f: impl FnOnce(&mut RefTable) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(out)
    }

    fn persist(&self, table: &RefTable) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let bytes = serde_json::to_vec_pretty(table)
            .map_err(|e| RefError::Serialization(e.to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| RefError::Io(e.error))?;
        debug!(path = %self.path.display(), "persisted refs");
        Ok(())
    }
}

impl RefStore for FileRefStore {
    fn read_ref(&self, name: &RefName) -> Result<Option<BlobHash>> {
        Ok(self.lock()?.get(name))
    }

    fn write_ref(&self, name: &RefName, target: BlobHash) -> Result<Option<BlobHash>> {
        self.mutate(|table| Ok(table.set(name, target)))
    }

    fn compare_and_swap(
        &self,
        name: &RefName,
        expected: Option<BlobHash>,
        new: Option<BlobHash>,
    ) -> Result<()> {
        self.mutate(|table| table.compare_and_swap(name, expected, new))
    }

    fn delete_ref(&self, name: &RefName) -> Result<bool> {
        self.mutate(|table| Ok(table.remove(name)))
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<(RefName, BlobHash)>> {
        Ok(self.lock()?.list(prefix))
    }
}

impl AliasStore for FileRefStore {
    fn add_alias(&self, name: &str, alias: Alias) -> Result<()> {
        self.mutate(|table| table.add_alias(name, alias))
    }

    fn remove_alias(&self, name: &str, target: &BlobHash) -> Result<bool> {
        self.mutate(|table| Ok(table.remove_alias(name, target)))
    }

    fn find_aliases(&self, name: &str, max: usize) -> Result<Vec<Alias>> {
        Ok(self.lock()?.find_aliases(name, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.json");
        let main = RefName::new("builds/main").unwrap();
        let target = BlobHash::from_bytes(b"root");
        {
            let store = FileRefStore::open(&path).unwrap();
            store.write_ref(&main, target).unwrap();
            store
                .add_alias("cl:42", Alias::new(target).with_data(*b"x"))
                .unwrap();
        }
        let store = FileRefStore::open(&path).unwrap();
        assert_eq!(store.read_ref(&main).unwrap(), Some(target));
        assert_eq!(store.find_alias("cl:42").unwrap().unwrap().data, b"x");

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains(&target.to_hex()));
    }

    #[test]
    fn failed_cas_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.json");
        let store = FileRefStore::open(&path).unwrap();
        let r = RefName::new("r").unwrap();
        let err = store
            .compare_and_swap(&r, Some(BlobHash::from_bytes(b"x")), None)
            .unwrap_err();
        assert!(matches!(err, RefError::Conflict { actual: None, .. }));
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            FileRefStore::open(&path),
            Err(RefError::Serialization(_))
        ));
    }
}
