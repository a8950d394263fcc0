//! The [`RefStore`] and [`AliasStore`] traits.

use cairn_types::BlobHash;

use crate::error::{RefError, Result};
use crate::names::RefName;
use crate::types::Alias;

/// Storage backend for named refs.
///
/// Implementations must be thread-safe and make every update of a single
/// ref linearizable.
pub trait RefStore: Send + Sync {
    /// Read a ref. Returns `Ok(None)` if it does not exist.
    fn read_ref(&self, name: &RefName) -> Result<Option<BlobHash>>;

    /// Point a ref at `target` unconditionally. Returns the previous value.
    fn write_ref(&self, name: &RefName, target: BlobHash) -> Result<Option<BlobHash>>;

    /// Atomically replace the ref's value if it currently equals `expected`.
    ///
    /// `None` means "absent" on either side, so CAS can create and delete.
    /// On mismatch returns [`RefError::Conflict`] with the value found.
    fn compare_and_swap(
        &self,
        name: &RefName,
        expected: Option<BlobHash>,
        new: Option<BlobHash>,
    ) -> Result<()>;

    /// Delete a ref. Returns `Ok(true)` if it existed.
    fn delete_ref(&self, name: &RefName) -> Result<bool>;

    /// All refs whose name starts with `prefix`, sorted by name.
    fn list_refs(&self, prefix: &str) -> Result<Vec<(RefName, BlobHash)>>;

    /// Read a ref that must exist.
    fn resolve_ref(&self, name: &RefName) -> Result<BlobHash> {
        self.read_ref(name)?.ok_or_else(|| RefError::NotFound {
            name: name.to_string(),
        })
    }
}

/// Storage backend for aliases.
pub trait AliasStore: Send + Sync {
    /// Add a record under `name`, replacing any record with the same target.
    fn add_alias(&self, name: &str, alias: Alias) -> Result<()>;

    /// Remove the record pointing at `target`. Returns `Ok(true)` if removed.
    fn remove_alias(&self, name: &str, target: &BlobHash) -> Result<bool>;

    /// Up to `max` records under `name`, highest rank first.
    fn find_aliases(&self, name: &str, max: usize) -> Result<Vec<Alias>>;

    /// The highest-ranked record under `name`.
    fn find_alias(&self, name: &str) -> Result<Option<Alias>> {
        Ok(self.find_aliases(name, 1)?.into_iter().next())
    }
}
