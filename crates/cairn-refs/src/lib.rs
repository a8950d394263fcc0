//! Named refs and aliases for Cairn.
//!
//! Blobs never change once written. Refs and aliases are the only mutable
//! state: publishing a new snapshot means repointing a ref at a new root hash.
//!
//! # Architecture
//!
//! - **Refs** map a validated [`RefName`] to exactly one blob hash. Updates go
//!   through compare-and-swap so concurrent publishers cannot silently lose
//!   an update.
//! - **Aliases** map an arbitrary key to any number of `(hash, rank, data)`
//!   records, for secondary lookups that are not content hashes.
//!
//! # Modules
//!
//! - [`error`] — Error types for ref and alias operations
//! - [`names`] — Ref name validation
//! - [`types`] — [`Alias`] records
//! - [`traits`] — The [`RefStore`] and [`AliasStore`] traits
//! - [`memory`] — In-memory [`InMemoryRefStore`] for tests
//! - [`file`] — JSON-backed [`FileRefStore`]

pub mod error;
pub mod file;
pub mod memory;
pub mod names;
mod table;
pub mod traits;
pub mod types;

pub use error::{RefError, Result};
pub use file::FileRefStore;
pub use memory::InMemoryRefStore;
pub use names::{validate_alias_name, validate_ref_name, RefName};
pub use traits::{AliasStore, RefStore};
pub use types::Alias;
