//! Content-addressed blob storage for Cairn.
//!
//! Every piece of data Cairn persists (chunk leaves, interior nodes,
//! directory nodes) is an immutable blob: a type tag, a payload and a list of
//! outgoing references to other blobs. A blob is identified by the
//! domain-separated BLAKE3 hash of all three.
//!
//! # Key Types
//!
//! - [`BlobData`] -- payload plus outgoing refs, as returned by reads
//! - [`BlobType`] -- type id and encoding version of a blob
//! - [`BlobHandle`] -- hashed or pending reference to a blob
//! - [`BlobWriter`] -- write session that defers hashing until flush
//!
//! # Storage Backends
//!
//! All backends implement the [`BlobStore`] trait:
//!
//! - [`InMemoryBlobStore`] -- arena store for tests and embedding
//! - `FileBundleStore` in `cairn-bundle` -- compressed bundles on local disk
//!
//! # Design Rules
//!
//! 1. Blobs are immutable once written.
//! 2. A missing blob is reported as [`StoreError::NotFound`], never as an I/O error.
//! 3. Graph resolution reports missing blobs as a set instead of failing outright.
//! 4. The store never interprets payloads.

pub mod blob;
pub mod error;
pub mod graph;
pub mod handle;
pub mod memory;
pub mod traits;
pub mod varint;
pub mod writer;

pub use blob::{blob_hash, BlobData, BlobType};
pub use error::{StoreError, StoreResult};
pub use graph::{resolve_graph, GraphResolution};
pub use handle::{BlobHandle, PendingBlob};
pub use memory::InMemoryBlobStore;
pub use traits::BlobStore;
pub use writer::{BlobWriter, DEFAULT_MAX_PENDING_BYTES};
