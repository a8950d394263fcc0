//! Bundle format for Cairn.
//!
//! A bundle packs the blobs flushed by one writer session into a single
//! compressed region plus an index, so many small blobs cost one file and one
//! decompression.
//!
//! # Architecture
//!
//! - **Bundle file** (`<id>.bundle`): header, blob index, compressed region, BLAKE3 trailer
//! - **BundleWriter**: builds a bundle from blobs and publishes it atomically
//! - **BundleReader**: parses a bundle and serves blobs, slicing directly when
//!   the codec allows random access and decompressing once otherwise
//! - **FileBundleStore**: a [`BlobStore`](cairn_store::BlobStore) over a directory of bundles

pub mod codec;
pub mod error;
pub mod format;
pub mod index;
pub mod reader;
pub mod store;
pub mod writer;

pub use codec::BundleCodec;
pub use error::{BundleError, BundleResult};
pub use format::{BundleFormat, BundleId};
pub use index::{BundleEntry, BundleIndex};
pub use reader::BundleReader;
pub use store::{BundleOptions, FileBundleStore};
pub use writer::{BundleWriter, EncodedBundle};
