//! Hashing primitives for Cairn.
//!
//! Provides domain-separated BLAKE3 hashing for blobs and bundles, and an
//! incremental hasher for whole byte streams.
//!
//! All crypto operations wrap established libraries, no custom cryptography.

pub mod hasher;
pub mod stream;

pub use hasher::ContentHasher;
pub use stream::StreamHasher;
