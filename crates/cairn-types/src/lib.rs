//! Foundation types for Cairn.
//!
//! Every other Cairn crate depends on `cairn-types`.
//!
//! # Key Types
//!
//! - [`BlobHash`] — Content-addressed identifier (BLAKE3 hash)
//! - [`CancellationToken`] — Cooperative cancellation flag shared between tasks
//! - [`TypeError`] — Parse and validation failures for the types above

pub mod cancel;
pub mod error;
pub mod hash;

pub use cancel::{CancellationToken, Cancelled};
pub use error::TypeError;
pub use hash::BlobHash;
