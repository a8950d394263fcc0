//! Concurrent blob reads with backpressure.
//!
//! Callers push blob hashes into a bounded request queue together with a
//! payload of their choosing. A fixed pool of worker tasks reads the blobs
//! on the blocking thread pool and hands back responses in completion order,
//! each carrying the payload it was submitted with.
//!
//! # Key Types
//!
//! - [`BlobPipeline`] -- the request queue plus its workers
//! - [`BlobResponse`] -- one completed read and its caller payload
//! - [`PipelineOptions`] -- worker count and queue capacity

pub mod error;
pub mod pipeline;

pub use error::{PipelineError, PipelineResult};
pub use pipeline::{BlobPipeline, BlobResponse, PipelineOptions};
