//! Content-defined chunking and chunked data trees for Cairn.
//!
//! Byte streams are cut into chunks wherever a BuzHash rolling hash over the
//! last [`WINDOW_SIZE`] bytes matches a mask, so an edit only disturbs the
//! chunks around it. The chunks become leaves of a Merkle tree whose interior
//! grouping is content-defined as well, which keeps unchanged subtrees
//! byte-identical across versions of a file.
//!
//! # Key Types
//!
//! - [`ChunkingOptions`] -- leaf and interior size bounds, encoding, parallelism
//! - [`ChunkIter`] / [`StreamChunker`] -- serial chunking over a buffer or a stream
//! - [`chunk_parallel`] -- segment-parallel chunking with identical output
//! - [`ChunkedDataWriter`] -- append-only tree builder holding only its frontier
//! - [`ChunkedDataReader`] -- whole-stream, range and per-leaf reads
//! - [`ChunkedData`] -- root handle, length and stream hash of a written stream

pub mod buzhash;
pub mod chunker;
pub mod error;
pub mod node;
pub mod options;
pub mod reader;
pub mod writer;

pub use buzhash::{BuzHash, WINDOW_SIZE};
pub use chunker::{chunk, chunk_parallel, Chunk, ChunkIter, StreamChunker};
pub use error::{ChunkError, ChunkResult};
pub use node::{ChunkedDataNode, InteriorNode, LeafNode, INTERIOR_TYPE, LEAF_TYPE};
pub use options::{ChunkingOptions, InteriorChunkOptions, InteriorEncoding, LeafChunkOptions};
pub use reader::{ChunkedDataReader, LeafRef};
pub use writer::{write_chunked_data, ChunkedData, ChunkedDataWriter};
