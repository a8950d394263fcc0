//! Append-only chunked data tree builder.

use bytes::Bytes;
use cairn_crypto::StreamHasher;
use cairn_store::{BlobHandle, BlobWriter};
use cairn_types::{BlobHash, CancellationToken};
use tracing::debug;

use crate::chunker::{chunk_parallel, StreamChunker};
use crate::error::ChunkResult;
use crate::node::{InteriorNode, LEAF_TYPE};
use crate::options::ChunkingOptions;

/// A stream written as a chunked data tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkedData {
    /// Root node. Pending until the owning [`BlobWriter`] flushes.
    pub root: BlobHandle,
    pub length: u64,
    /// Plain BLAKE3 of the stream bytes, independent of tree shape.
    pub stream_hash: BlobHash,
}

impl ChunkedData {
    /// Root hash, if the root has been flushed.
    pub fn root_hash(&self) -> Option<BlobHash> {
        self.root.hash()
    }
}

#[derive(Clone, Debug)]
struct PendingChild {
    handle: BlobHandle,
    length: u64,
    key: u32,
}

/// Builds a chunked data tree from bytes appended in order.
///
/// Only the frontier is kept: the bytes of the open chunk and one list of
/// not-yet-grouped children per tree level. A group closes as soon as the
/// key of its newest child says so, which makes interior boundaries depend
/// on content just like leaf boundaries do.
pub struct ChunkedDataWriter<'w> {
    writer: &'w mut BlobWriter,
    options: ChunkingOptions,
    chunker: StreamChunker,
    buffer: Vec<u8>,
    levels: Vec<Vec<PendingChild>>,
    hasher: StreamHasher,
    cancel: CancellationToken,
    leaves: usize,
}

impl<'w> ChunkedDataWriter<'w> {
    pub fn new(writer: &'w mut BlobWriter, options: ChunkingOptions) -> ChunkResult<Self> {
        options.validate()?;
        Ok(Self {
            writer,
            chunker: StreamChunker::new(&options.leaf)?,
            options,
            buffer: Vec::new(),
            levels: Vec::new(),
            hasher: StreamHasher::new(),
            cancel: CancellationToken::none(),
            leaves: 0,
        })
    }

    /// Check `cancel` before each chunk is written.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Bytes appended so far.
    pub fn length(&self) -> u64 {
        self.hasher.length() + self.buffer.len() as u64
    }

    pub fn append(&mut self, mut data: &[u8]) -> ChunkResult<()> {
        while let Some(n) = self.chunker.next_boundary(data) {
            self.buffer.extend_from_slice(&data[..n]);
            let chunk = std::mem::take(&mut self.buffer);
            self.write_leaf(&chunk)?;
            data = &data[n..];
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Close the open chunk and every level of the frontier.
    pub fn finish(mut self) -> ChunkResult<ChunkedData> {
        if !self.buffer.is_empty() || self.leaves == 0 {
            let chunk = std::mem::take(&mut self.buffer);
            self.chunker.finish();
            self.write_leaf(&chunk)?;
        }

        let mut level = 0;
        let root = loop {
            let mut group = std::mem::take(&mut self.levels[level]);
            let top = level + 1 == self.levels.len();
            if top && group.len() == 1 {
                break group.swap_remove(0);
            }
            if !group.is_empty() {
                let parent = self.write_interior(group)?;
                self.push_child(level + 1, parent)?;
            }
            level += 1;
        };

        let data = ChunkedData {
            root: root.handle,
            length: root.length,
            stream_hash: self.hasher.finalize(),
        };
        debug!(
            length = data.length,
            leaves = self.leaves,
            depth = self.levels.len(),
            "finished chunked data"
        );
        Ok(data)
    }

    fn write_leaf(&mut self, chunk: &[u8]) -> ChunkResult<()> {
        self.cancel.check()?;
        self.hasher.update(chunk);
        let digest = blake3::hash(chunk);
        let key = u32::from_le_bytes([
            digest.as_bytes()[0],
            digest.as_bytes()[1],
            digest.as_bytes()[2],
            digest.as_bytes()[3],
        ]);
        let handle = self
            .writer
            .write(LEAF_TYPE, Bytes::copy_from_slice(chunk), &[])?;
        self.leaves += 1;
        self.push_child(
            0,
            PendingChild {
                handle,
                length: chunk.len() as u64,
                key,
            },
        )
    }

    fn push_child(&mut self, mut level: usize, mut child: PendingChild) -> ChunkResult<()> {
        let interior = self.options.interior;
        let divisor = interior.divisor();
        loop {
            if self.levels.len() <= level {
                self.levels.push(Vec::new());
            }
            let group = &mut self.levels[level];
            let key = child.key;
            group.push(child);
            let count = group.len();
            let closes = count >= interior.max_children
                || (count >= interior.min_children && key % divisor == 0);
            if !closes {
                return Ok(());
            }
            let group = std::mem::take(&mut self.levels[level]);
            child = self.write_interior(group)?;
            level += 1;
        }
    }

    fn write_interior(&mut self, group: Vec<PendingChild>) -> ChunkResult<PendingChild> {
        let lengths: Vec<u64> = group.iter().map(|c| c.length).collect();
        let refs: Vec<BlobHandle> = group.iter().map(|c| c.handle.clone()).collect();
        let encoding = self.options.interior_encoding;
        let handle = self.writer.write(
            encoding.blob_type(),
            InteriorNode::encode(encoding, &lengths),
            &refs,
        )?;
        Ok(PendingChild {
            handle,
            length: lengths.iter().sum(),
            key: group.last().map_or(0, |c| c.key),
        })
    }

    /// Append pre-cut chunks, bypassing the incremental chunker.
    fn append_chunks<'a>(&mut self, chunks: impl IntoIterator<Item = &'a [u8]>) -> ChunkResult<()> {
        for chunk in chunks {
            self.write_leaf(chunk)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChunkedDataWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedDataWriter")
            .field("length", &self.length())
            .field("leaves", &self.leaves)
            .field("levels", &self.levels.len())
            .finish()
    }
}

/// Write a whole buffer as chunked data.
///
/// Uses the parallel chunker when `options.parallel_segment_size` is set.
pub fn write_chunked_data(
    writer: &mut BlobWriter,
    data: &[u8],
    options: ChunkingOptions,
    cancel: &CancellationToken,
) -> ChunkResult<ChunkedData> {
    let mut out = ChunkedDataWriter::new(writer, options)?.with_cancellation(cancel.clone());
    match options.parallel_segment_size {
        Some(segment) => {
            let chunks = chunk_parallel(data, &options.leaf, segment)?;
            out.append_chunks(chunks.iter().map(|c| &data[c.offset..c.end()]))?;
        }
        None => out.append(data)?,
    }
    out.finish()
}
