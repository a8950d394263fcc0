//! Reading chunked data trees back out of a blob store.

use std::io::Write;

use cairn_crypto::StreamHasher;
use cairn_store::BlobStore;
use cairn_types::{BlobHash, CancellationToken};

use crate::error::{ChunkError, ChunkResult};
use crate::node::{locate, ChunkedDataNode, InteriorNode, LeafNode};

/// Location of one leaf within its stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeafRef {
    pub hash: BlobHash,
    pub offset: u64,
    pub length: u64,
}

/// Reads chunked data trees. Interior encodings v1 and v2 are handled
/// transparently.
pub struct ChunkedDataReader<'a> {
    store: &'a dyn BlobStore,
}

impl<'a> ChunkedDataReader<'a> {
    pub fn new(store: &'a dyn BlobStore) -> Self {
        Self { store }
    }

    pub fn read_node(&self, hash: &BlobHash) -> ChunkResult<ChunkedDataNode> {
        let blob = self.store.fetch(hash)?;
        ChunkedDataNode::decode(hash, &blob)
    }

    /// Total stream length below `hash`.
    pub fn length(&self, hash: &BlobHash) -> ChunkResult<u64> {
        Ok(self.read_node(hash)?.length())
    }

    /// Lengths of an interior node's children, reading them for v1 nodes.
    pub fn child_lengths(&self, node: &InteriorNode) -> ChunkResult<Vec<u64>> {
        match &node.child_lengths {
            Some(lengths) => Ok(lengths.clone()),
            None => node.children.iter().map(|c| self.length(c)).collect(),
        }
    }

    /// Read the whole stream into memory.
    pub fn read_all(&self, root: &BlobHash) -> ChunkResult<Vec<u8>> {
        let mut out = Vec::new();
        self.copy_to(root, &mut out, &CancellationToken::none())?;
        Ok(out)
    }

    /// Stream every leaf into `sink` in order. Returns the bytes written.
    pub fn copy_to(
        &self,
        root: &BlobHash,
        sink: &mut dyn Write,
        cancel: &CancellationToken,
    ) -> ChunkResult<u64> {
        let mut written = 0;
        self.visit_leaves(root, &mut |leaf| {
            cancel.check()?;
            sink.write_all(&leaf.data)?;
            written += leaf.length();
            Ok(())
        })?;
        Ok(written)
    }

    /// Read `length` bytes starting at `offset`, fetching only the leaves
    /// that overlap the range.
    pub fn read_range(&self, root: &BlobHash, offset: u64, length: u64) -> ChunkResult<Vec<u8>> {
        let node = self.read_node(root)?;
        let total = node.length();
        if offset.checked_add(length).map_or(true, |end| end > total) {
            return Err(ChunkError::OutOfRange {
                offset,
                length,
                total,
            });
        }
        let mut out = Vec::with_capacity(length as usize);
        self.collect_range(node, offset, offset + length, &mut out)?;
        Ok(out)
    }

    /// Every leaf in stream order with its offset.
    pub fn leaves(&self, root: &BlobHash) -> ChunkResult<Vec<LeafRef>> {
        let mut out = Vec::new();
        self.collect_leaves(*root, 0, &mut out)?;
        Ok(out)
    }

    /// Recompute the stream hash and length and compare them with what was
    /// recorded when the stream was written.
    pub fn verify(&self, root: &BlobHash, length: u64, stream_hash: &BlobHash) -> ChunkResult<()> {
        let mut hasher = StreamHasher::new();
        self.visit_leaves(root, &mut |leaf| {
            hasher.update(&leaf.data);
            Ok(())
        })?;
        let actual = hasher.finalize();
        if actual != *stream_hash || hasher.length() != length {
            return Err(ChunkError::VerifyFailed {
                expected: *stream_hash,
                expected_len: length,
                actual,
                actual_len: hasher.length(),
            });
        }
        Ok(())
    }

    fn visit_leaves(
        &self,
        hash: &BlobHash,
        f: &mut dyn FnMut(&LeafNode) -> ChunkResult<()>,
    ) -> ChunkResult<()> {
        match self.read_node(hash)? {
            ChunkedDataNode::Leaf(leaf) => f(&leaf),
            ChunkedDataNode::Interior(node) => {
                for child in &node.children {
                    self.visit_leaves(child, f)?;
                }
                Ok(())
            }
        }
    }

    // `start..end` is relative to `node`.
    fn collect_range(
        &self,
        node: ChunkedDataNode,
        start: u64,
        end: u64,
        out: &mut Vec<u8>,
    ) -> ChunkResult<()> {
        match node {
            ChunkedDataNode::Leaf(leaf) => {
                out.extend_from_slice(&leaf.data[start as usize..end as usize]);
                Ok(())
            }
            ChunkedDataNode::Interior(interior) => {
                let lengths = self.child_lengths(&interior)?;
                let Some((first, within)) = locate(&lengths, start) else {
                    return Ok(());
                };
                let mut pos = start - within;
                for (hash, &len) in interior.children.iter().zip(&lengths).skip(first) {
                    if pos >= end {
                        break;
                    }
                    let lo = start.max(pos) - pos;
                    let hi = end.min(pos + len) - pos;
                    if hi > lo {
                        self.collect_range(self.read_node(hash)?, lo, hi, out)?;
                    }
                    pos += len;
                }
                Ok(())
            }
        }
    }

    fn collect_leaves(
        &self,
        hash: BlobHash,
        offset: u64,
        out: &mut Vec<LeafRef>,
    ) -> ChunkResult<()> {
        match self.read_node(&hash)? {
            ChunkedDataNode::Leaf(leaf) => {
                out.push(LeafRef {
                    hash,
                    offset,
                    length: leaf.length(),
                });
                Ok(())
            }
            ChunkedDataNode::Interior(node) => {
                let mut child_offset = offset;
                for child in &node.children {
                    let before = out.len();
                    self.collect_leaves(*child, child_offset, out)?;
                    child_offset += out[before..].iter().map(|l| l.length).sum::<u64>();
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ChunkedDataReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedDataReader").finish_non_exhaustive()
    }
}
