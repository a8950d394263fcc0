//! Chunked data tree nodes and their blob encodings.
//!
//! ```text
//! leaf         payload = raw chunk bytes                      refs = []
//! interior v1  payload = varint(total)                        refs = children
//! interior v2  payload = varint(total) varint(n) varint(len)* refs = children
//! ```
//!
//! Both interior versions share one type id. Readers pick the decoder from
//! the version stored with the blob.

use bytes::Bytes;
use cairn_store::varint::{encode_varint, SliceReader};
use cairn_store::{BlobData, BlobType};
use cairn_types::BlobHash;

use crate::error::{ChunkError, ChunkResult};
use crate::options::InteriorEncoding;

/// Blob type of leaf nodes.
pub const LEAF_TYPE: BlobType = BlobType::new(0x4344_4c46, 1);

/// Blob type of interior nodes, at the newest encoding version.
pub const INTERIOR_TYPE: BlobType = BlobType::new(0x4344_494e, 2);

impl InteriorEncoding {
    pub fn blob_type(&self) -> BlobType {
        INTERIOR_TYPE.with_version(self.version())
    }
}

/// A leaf: one chunk of the stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafNode {
    pub data: Bytes,
}

impl LeafNode {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn length(&self) -> u64 {
        self.data.len() as u64
    }
}

/// An interior node: an ordered, non-empty list of children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteriorNode {
    pub encoding: InteriorEncoding,
    /// Total stream length below this node.
    pub length: u64,
    pub children: Vec<BlobHash>,
    /// Per-child lengths. Absent for v1 nodes until the children are read.
    pub child_lengths: Option<Vec<u64>>,
}

impl InteriorNode {
    /// Encode an interior payload from the lengths of its children.
    pub fn encode(encoding: InteriorEncoding, child_lengths: &[u64]) -> Vec<u8> {
        let total: u64 = child_lengths.iter().sum();
        let mut buf = Vec::with_capacity(4 + child_lengths.len() * 3);
        encode_varint(&mut buf, total);
        if encoding == InteriorEncoding::V2 {
            encode_varint(&mut buf, child_lengths.len() as u64);
            for &len in child_lengths {
                encode_varint(&mut buf, len);
            }
        }
        buf
    }
}

/// A node of a chunked data tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkedDataNode {
    Leaf(LeafNode),
    Interior(InteriorNode),
}

impl ChunkedDataNode {
    /// Decode the blob stored under `hash`.
    pub fn decode(hash: &BlobHash, blob: &BlobData) -> ChunkResult<Self> {
        let ty = blob.blob_type;
        if ty == LEAF_TYPE {
            if !blob.refs.is_empty() {
                return Err(corrupt(hash, "leaf with outgoing refs"));
            }
            return Ok(Self::Leaf(LeafNode::new(blob.payload.clone())));
        }
        let encoding = match (ty.same_kind(&INTERIOR_TYPE), ty.version) {
            (true, 1) => InteriorEncoding::V1,
            (true, 2) => InteriorEncoding::V2,
            _ => {
                return Err(ChunkError::UnexpectedType {
                    hash: *hash,
                    blob_type: ty,
                })
            }
        };
        if blob.refs.is_empty() {
            return Err(corrupt(hash, "interior node without children"));
        }

        let mut reader = SliceReader::new(&blob.payload);
        let length = reader
            .read_varint()
            .map_err(|e| corrupt(hash, e.to_string()))?;
        let child_lengths = match encoding {
            InteriorEncoding::V1 => None,
            InteriorEncoding::V2 => {
                let count = reader
                    .read_varint()
                    .map_err(|e| corrupt(hash, e.to_string()))?;
                if count != blob.refs.len() as u64 {
                    return Err(corrupt(
                        hash,
                        format!("{count} lengths for {} children", blob.refs.len()),
                    ));
                }
                let lengths = (0..count)
                    .map(|_| reader.read_varint())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| corrupt(hash, e.to_string()))?;
                if lengths.iter().sum::<u64>() != length {
                    return Err(corrupt(hash, "child lengths do not add up to total"));
                }
                Some(lengths)
            }
        };
        if !reader.is_empty() {
            return Err(corrupt(hash, "trailing bytes after interior payload"));
        }
        Ok(Self::Interior(InteriorNode {
            encoding,
            length,
            children: blob.refs.clone(),
            child_lengths,
        }))
    }

    /// Stream bytes covered by this node.
    pub fn length(&self) -> u64 {
        match self {
            Self::Leaf(leaf) => leaf.length(),
            Self::Interior(interior) => interior.length,
        }
    }
}

/// Find the child covering `offset`, given child lengths in order.
///
/// Returns the child index and the offset relative to that child.
pub fn locate(child_lengths: &[u64], offset: u64) -> Option<(usize, u64)> {
    let mut start = 0u64;
    for (i, &len) in child_lengths.iter().enumerate() {
        if offset < start + len {
            return Some((i, offset - start));
        }
        start += len;
    }
    None
}

fn corrupt(hash: &BlobHash, reason: impl Into<String>) -> ChunkError {
    ChunkError::Corrupt {
        hash: *hash,
        reason: reason.into(),
    }
}
