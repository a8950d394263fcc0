use std::fmt;

use bytes::Bytes;
use cairn_crypto::ContentHasher;
use cairn_types::BlobHash;
use serde::{Deserialize, Serialize};

/// Type tag recorded with every blob.
///
/// `id` names the logical node kind; `version` distinguishes historical
/// encodings of that kind so readers can decode old blobs without being told
/// which encoding was used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobType {
    pub id: u32,
    pub version: u16,
}

impl BlobType {
    /// Opaque bytes with no structure known to Cairn.
    pub const RAW: Self = Self::new(0x5241_5730, 1);

    pub const fn new(id: u32, version: u16) -> Self {
        Self { id, version }
    }

    /// Same type id, different encoding version.
    pub const fn with_version(self, version: u16) -> Self {
        Self { id: self.id, version }
    }

    /// Whether `other` is the same logical kind, regardless of version.
    pub fn same_kind(&self, other: &BlobType) -> bool {
        self.id == other.id
    }
}

impl fmt::Display for BlobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}v{}", self.id, self.version)
    }
}

/// A blob as stored and returned by reads: type, payload and outgoing refs.
///
/// Refs are returned alongside the payload so graph traversal never needs a
/// second fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobData {
    pub blob_type: BlobType,
    pub payload: Bytes,
    pub refs: Vec<BlobHash>,
}

impl BlobData {
    pub fn new(blob_type: BlobType, payload: impl Into<Bytes>, refs: Vec<BlobHash>) -> Self {
        Self {
            blob_type,
            payload: payload.into(),
            refs,
        }
    }

    /// Content-addressed identity of this blob.
    pub fn compute_hash(&self) -> BlobHash {
        blob_hash(self.blob_type, &self.payload, &self.refs)
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }
}

/// Hash of a blob: type, refs and payload under the blob domain.
pub fn blob_hash(blob_type: BlobType, payload: &[u8], refs: &[BlobHash]) -> BlobHash {
    let mut hasher = ContentHasher::BLOB.begin();
    hasher.update(&blob_type.id.to_be_bytes());
    hasher.update(&blob_type.version.to_be_bytes());
    hasher.update(&(refs.len() as u64).to_be_bytes());
    for r in refs {
        hasher.update(r.as_bytes());
    }
    hasher.update(payload);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: BlobType = BlobType::new(0x4e4f_4445, 1);

    #[test]
    fn hash_depends_on_payload_refs_and_type() {
        let base = BlobData::new(NODE, &b"payload"[..], vec![]);
        let other_payload = BlobData::new(NODE, &b"payload!"[..], vec![]);
        let with_ref = BlobData::new(NODE, &b"payload"[..], vec![BlobHash::from_bytes(b"x")]);
        let other_version = BlobData::new(NODE.with_version(2), &b"payload"[..], vec![]);

        let h = base.compute_hash();
        assert_ne!(h, other_payload.compute_hash());
        assert_ne!(h, with_ref.compute_hash());
        assert_ne!(h, other_version.compute_hash());
        assert_eq!(h, BlobData::new(NODE, &b"payload"[..], vec![]).compute_hash());
    }

    #[test]
    fn ref_order_matters() {
        let a = BlobHash::from_bytes(b"a");
        let b = BlobHash::from_bytes(b"b");
        assert_ne!(blob_hash(NODE, b"", &[a, b]), blob_hash(NODE, b"", &[b, a]));
    }

    #[test]
    fn display_and_kind() {
        assert_eq!(NODE.to_string(), "4e4f4445v1");
        assert!(NODE.same_kind(&NODE.with_version(3)));
        assert!(!NODE.same_kind(&BlobType::RAW));
    }
}
