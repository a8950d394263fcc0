use std::collections::HashMap;

use cairn_store::varint::{encode_varint, DecodeError, SliceReader};
use cairn_store::BlobType;
use cairn_types::BlobHash;

use crate::error::{BundleError, BundleResult};
use crate::format::BundleFormat;

/// Index record for one blob in a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub hash: BlobHash,
    pub blob_type: BlobType,
    /// Offset of the blob within the uncompressed region.
    pub offset: u64,
    pub length: u64,
    pub refs: Vec<BlobHash>,
    /// CRC32 of the blob bytes. Absent in format version 1.
    pub crc32: Option<u32>,
}

/// The blob index of a bundle, in region order.
///
/// Serialized as a varint entry count followed by, per entry: hash (32),
/// type id (u32 BE), type version (u16 BE), varint offset, varint length,
/// varint ref count, ref hashes, and for version 2 a CRC32 (u32 BE).
#[derive(Debug, Clone, Default)]
pub struct BundleIndex {
    entries: Vec<BundleEntry>,
    by_hash: HashMap<BlobHash, usize>,
}

impl BundleIndex {
    pub fn new(entries: Vec<BundleEntry>) -> Self {
        let by_hash = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.hash, i))
            .collect();
        Self { entries, by_hash }
    }

    pub fn lookup(&self, hash: &BlobHash) -> Option<&BundleEntry> {
        self.by_hash.get(hash).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, hash: &BlobHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn entries(&self) -> &[BundleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self, format: BundleFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_varint(&mut buf, self.entries.len() as u64);
        for entry in &self.entries {
            buf.extend_from_slice(entry.hash.as_bytes());
            buf.extend_from_slice(&entry.blob_type.id.to_be_bytes());
            buf.extend_from_slice(&entry.blob_type.version.to_be_bytes());
            encode_varint(&mut buf, entry.offset);
            encode_varint(&mut buf, entry.length);
            encode_varint(&mut buf, entry.refs.len() as u64);
            for r in &entry.refs {
                buf.extend_from_slice(r.as_bytes());
            }
            if format.has_blob_crc() {
                buf.extend_from_slice(&entry.crc32.unwrap_or_default().to_be_bytes());
            }
        }
        buf
    }

    pub fn decode(data: &[u8], format: BundleFormat) -> BundleResult<Self> {
        Self::decode_entries(data, format)
            .map(Self::new)
            .map_err(|e| BundleError::CorruptIndex(e.to_string()))
    }

    fn decode_entries(data: &[u8], format: BundleFormat) -> Result<Vec<BundleEntry>, DecodeError> {
        let mut reader = SliceReader::new(data);
        let count = reader.read_varint()? as usize;
        // Each entry needs at least 41 bytes, which bounds a hostile count.
        let mut entries = Vec::with_capacity(count.min(data.len() / 41 + 1));
        for _ in 0..count {
            let hash = BlobHash::from_hash(reader.read_array()?);
            let blob_type = BlobType::new(reader.read_u32_be()?, reader.read_u16_be()?);
            let offset = reader.read_varint()?;
            let length = reader.read_varint()?;
            let ref_count = reader.read_varint()? as usize;
            let mut refs = Vec::with_capacity(ref_count.min(reader.remaining() / 32));
            for _ in 0..ref_count {
                refs.push(BlobHash::from_hash(reader.read_array()?));
            }
            let crc32 = if format.has_blob_crc() {
                Some(reader.read_u32_be()?)
            } else {
                None
            };
            entries.push(BundleEntry {
                hash,
                blob_type,
                offset,
                length,
                refs,
                crc32,
            });
        }
        Ok(entries)
    }
}
