use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use cairn_store::BlobData;
use cairn_types::BlobHash;
use tracing::debug;

use crate::codec::BundleCodec;
use crate::error::{BundleError, BundleResult};
use crate::format::{BundleFormat, BundleId, MAGIC};
use crate::index::{BundleEntry, BundleIndex};

/// An encoded bundle, ready to be published.
#[derive(Debug, Clone)]
pub struct EncodedBundle {
    pub id: BundleId,
    pub bytes: Vec<u8>,
    pub index: BundleIndex,
}

/// Builds a bundle from blobs.
///
/// Blobs are laid out in insertion order; duplicates are dropped.
#[derive(Debug)]
pub struct BundleWriter {
    codec: BundleCodec,
    format: BundleFormat,
    blobs: Vec<(BlobHash, BlobData)>,
    seen: HashSet<BlobHash>,
}

impl BundleWriter {
    pub fn new(codec: BundleCodec, format: BundleFormat) -> Self {
        Self {
            codec,
            format,
            blobs: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Add a blob under its precomputed hash. Returns `false` for duplicates.
    pub fn add(&mut self, hash: BlobHash, blob: BlobData) -> bool {
        if !self.seen.insert(hash) {
            return false;
        }
        self.blobs.push((hash, blob));
        true
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Encode the bundle in memory.
    pub fn finish(self) -> BundleResult<EncodedBundle> {
        let mut region = Vec::new();
        let mut entries = Vec::with_capacity(self.blobs.len());
        for (hash, blob) in self.blobs {
            let offset = region.len() as u64;
            region.extend_from_slice(&blob.payload);
            entries.push(BundleEntry {
                hash,
                blob_type: blob.blob_type,
                offset,
                length: blob.payload.len() as u64,
                refs: blob.refs,
                crc32: self
                    .format
                    .has_blob_crc()
                    .then(|| crc32fast::hash(&blob.payload)),
            });
        }
        let index = BundleIndex::new(entries);
        let index_bytes = index.encode(self.format);
        let index_len = u32::try_from(index_bytes.len())
            .map_err(|_| BundleError::CorruptIndex("index exceeds 4 GiB".into()))?;
        let compressed = self
            .codec
            .compress(&region)
            .map_err(|reason| BundleError::Compression {
                codec: self.codec,
                reason,
            })?;

        let mut bytes = Vec::with_capacity(64 + index_bytes.len() + compressed.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&self.format.version().to_be_bytes());
        bytes.push(self.codec.id());
        bytes.extend_from_slice(&index_len.to_be_bytes());
        bytes.extend_from_slice(&index_bytes);
        bytes.extend_from_slice(&(region.len() as u64).to_be_bytes());
        bytes.extend_from_slice(&compressed);
        let checksum = *blake3::hash(&bytes).as_bytes();
        bytes.extend_from_slice(&checksum);

        let id = BundleId::of(&bytes);
        debug!(
            bundle = %id,
            codec = %self.codec,
            blobs = index.len(),
            raw = region.len(),
            packed = compressed.len(),
            "encoded bundle"
        );
        Ok(EncodedBundle { id, bytes, index })
    }
}

impl EncodedBundle {
    /// Publish into `dir` as `<id>.bundle`.
    ///
    /// The bytes go to a temporary file in the same directory, are synced, and
    /// are then renamed into place, so readers never see a partial bundle.
    pub fn publish(&self, dir: &Path) -> BundleResult<PathBuf> {
        let path = dir.join(self.id.file_name());
        if path.exists() {
            return Ok(path);
        }
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-bundle-")
            .tempfile_in(dir)?;
        tmp.write_all(&self.bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| BundleError::Io(e.error))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_store::BlobType;

    fn blob(content: &'static [u8]) -> (BlobHash, BlobData) {
        let data = BlobData::new(BlobType::RAW, content, vec![]);
        (data.compute_hash(), data)
    }

    #[test]
    fn duplicates_are_dropped() {
        let mut writer = BundleWriter::new(BundleCodec::Zstd, BundleFormat::V2);
        let (h, b) = blob(b"same");
        assert!(writer.add(h, b.clone()));
        assert!(!writer.add(h, b));
        assert_eq!(writer.len(), 1);
    }

    #[test]
    fn layout_is_contiguous() {
        let mut writer = BundleWriter::new(BundleCodec::None, BundleFormat::V2);
        let (ha, a) = blob(b"first");
        let (hb, b) = blob(b"second!");
        writer.add(ha, a);
        writer.add(hb, b);
        let bundle = writer.finish().unwrap();
        let entries = bundle.index.entries();
        assert_eq!((entries[0].offset, entries[0].length), (0, 5));
        assert_eq!((entries[1].offset, entries[1].length), (5, 7));
        assert_eq!(entries[1].crc32, Some(crc32fast::hash(b"second!")));
        assert_eq!(&bundle.bytes[..4], MAGIC);
    }

    #[test]
    fn encoding_is_deterministic() {
        let build = || {
            let mut writer = BundleWriter::new(BundleCodec::Zstd, BundleFormat::V2);
            let (h, b) = blob(b"payload");
            writer.add(h, b);
            writer.finish().unwrap()
        };
        let (a, b) = (build(), build());
        assert_eq!(a.id, b.id);
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn publish_is_atomic_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = BundleWriter::new(BundleCodec::Lz4, BundleFormat::V2);
        let (h, b) = blob(b"on disk");
        writer.add(h, b);
        let bundle = writer.finish().unwrap();

        let path = bundle.publish(dir.path()).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), bundle.bytes);
        assert_eq!(bundle.publish(dir.path()).unwrap(), path);

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![bundle.id.file_name()]);
    }
}
