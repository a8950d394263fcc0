use std::path::Path;
use std::sync::OnceLock;

use bytes::Bytes;
use cairn_store::BlobData;
use cairn_types::BlobHash;

use crate::codec::BundleCodec;
use crate::error::{BundleError, BundleResult};
use crate::format::{BundleFormat, BundleId, HEADER_LEN, MAGIC, TRAILER_LEN};
use crate::index::{BundleEntry, BundleIndex};

/// Reads blobs out of an encoded bundle.
///
/// With a random-access codec each blob is a slice of the stored region.
/// Otherwise the region is decompressed on first read and the result is kept
/// for every later read from this reader.
pub struct BundleReader {
    id: BundleId,
    format: BundleFormat,
    codec: BundleCodec,
    index: BundleIndex,
    bytes: Bytes,
    region: std::ops::Range<usize>,
    uncompressed_len: usize,
    decompressed: OnceLock<Bytes>,
}

impl BundleReader {
    /// Parse and verify an encoded bundle.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> BundleResult<Self> {
        let bytes: Bytes = bytes.into();
        if bytes.len() < HEADER_LEN + 8 + TRAILER_LEN {
            return Err(BundleError::Truncated(format!(
                "{} bytes is shorter than an empty bundle",
                bytes.len()
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(BundleError::InvalidMagic {
                actual: String::from_utf8_lossy(&bytes[0..4]).into(),
            });
        }
        let version = u16::from_be_bytes([bytes[4], bytes[5]]);
        let format =
            BundleFormat::from_version(version).ok_or(BundleError::UnsupportedVersion(version))?;
        let codec = BundleCodec::from_id(bytes[6]).ok_or(BundleError::UnknownCodec(bytes[6]))?;

        let body_end = bytes.len() - TRAILER_LEN;
        if blake3::hash(&bytes[..body_end]).as_bytes() != &bytes[body_end..] {
            return Err(BundleError::ChecksumMismatch);
        }

        let index_len = u32::from_be_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]) as usize;
        let index_end = HEADER_LEN + index_len;
        if index_end + 8 > body_end {
            return Err(BundleError::Truncated("index extends past region".into()));
        }
        let index = BundleIndex::decode(&bytes[HEADER_LEN..index_end], format)?;
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&bytes[index_end..index_end + 8]);
        let uncompressed_len = usize::try_from(u64::from_be_bytes(len_bytes))
            .map_err(|_| BundleError::Truncated("region length overflows usize".into()))?;
        let region = index_end + 8..body_end;
        if codec.supports_random_access() && region.len() != uncompressed_len {
            return Err(BundleError::Truncated(format!(
                "stored region is {} bytes, header declares {uncompressed_len}",
                region.len()
            )));
        }

        for entry in index.entries() {
            if entry.offset.saturating_add(entry.length) > uncompressed_len as u64 {
                return Err(BundleError::CorruptIndex(format!(
                    "blob {} extends past the region",
                    entry.hash
                )));
            }
        }

        Ok(Self {
            id: BundleId::of(&bytes),
            format,
            codec,
            index,
            region,
            uncompressed_len,
            bytes,
            decompressed: OnceLock::new(),
        })
    }

    /// Read a bundle file from disk.
    pub fn open(path: &Path) -> BundleResult<Self> {
        Self::from_bytes(std::fs::read(path)?)
    }

    pub fn id(&self) -> BundleId {
        self.id
    }

    pub fn codec(&self) -> BundleCodec {
        self.codec
    }

    pub fn format(&self) -> BundleFormat {
        self.format
    }

    pub fn blob_count(&self) -> usize {
        self.index.len()
    }

    pub fn contains(&self, hash: &BlobHash) -> bool {
        self.index.contains(hash)
    }

    pub fn entries(&self) -> &[BundleEntry] {
        self.index.entries()
    }

    /// Whether the region has been decompressed and cached.
    pub fn is_decompressed(&self) -> bool {
        self.decompressed.get().is_some()
    }

    /// Read one blob. `Ok(None)` if this bundle does not hold it.
    pub fn read_blob(&self, hash: &BlobHash) -> BundleResult<Option<BlobData>> {
        let Some(entry) = self.index.lookup(hash) else {
            return Ok(None);
        };
        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        let payload = if self.codec.supports_random_access() {
            self.bytes.slice(self.region.start + start..self.region.start + end)
        } else {
            self.decompressed()?.slice(start..end)
        };
        if let Some(expected) = entry.crc32 {
            if crc32fast::hash(&payload) != expected {
                return Err(BundleError::CrcMismatch {
                    hash: *hash,
                    bundle_id: self.id,
                });
            }
        }
        Ok(Some(BlobData::new(
            entry.blob_type,
            payload,
            entry.refs.clone(),
        )))
    }

    fn decompressed(&self) -> BundleResult<Bytes> {
        if let Some(data) = self.decompressed.get() {
            return Ok(data.clone());
        }
        let data = self
            .codec
            .decompress(&self.bytes[self.region.clone()], self.uncompressed_len)
            .map_err(|reason| BundleError::Decompression {
                codec: self.codec,
                bundle_id: self.id,
                reason,
            })?;
        Ok(self.decompressed.get_or_init(|| Bytes::from(data)).clone())
    }
}

impl std::fmt::Debug for BundleReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleReader")
            .field("id", &self.id)
            .field("codec", &self.codec)
            .field("format", &self.format)
            .field("blobs", &self.index.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{BundleWriter, EncodedBundle};
    use cairn_store::BlobType;

    const NODE: BlobType = BlobType::new(0x4e4f_4445, 2);

    fn sample(codec: BundleCodec, format: BundleFormat) -> (EncodedBundle, Vec<(BlobHash, BlobData)>) {
        let leaf = BlobData::new(BlobType::RAW, vec![7u8; 4096], vec![]);
        let leaf_hash = leaf.compute_hash();
        let node = BlobData::new(NODE, &b"interior"[..], vec![leaf_hash, leaf_hash]);
        let blobs = vec![(leaf_hash, leaf), (node.compute_hash(), node)];
        let mut writer = BundleWriter::new(codec, format);
        for (hash, blob) in &blobs {
            writer.add(*hash, blob.clone());
        }
        (writer.finish().unwrap(), blobs)
    }

    #[test]
    fn every_codec_reads_back_blobs_and_refs() {
        for codec in BundleCodec::ALL {
            let (bundle, blobs) = sample(codec, BundleFormat::V2);
            let reader = BundleReader::from_bytes(bundle.bytes).unwrap();
            assert_eq!(reader.codec(), codec);
            assert_eq!(reader.id(), bundle.id);
            for (hash, blob) in &blobs {
                assert_eq!(reader.read_blob(hash).unwrap().as_ref(), Some(blob));
            }
        }
    }

    #[test]
    fn random_access_codec_never_decompresses() {
        let (bundle, blobs) = sample(BundleCodec::None, BundleFormat::V2);
        let reader = BundleReader::from_bytes(bundle.bytes).unwrap();
        reader.read_blob(&blobs[1].0).unwrap().unwrap();
        assert!(!reader.is_decompressed());
    }

    #[test]
    fn compressed_region_is_decompressed_once() {
        let (bundle, blobs) = sample(BundleCodec::Brotli, BundleFormat::V2);
        let reader = BundleReader::from_bytes(bundle.bytes).unwrap();
        assert!(!reader.is_decompressed());
        reader.read_blob(&blobs[0].0).unwrap().unwrap();
        assert!(reader.is_decompressed());
        assert!(reader.read_blob(&blobs[1].0).unwrap().is_some());
    }

    #[test]
    fn v1_bundles_remain_readable() {
        let (bundle, blobs) = sample(BundleCodec::Gzip, BundleFormat::V1);
        let reader = BundleReader::from_bytes(bundle.bytes).unwrap();
        assert_eq!(reader.format(), BundleFormat::V1);
        assert!(reader.entries().iter().all(|e| e.crc32.is_none()));
        assert_eq!(reader.read_blob(&blobs[1].0).unwrap().unwrap(), blobs[1].1);
    }

    #[test]
    fn missing_blob_is_none() {
        let (bundle, _) = sample(BundleCodec::Zstd, BundleFormat::V2);
        let reader = BundleReader::from_bytes(bundle.bytes).unwrap();
        assert!(reader.read_blob(&BlobHash::from_bytes(b"nope")).unwrap().is_none());
    }

    #[test]
    fn header_validation() {
        let (bundle, _) = sample(BundleCodec::Zstd, BundleFormat::V2);

        let mut bad_magic = bundle.bytes.clone();
        bad_magic[0..4].copy_from_slice(b"NOPE");
        assert!(matches!(
            BundleReader::from_bytes(bad_magic),
            Err(BundleError::InvalidMagic { .. })
        ));

        let mut bad_version = bundle.bytes.clone();
        bad_version[4..6].copy_from_slice(&9u16.to_be_bytes());
        assert!(matches!(
            BundleReader::from_bytes(bad_version),
            Err(BundleError::UnsupportedVersion(9))
        ));

        let mut bad_codec = bundle.bytes.clone();
        bad_codec[6] = 42;
        assert!(matches!(
            BundleReader::from_bytes(bad_codec),
            Err(BundleError::UnknownCodec(42))
        ));

        assert!(matches!(
            BundleReader::from_bytes(vec![1u8, 2, 3]),
            Err(BundleError::Truncated(_))
        ));
    }

    /// Re-seal `bytes[..cut_at]` followed by `bytes[cut_at + cut..body]` with a
    /// fresh trailer, so only the region length is wrong.
    fn reseal_without(bytes: &[u8], cut_at: usize, cut: usize) -> Vec<u8> {
        let body_end = bytes.len() - TRAILER_LEN;
        let mut out = bytes[..cut_at].to_vec();
        out.extend_from_slice(&bytes[cut_at + cut..body_end]);
        let checksum = *blake3::hash(&out).as_bytes();
        out.extend_from_slice(&checksum);
        out
    }

    #[test]
    fn short_raw_region_is_truncated() {
        for (format, cut) in [(BundleFormat::V1, 1), (BundleFormat::V2, 40)] {
            let (bundle, _) = sample(BundleCodec::None, format);
            let body_end = bundle.bytes.len() - TRAILER_LEN;
            let bytes = reseal_without(&bundle.bytes, body_end - cut, cut);
            assert!(
                matches!(BundleReader::from_bytes(bytes), Err(BundleError::Truncated(_))),
                "{format:?} with {cut} bytes cut was accepted"
            );
        }
    }

    #[test]
    fn long_raw_region_is_truncated() {
        let (bundle, _) = sample(BundleCodec::None, BundleFormat::V1);
        let body_end = bundle.bytes.len() - TRAILER_LEN;
        let mut bytes = bundle.bytes[..body_end].to_vec();
        bytes.push(0xaa);
        let checksum = *blake3::hash(&bytes).as_bytes();
        bytes.extend_from_slice(&checksum);
        assert!(matches!(
            BundleReader::from_bytes(bytes),
            Err(BundleError::Truncated(_))
        ));
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let (bundle, _) = sample(BundleCodec::Zstd, BundleFormat::V2);
        let mut bytes = bundle.bytes;
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        assert!(matches!(
            BundleReader::from_bytes(bytes),
            Err(BundleError::ChecksumMismatch)
        ));
    }

    #[test]
    fn corrupt_region_reports_codec_and_bundle() {
        // Rebuild a bundle around a garbage region so the trailer still matches.
        let (bundle, blobs) = sample(BundleCodec::Zstd, BundleFormat::V2);
        let index_len = u32::from_be_bytes(bundle.bytes[7..11].try_into().unwrap()) as usize;
        let region_start = HEADER_LEN + index_len + 8;
        let mut bytes = bundle.bytes[..region_start].to_vec();
        bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef, 0, 1, 2, 3]);
        let checksum = *blake3::hash(&bytes).as_bytes();
        bytes.extend_from_slice(&checksum);

        let reader = BundleReader::from_bytes(bytes).unwrap();
        match reader.read_blob(&blobs[0].0) {
            Err(BundleError::Decompression {
                codec, bundle_id, ..
            }) => {
                assert_eq!(codec, BundleCodec::Zstd);
                assert_eq!(bundle_id, reader.id());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
