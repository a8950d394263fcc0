//! Compression codecs for bundle payload regions.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Zstandard level used for bundle regions.
const ZSTD_LEVEL: i32 = 3;
/// Brotli quality and window size (log2).
const BROTLI_QUALITY: u32 = 5;
const BROTLI_LGWIN: u32 = 22;
const BROTLI_BUFFER: usize = 4096;

/// Compression applied to a bundle's payload region.
///
/// The codec id is written into every bundle header, so ids must never be
/// reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BundleCodec {
    /// Stored uncompressed; blobs are sliced directly out of the region.
    None,
    /// LZ4 block with prepended size.
    Lz4,
    Gzip,
    Brotli,
    #[default]
    Zstd,
}

impl BundleCodec {
    pub const ALL: [BundleCodec; 5] = [
        BundleCodec::None,
        BundleCodec::Lz4,
        BundleCodec::Gzip,
        BundleCodec::Brotli,
        BundleCodec::Zstd,
    ];

    pub fn id(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Lz4 => 1,
            Self::Gzip => 2,
            Self::Brotli => 3,
            Self::Zstd => 4,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|codec| codec.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
            Self::Gzip => "gzip",
            Self::Brotli => "brotli",
            Self::Zstd => "zstd",
        }
    }

    /// Whether a single blob can be read without decompressing the region.
    pub fn supports_random_access(self) -> bool {
        matches!(self, Self::None)
    }

    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>, String> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
            Self::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data).map_err(|e| e.to_string())?;
                encoder.finish().map_err(|e| e.to_string())
            }
            Self::Brotli => {
                let mut writer = brotli::CompressorWriter::new(
                    Vec::new(),
                    BROTLI_BUFFER,
                    BROTLI_QUALITY,
                    BROTLI_LGWIN,
                );
                writer.write_all(data).map_err(|e| e.to_string())?;
                Ok(writer.into_inner())
            }
            Self::Zstd => zstd::encode_all(data, ZSTD_LEVEL).map_err(|e| e.to_string()),
        }
    }

    /// Decompress a region, checking it expands to `expected_len` bytes.
    pub fn decompress(self, data: &[u8], expected_len: usize) -> Result<Vec<u8>, String> {
        let out = match self {
            Self::None => data.to_vec(),
            Self::Lz4 => {
                // Check the prepended size before allocating for it.
                let (size, body) = data
                    .split_first_chunk::<4>()
                    .ok_or_else(|| "missing lz4 size prefix".to_string())?;
                let size = u32::from_le_bytes(*size) as usize;
                if size != expected_len {
                    return Err(format!(
                        "size mismatch: expected {expected_len}, header says {size}"
                    ));
                }
                lz4_flex::decompress(body, size).map_err(|e| e.to_string())?
            }
            Self::Gzip => read_bounded(flate2::read::GzDecoder::new(data), expected_len)?,
            Self::Brotli => {
                read_bounded(brotli::Decompressor::new(data, BROTLI_BUFFER), expected_len)?
            }
            Self::Zstd => {
                let decoder = zstd::stream::read::Decoder::new(data).map_err(|e| e.to_string())?;
                read_bounded(decoder, expected_len)?
            }
        };
        if out.len() != expected_len {
            return Err(format!(
                "size mismatch: expected {expected_len}, got {}",
                out.len()
            ));
        }
        Ok(out)
    }
}

/// Decode at most one byte past `expected_len`, so an oversized stream is
/// caught by the length check without being inflated in full.
fn read_bounded(decoder: impl Read, expected_len: usize) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(expected_len);
    decoder
        .take(expected_len as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    Ok(out)
}

impl fmt::Display for BundleCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BundleCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|codec| codec.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown codec '{s}' (expected none, lz4, gzip, brotli or zstd)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{Rng, SeedableRng};

    fn structured() -> Vec<u8> {
        (0..20_000u32)
            .flat_map(|i| format!("line {i}: the quick brown fox\n").into_bytes())
            .collect()
    }

    #[test]
    fn every_codec_roundtrips_structured_and_random() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let random: Vec<u8> = (0..64 * 1024).map(|_| rng.gen()).collect();
        for codec in BundleCodec::ALL {
            for data in [structured(), random.clone(), Vec::new()] {
                let packed = codec.compress(&data).unwrap();
                let unpacked = codec.decompress(&packed, data.len()).unwrap();
                assert_eq!(unpacked, data, "codec {codec}");
            }
        }
    }

    #[test]
    fn compressing_codecs_shrink_structured_data() {
        let data = structured();
        for codec in BundleCodec::ALL {
            let packed = codec.compress(&data).unwrap();
            if codec == BundleCodec::None {
                assert_eq!(packed.len(), data.len());
            } else {
                assert!(packed.len() < data.len() / 2, "codec {codec}");
            }
        }
    }

    #[test]
    fn ids_are_stable() {
        for codec in BundleCodec::ALL {
            assert_eq!(BundleCodec::from_id(codec.id()), Some(codec));
            assert_eq!(codec.name().parse::<BundleCodec>().unwrap(), codec);
        }
        assert_eq!(BundleCodec::from_id(9), None);
        assert!("snappy".parse::<BundleCodec>().is_err());
        assert_eq!(BundleCodec::default(), BundleCodec::Zstd);
    }

    #[test]
    fn only_uncompressed_is_random_access() {
        assert!(BundleCodec::None.supports_random_access());
        assert!(!BundleCodec::Zstd.supports_random_access());
        assert!(!BundleCodec::Lz4.supports_random_access());
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let packed = BundleCodec::Zstd.compress(b"abc").unwrap();
        assert!(BundleCodec::Zstd.decompress(&packed, 4).is_err());
    }

    #[test]
    fn oversized_streams_are_cut_off() {
        let big = vec![0u8; 4 << 20];
        for codec in [BundleCodec::Gzip, BundleCodec::Brotli, BundleCodec::Zstd] {
            let packed = codec.compress(&big).unwrap();
            let err = codec.decompress(&packed, 1024).unwrap_err();
            assert_eq!(err, "size mismatch: expected 1024, got 1025", "codec {codec}");
        }
    }

    #[test]
    fn garbage_fails_to_decompress() {
        for codec in [BundleCodec::Lz4, BundleCodec::Gzip, BundleCodec::Zstd] {
            assert!(codec.decompress(&[0xde, 0xad, 0xbe, 0xef, 1, 2, 3], 16).is_err());
        }
    }

    proptest! {
        #[test]
        fn prop_roundtrip(data in prop::collection::vec(any::<u8>(), 0..8192), pick in 0usize..5) {
            let codec = BundleCodec::ALL[pick];
            let packed = codec.compress(&data).unwrap();
            prop_assert_eq!(codec.decompress(&packed, data.len()).unwrap(), data);
        }
    }
}
