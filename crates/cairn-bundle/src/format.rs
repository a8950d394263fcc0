//! On-disk bundle layout.
//!
//! ```text
//! magic "CBDL"                 4 bytes
//! format version               u16 BE
//! codec id                     u8
//! index length                 u32 BE
//! index                        see [`BundleIndex`](crate::BundleIndex)
//! uncompressed region length   u64 BE
//! compressed region            codec-specific
//! trailer                      32-byte BLAKE3 of everything above
//! ```

use std::fmt;

use cairn_crypto::ContentHasher;
use cairn_types::BlobHash;
use serde::{Deserialize, Serialize};

pub const MAGIC: &[u8; 4] = b"CBDL";
/// Fixed header bytes before the index.
pub const HEADER_LEN: usize = 4 + 2 + 1 + 4;
pub const TRAILER_LEN: usize = 32;
pub const FILE_EXTENSION: &str = "bundle";

/// Bundle format version.
///
/// Version 2 added a CRC32 of each blob's bytes to the index. Readers accept
/// both; writers pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BundleFormat {
    V1,
    #[default]
    V2,
}

impl BundleFormat {
    pub fn version(self) -> u16 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    pub fn from_version(version: u16) -> Option<Self> {
        match version {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    pub fn has_blob_crc(self) -> bool {
        self == Self::V2
    }
}

/// Identity of a bundle: the domain-separated hash of its encoded bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BundleId(BlobHash);

impl BundleId {
    pub fn of(encoded: &[u8]) -> Self {
        Self(ContentHasher::BUNDLE.hash(encoded))
    }

    pub fn hash(&self) -> &BlobHash {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}.{FILE_EXTENSION}", self.0.to_hex())
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.short_hex())
    }
}

impl fmt::Debug for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BundleId({})", self.0.short_hex())
    }
}
