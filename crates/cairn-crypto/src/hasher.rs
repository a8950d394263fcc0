use cairn_types::BlobHash;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g. `"cairn-blob-v1"`) that is prepended
/// to every hash computation, so a blob and a bundle with identical bytes
/// produce different hashes.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for blob identities.
    pub const BLOB: Self = Self {
        domain: "cairn-blob-v1",
    };
    /// Hasher for bundle ids.
    pub const BUNDLE: Self = Self {
        domain: "cairn-bundle-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> BlobHash {
        self.hash_parts(&[data])
    }

    /// Hash the concatenation of `parts` with domain separation.
    pub fn hash_parts(&self, parts: &[&[u8]]) -> BlobHash {
        let mut hasher = self.begin();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize().into()
    }

    /// A BLAKE3 hasher already seeded with the domain prefix.
    pub fn begin(&self) -> blake3::Hasher {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher
    }

    /// Verify that data produces the expected hash.
    pub fn verify(&self, data: &[u8], expected: &BlobHash) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}
