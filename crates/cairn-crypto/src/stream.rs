use cairn_types::BlobHash;

/// Incremental hash of a whole byte stream.
///
/// The result equals `BlobHash::from_bytes` over the concatenation of every
/// update, however the stream was split. Chunked data records this value so
/// two different chunkings of the same bytes can be checked for equality.
#[derive(Default, Clone)]
pub struct StreamHasher {
    hasher: blake3::Hasher,
    length: u64,
}

impl StreamHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.length += data.len() as u64;
    }

    /// Bytes hashed so far.
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn finalize(&self) -> BlobHash {
        self.hasher.finalize().into()
    }
}

impl std::fmt::Debug for StreamHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHasher")
            .field("length", &self.length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_stream() {
        let hasher = StreamHasher::new();
        assert_eq!(hasher.length(), 0);
        assert_eq!(hasher.finalize(), BlobHash::from_bytes(b""));
    }

    proptest! {
        #[test]
        fn split_point_does_not_matter(data in proptest::collection::vec(any::<u8>(), 0..4096), split in 0usize..4096) {
            let split = split.min(data.len());
            let mut hasher = StreamHasher::new();
            hasher.update(&data[..split]);
            hasher.update(&data[split..]);
            prop_assert_eq!(hasher.length(), data.len() as u64);
            prop_assert_eq!(hasher.finalize(), BlobHash::from_bytes(&data));
        }
    }
}
