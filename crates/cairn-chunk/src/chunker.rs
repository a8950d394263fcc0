//! Content-defined leaf chunking.
//!
//! A boundary follows byte `i` when the current chunk has reached
//! `max_size`, or when it has reached `min_size` and the rolling hash after
//! byte `i` has all mask bits clear. The rolling hash is never reset at a
//! boundary, so every entry point below (whole buffer, incremental stream,
//! parallel segments) cuts a given stream at exactly the same offsets.

use rayon::prelude::*;

use crate::buzhash::{BuzHash, WINDOW_SIZE};
use crate::error::{ChunkError, ChunkResult};
use crate::options::LeafChunkOptions;

/// A contiguous byte range of the source stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub offset: usize,
    pub length: usize,
}

impl Chunk {
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

#[derive(Clone, Copy, Debug)]
struct BoundaryRule {
    min: usize,
    max: usize,
    mask: u32,
}

impl BoundaryRule {
    fn new(options: &LeafChunkOptions) -> ChunkResult<Self> {
        options.validate()?;
        Ok(Self {
            min: options.min_size,
            max: options.max_size,
            mask: options.mask(),
        })
    }

    #[inline]
    fn is_boundary(&self, len: usize, hash: u32) -> bool {
        len >= self.max || (len >= self.min && hash & self.mask == 0)
    }
}

/// Incremental chunker for streams that arrive in pieces.
#[derive(Clone, Debug)]
pub struct StreamChunker {
    hash: BuzHash,
    rule: BoundaryRule,
    len: usize,
}

impl StreamChunker {
    pub fn new(options: &LeafChunkOptions) -> ChunkResult<Self> {
        Ok(Self {
            hash: BuzHash::new(),
            rule: BoundaryRule::new(options)?,
            len: 0,
        })
    }

    /// Scan `bytes` up to the next boundary.
    ///
    /// Returns how many bytes of `bytes` complete the current chunk, or
    /// `None` if all of them belong to it and it is still open.
    pub fn next_boundary(&mut self, bytes: &[u8]) -> Option<usize> {
        for (i, &b) in bytes.iter().enumerate() {
            let h = self.hash.roll(b);
            self.len += 1;
            if self.rule.is_boundary(self.len, h) {
                self.len = 0;
                return Some(i + 1);
            }
        }
        None
    }

    /// Feed bytes and return the lengths of every chunk they complete.
    pub fn push(&mut self, mut bytes: &[u8]) -> Vec<usize> {
        let mut lengths = Vec::new();
        let mut open = self.len;
        while let Some(n) = self.next_boundary(bytes) {
            lengths.push(open + n);
            open = 0;
            bytes = &bytes[n..];
        }
        lengths
    }

    /// Length of the still-open final chunk, if any.
    pub fn finish(&mut self) -> Option<usize> {
        let len = std::mem::take(&mut self.len);
        (len > 0).then_some(len)
    }

    /// Bytes in the chunk currently being accumulated.
    pub fn open_len(&self) -> usize {
        self.len
    }
}

/// Lazy chunk iterator over a borrowed buffer.
#[derive(Debug)]
pub struct ChunkIter<'a> {
    data: &'a [u8],
    pos: usize,
    chunker: StreamChunker,
}

impl<'a> ChunkIter<'a> {
    pub fn new(data: &'a [u8], options: &LeafChunkOptions) -> ChunkResult<Self> {
        Ok(Self {
            data,
            pos: 0,
            chunker: StreamChunker::new(options)?,
        })
    }
}

impl Iterator for ChunkIter<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.pos >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.pos..];
        let length = self.chunker.next_boundary(rest).unwrap_or(rest.len());
        let chunk = Chunk {
            offset: self.pos,
            length,
        };
        self.pos += length;
        Some(chunk)
    }
}

/// Chunk a whole buffer serially.
pub fn chunk(data: &[u8], options: &LeafChunkOptions) -> ChunkResult<Vec<Chunk>> {
    Ok(ChunkIter::new(data, options)?.collect())
}

/// Chunk a buffer by scanning fixed-size segments concurrently.
///
/// Each segment primes its rolling hash with the [`WINDOW_SIZE`] bytes before
/// it and records every offset where the hash matches the mask. A single
/// sequential pass then applies the size bounds, giving the same chunks as
/// [`chunk`].
pub fn chunk_parallel(
    data: &[u8],
    options: &LeafChunkOptions,
    segment_size: usize,
) -> ChunkResult<Vec<Chunk>> {
    let rule = BoundaryRule::new(options)?;
    if segment_size == 0 {
        return Err(ChunkError::InvalidOptions(
            "parallel segment size must be positive".into(),
        ));
    }

    let candidates: Vec<Vec<usize>> = data
        .par_chunks(segment_size)
        .enumerate()
        .map(|(index, segment)| {
            let start = index * segment_size;
            let mut hash = BuzHash::new();
            hash.prime(&data[start.saturating_sub(WINDOW_SIZE)..start]);
            segment
                .iter()
                .enumerate()
                .filter_map(|(i, &b)| (hash.roll(b) & rule.mask == 0).then_some(start + i + 1))
                .collect()
        })
        .collect();

    let mut chunks = Vec::new();
    let mut start = 0;
    for p in candidates.into_iter().flatten() {
        while p - start > rule.max {
            let end = start + rule.max;
            cut(&mut chunks, &mut start, end);
        }
        if p - start >= rule.min {
            cut(&mut chunks, &mut start, p);
        }
    }
    while data.len() - start > rule.max {
        let end = start + rule.max;
        cut(&mut chunks, &mut start, end);
    }
    if start < data.len() {
        cut(&mut chunks, &mut start, data.len());
    }
    Ok(chunks)
}

fn cut(chunks: &mut Vec<Chunk>, start: &mut usize, end: usize) {
    chunks.push(Chunk {
        offset: *start,
        length: end - *start,
    });
    *start = end;
}

#[cfg(test)]
pub(crate) fn splitmix_buffer(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed;
    let mut out = Vec::with_capacity(len + 8);
    while out.len() < len {
        state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        out.extend_from_slice(&z.to_le_bytes());
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KIB: usize = 1024;

    fn fixture_options() -> LeafChunkOptions {
        LeafChunkOptions::new(32 * KIB, 64 * KIB, 128 * KIB)
    }

    fn offsets(chunks: &[Chunk]) -> Vec<usize> {
        chunks.iter().map(|c| c.offset).collect()
    }

    // ----------------------------------------------------------------------
    // Recorded boundaries
    // ----------------------------------------------------------------------

    const RECORDED_OFFSETS: [usize; 17] = [
        0, 68455, 126577, 231583, 294872, 328553, 445281, 482286, 516143, 579397, 666325,
        700329, 795941, 830664, 890652, 953927, 1016778,
    ];

    #[test]
    fn splitmix_buffer_prefix() {
        let data = splitmix_buffer(42, 16);
        assert_eq!(
            data,
            [
                0x95, 0x6e, 0xeb, 0x2f, 0x26, 0x32, 0xd7, 0xbd, 0x03, 0xf1, 0x66, 0xb2, 0x33,
                0xe3, 0xef, 0x28
            ]
        );
    }

    #[test]
    fn reproduces_recorded_offsets() {
        let data = splitmix_buffer(42, 1024 * KIB);
        let chunks = chunk(&data, &fixture_options()).unwrap();
        assert_eq!(offsets(&chunks), RECORDED_OFFSETS);
        assert_eq!(chunks.last().unwrap().end(), data.len());
    }

    #[test]
    fn parallel_reproduces_recorded_offsets() {
        let data = splitmix_buffer(42, 1024 * KIB);
        for segment in [4 * KIB, 100_000, 256 * KIB, 4 * 1024 * KIB] {
            let chunks = chunk_parallel(&data, &fixture_options(), segment).unwrap();
            assert_eq!(offsets(&chunks), RECORDED_OFFSETS, "segment size {segment}");
        }
    }

    #[test]
    fn small_options_on_text() {
        let data = b"hello world".repeat(10);
        let chunks = chunk(&data, &LeafChunkOptions::new(4, 8, 16)).unwrap();
        assert_eq!(
            offsets(&chunks),
            [0, 4, 8, 13, 20, 24, 28, 36, 42, 48, 55, 59, 66, 70, 77, 81, 88, 92, 99, 103]
        );
    }

    // ----------------------------------------------------------------------
    // Edge cases
    // ----------------------------------------------------------------------

    #[test]
    fn empty_input_has_no_chunks() {
        assert!(chunk(&[], &fixture_options()).unwrap().is_empty());
        assert!(chunk_parallel(&[], &fixture_options(), 1024).unwrap().is_empty());
        let mut stream = StreamChunker::new(&fixture_options()).unwrap();
        assert!(stream.push(&[]).is_empty());
        assert_eq!(stream.finish(), None);
    }

    #[test]
    fn short_input_is_one_chunk() {
        let chunks = chunk(b"tiny", &fixture_options()).unwrap();
        assert_eq!(chunks, vec![Chunk { offset: 0, length: 4 }]);
    }

    #[test]
    fn constant_input_cuts_at_max() {
        let data = vec![0u8; 10 * 1000];
        let opts = LeafChunkOptions::new(100, 200, 1000);
        let chunks = chunk(&data, &opts).unwrap();
        assert!(chunks.iter().all(|c| c.length >= 100 && c.length <= 1000));
        assert_eq!(chunks.iter().map(|c| c.length).sum::<usize>(), data.len());
        assert_eq!(
            offsets(&chunk_parallel(&data, &opts, 333).unwrap()),
            offsets(&chunks)
        );
    }

    #[test]
    fn invalid_options_are_rejected() {
        let bad = LeafChunkOptions::new(10, 5, 20);
        assert!(matches!(chunk(b"x", &bad), Err(ChunkError::InvalidOptions(_))));
        assert!(chunk_parallel(b"x", &fixture_options(), 0).is_err());
    }

    // ----------------------------------------------------------------------
    // Properties
    // ----------------------------------------------------------------------

    fn small_options() -> impl Strategy<Value = LeafChunkOptions> {
        (1usize..64, 0usize..64, 0usize..128)
            .prop_map(|(min, t, m)| LeafChunkOptions::new(min, min + t, min + t + m))
    }

    proptest! {
        #[test]
        fn serial_incremental_and_parallel_agree(
            data in proptest::collection::vec(any::<u8>(), 0..4096),
            opts in small_options(),
            split in 1usize..97,
            segment in 1usize..700,
        ) {
            let serial = chunk(&data, &opts).unwrap();

            let mut stream = StreamChunker::new(&opts).unwrap();
            let mut lengths = Vec::new();
            for piece in data.chunks(split) {
                lengths.extend(stream.push(piece));
            }
            lengths.extend(stream.finish());
            prop_assert_eq!(serial.iter().map(|c| c.length).collect::<Vec<_>>(), lengths);

            let parallel = chunk_parallel(&data, &opts, segment).unwrap();
            prop_assert_eq!(&serial, &parallel);
        }

        #[test]
        fn chunks_respect_size_bounds(
            data in proptest::collection::vec(any::<u8>(), 1..4096),
            opts in small_options(),
        ) {
            let chunks = chunk(&data, &opts).unwrap();
            let (last, rest) = chunks.split_last().unwrap();
            for c in rest {
                prop_assert!(c.length >= opts.min_size && c.length <= opts.max_size);
            }
            prop_assert!(last.length >= 1 && last.length <= opts.max_size);
            prop_assert_eq!(last.end(), data.len());
        }
    }
}
