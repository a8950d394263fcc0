//! BuzHash rolling hash.
//!
//! The state is a 32-bit word. Adding a byte rotates the state left by one
//! and mixes in that byte's table entry; once the window is full the entry
//! of the byte leaving it is removed again, rotated by the window size. The
//! value after byte `i` therefore depends only on the last [`WINDOW_SIZE`]
//! bytes, which is what lets the parallel chunker start mid-stream.

/// Bytes covered by the rolling window.
pub const WINDOW_SIZE: usize = 48;

const TABLE_SEED: u64 = 0x6361_6972_6e5f_627a;

/// Byte substitution table, the high halves of a SplitMix64 sequence.
pub static TABLE: [u32; 256] = build_table(TABLE_SEED);

const fn build_table(seed: u64) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut state = seed;
    let mut i = 0;
    while i < 256 {
        state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        table[i] = (z >> 32) as u32;
        i += 1;
    }
    table
}

/// Rolling hash over the last [`WINDOW_SIZE`] bytes fed to it.
#[derive(Clone)]
pub struct BuzHash {
    hash: u32,
    window: [u8; WINDOW_SIZE],
    next: usize,
    filled: usize,
}

impl BuzHash {
    pub fn new() -> Self {
        Self {
            hash: 0,
            window: [0; WINDOW_SIZE],
            next: 0,
            filled: 0,
        }
    }

    /// Feed one byte and return the updated hash.
    #[inline]
    pub fn roll(&mut self, byte: u8) -> u32 {
        self.hash = self.hash.rotate_left(1) ^ TABLE[byte as usize];
        if self.filled == WINDOW_SIZE {
            let out = self.window[self.next];
            self.hash ^= TABLE[out as usize].rotate_left((WINDOW_SIZE % 32) as u32);
        } else {
            self.filled += 1;
        }
        self.window[self.next] = byte;
        self.next = (self.next + 1) % WINDOW_SIZE;
        self.hash
    }

    /// Feed a run of bytes without inspecting intermediate values.
    pub fn prime(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.roll(b);
        }
    }

    pub fn value(&self) -> u32 {
        self.hash
    }
}

impl Default for BuzHash {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BuzHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuzHash")
            .field("hash", &format_args!("{:08x}", self.hash))
            .field("filled", &self.filled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn table_is_fixed() {
        assert_eq!(TABLE[0], 0x7f92_58a5);
        assert_eq!(TABLE[1], 0x0201_c25b);
        assert_eq!(TABLE[2], 0xb7b6_d9a2);
        assert_eq!(TABLE[3], 0x63f9_b22b);
    }

    #[test]
    fn first_byte_is_table_entry() {
        let mut h = BuzHash::new();
        assert_eq!(h.roll(0), TABLE[0]);
    }

    proptest! {
        #[test]
        fn value_depends_only_on_window(
            prefix_a in proptest::collection::vec(any::<u8>(), 0..200),
            prefix_b in proptest::collection::vec(any::<u8>(), 0..200),
            window in proptest::collection::vec(any::<u8>(), WINDOW_SIZE..WINDOW_SIZE + 1),
        ) {
            let mut a = BuzHash::new();
            a.prime(&prefix_a);
            a.prime(&window);
            let mut b = BuzHash::new();
            b.prime(&prefix_b);
            b.prime(&window);
            prop_assert_eq!(a.value(), b.value());
        }
    }
}
