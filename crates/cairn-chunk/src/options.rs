//! Chunking configuration.

use serde::{Deserialize, Serialize};

use crate::error::{ChunkError, ChunkResult};

/// Size bounds for leaf chunks, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeafChunkOptions {
    pub min_size: usize,
    pub target_size: usize,
    pub max_size: usize,
}

impl LeafChunkOptions {
    pub const fn new(min_size: usize, target_size: usize, max_size: usize) -> Self {
        Self {
            min_size,
            target_size,
            max_size,
        }
    }

    pub fn validate(&self) -> ChunkResult<()> {
        if self.min_size == 0
            || self.min_size > self.target_size
            || self.target_size > self.max_size
        {
            return Err(ChunkError::InvalidOptions(format!(
                "leaf sizes must satisfy 0 < min <= target <= max, got {}/{}/{}",
                self.min_size, self.target_size, self.max_size
            )));
        }
        Ok(())
    }

    /// Hash mask of the boundary predicate: the largest power of two not
    /// above `target - min`, minus one.
    pub fn mask(&self) -> u32 {
        let spread = self.target_size.saturating_sub(self.min_size).max(1);
        let bits = (usize::BITS - 1 - spread.leading_zeros()).min(31);
        (1u32 << bits) - 1
    }
}

impl Default for LeafChunkOptions {
    fn default() -> Self {
        Self::new(32 * 1024, 64 * 1024, 128 * 1024)
    }
}

/// Child-count bounds for interior nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteriorChunkOptions {
    pub min_children: usize,
    pub target_children: usize,
    pub max_children: usize,
}

impl InteriorChunkOptions {
    pub const fn new(min_children: usize, target_children: usize, max_children: usize) -> Self {
        Self {
            min_children,
            target_children,
            max_children,
        }
    }

    pub fn validate(&self) -> ChunkResult<()> {
        if self.min_children < 2
            || self.min_children > self.target_children
            || self.target_children > self.max_children
        {
            return Err(ChunkError::InvalidOptions(format!(
                "interior counts must satisfy 2 <= min <= target <= max, got {}/{}/{}",
                self.min_children, self.target_children, self.max_children
            )));
        }
        Ok(())
    }

    /// Divisor of the group-closing predicate on child keys.
    pub fn divisor(&self) -> u32 {
        let spread = self.target_children.saturating_sub(self.min_children).max(1);
        u32::try_from(spread).unwrap_or(u32::MAX)
    }
}

impl Default for InteriorChunkOptions {
    fn default() -> Self {
        Self::new(2, 16, 64)
    }
}

/// Payload layout for interior nodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteriorEncoding {
    /// Total length only. Child lengths are recovered by reading children.
    V1,
    /// Total length, child count and every child length.
    #[default]
    V2,
}

impl InteriorEncoding {
    pub fn version(&self) -> u16 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

/// Everything that shapes a chunked data tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingOptions {
    pub leaf: LeafChunkOptions,
    pub interior: InteriorChunkOptions,
    pub interior_encoding: InteriorEncoding,
    /// Segment size for parallel leaf chunking. `None` chunks serially.
    pub parallel_segment_size: Option<usize>,
}

impl ChunkingOptions {
    pub fn validate(&self) -> ChunkResult<()> {
        self.leaf.validate()?;
        self.interior.validate()?;
        if self.parallel_segment_size == Some(0) {
            return Err(ChunkError::InvalidOptions(
                "parallel segment size must be positive".into(),
            ));
        }
        Ok(())
    }
}
