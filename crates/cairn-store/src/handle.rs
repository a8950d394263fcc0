use std::fmt;

use cairn_types::BlobHash;

/// A blob written to a [`BlobWriter`](crate::BlobWriter) session whose hash
/// is not known yet. It indexes the session's arena of pending blobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PendingBlob {
    session: u64,
    index: u32,
}

impl PendingBlob {
    pub(crate) fn new(session: u64, index: u32) -> Self {
        Self { session, index }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for PendingBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pending#{}:{}", self.session, self.index)
    }
}

/// Reference to a blob, usable as an outgoing ref before its hash is known.
///
/// Writes return `Pending` handles; once the session flushes, every pending
/// handle resolves to a `Hashed` one through the writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlobHandle {
    Hashed(BlobHash),
    Pending(PendingBlob),
}

impl BlobHandle {
    /// The hash, when already known.
    pub fn hash(&self) -> Option<BlobHash> {
        match self {
            Self::Hashed(hash) => Some(*hash),
            Self::Pending(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

impl From<BlobHash> for BlobHandle {
    fn from(hash: BlobHash) -> Self {
        Self::Hashed(hash)
    }
}

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hashed(hash) => write!(f, "{hash}"),
            Self::Pending(pending) => write!(f, "{pending}"),
        }
    }
}
