use std::fmt;

use cairn_types::BlobHash;
use serde::{Deserialize, Serialize};

/// Where a sync call is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    #[default]
    Idle,
    /// Comparing the target tree against manifests and the filesystem.
    Diffing,
    /// Moving, copying, downloading and deleting files.
    Applying,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Diffing => "diffing",
            Self::Applying => "applying",
        };
        f.write_str(s)
    }
}

/// Counters for one sync.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSyncStats {
    pub files_kept: u64,
    pub files_moved: u64,
    pub files_copied: u64,
    pub files_downloaded: u64,
    pub files_deleted: u64,
    /// Bytes placed from files already on disk, by move or copy.
    pub bytes_reused: u64,
    pub bytes_downloaded: u64,
}

/// The step a per-file failure happened in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    /// Another layer owns the path with different content.
    Conflict,
    Move,
    Copy,
    Download,
    Delete,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Conflict => "conflict",
            Self::Move => "move",
            Self::Copy => "copy",
            Self::Download => "download",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// A file that could not be brought to its target state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub path: String,
    pub operation: SyncOperation,
    pub message: String,
}

impl SyncFailure {
    pub fn new(path: impl Into<String>, operation: SyncOperation, message: impl ToString) -> Self {
        Self {
            path: path.into(),
            operation,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.operation, self.path, self.message)
    }
}

/// Outcome of a sync that ran to completion.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Tree the layer now tracks.
    pub tree: Option<BlobHash>,
    pub stats: WorkspaceSyncStats,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// How a path on disk differs from what the layers recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChange {
    /// Owned by a layer, but its length or last-write time changed.
    Modified,
    /// Owned by a layer and gone from disk.
    Missing,
    /// On disk and owned by no layer.
    Untracked,
}

impl fmt::Display for FileChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Modified => "modified",
            Self::Missing => "missing",
            Self::Untracked => "untracked",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub path: String,
    pub change: FileChange,
}

/// Result of [`Workspace::status`](crate::Workspace::status), sorted by path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceStatus {
    /// Files the layers own that were looked at.
    pub tracked: u64,
    pub entries: Vec<StatusEntry>,
}

impl WorkspaceStatus {
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }

    /// Paths with the given kind of change.
    pub fn paths(&self, change: FileChange) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(move |e| e.change == change)
            .map(|e| e.path.as_str())
    }
}

/// A file whose bytes on disk are not the ones its layer recorded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyMismatch {
    pub path: String,
    pub message: String,
}

impl fmt::Display for VerifyMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Result of [`Workspace::verify`](crate::Workspace::verify).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub files_checked: u64,
    pub bytes_checked: u64,
    /// Sorted by path.
    pub mismatches: Vec<VerifyMismatch>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}
