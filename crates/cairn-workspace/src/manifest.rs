//! Per-layer manifests stored under the control directory.
//!
//! A manifest records the tree a layer was last synced to and every file the
//! layer owns, keyed by `/`-separated path from the workspace root. Manifests
//! are bincode documents replaced atomically on every save.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use cairn_tree::FileFlags;
use cairn_types::BlobHash;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{WorkspaceError, WorkspaceResult};
use crate::layer::LayerId;

const MANIFEST_VERSION: u32 = 2;
const EXTENSION: &str = "manifest";

/// Length and last-write time of a file on disk.
///
/// Two stamps that differ mean the file was touched since it was recorded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FileStamp {
    pub length: u64,
    /// Nanoseconds since the Unix epoch, 0 when the platform has no mtime.
    pub modified: u64,
}

impl FileStamp {
    pub fn of(metadata: &Metadata) -> Self {
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX));
        Self {
            length: metadata.len(),
            modified,
        }
    }

    /// Stamp of the regular file at `path`, `None` for anything else.
    pub fn read(path: &Path) -> Option<Self> {
        std::fs::symlink_metadata(path)
            .ok()
            .filter(Metadata::is_file)
            .map(|m| Self::of(&m))
    }
}

/// A file owned by a layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub stream_hash: BlobHash,
    pub length: u64,
    pub flags: FileFlags,
    /// Last-write time seen right after the file was placed, as in
    /// [`FileStamp::modified`]. Zero for records not yet on disk.
    pub modified: u64,
}

impl ManifestFile {
    /// Whether two records describe the same bytes.
    pub fn same_content(&self, other: &ManifestFile) -> bool {
        self.stream_hash == other.stream_hash && self.length == other.length
    }

    pub fn stamp(&self) -> FileStamp {
        FileStamp {
            length: self.length,
            modified: self.modified,
        }
    }

    /// Whether the file on disk is untouched since this record was made.
    pub fn matches_disk(&self, disk: Option<FileStamp>) -> bool {
        disk == Some(self.stamp())
    }
}

/// What a layer last synced and which files it owns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerManifest {
    version: u32,
    /// Directory node of the last completed sync.
    pub tree: Option<BlobHash>,
    pub files: BTreeMap<String, ManifestFile>,
}

impl LayerManifest {
    pub fn new(tree: Option<BlobHash>, files: BTreeMap<String, ManifestFile>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            tree,
            files,
        }
    }
}

impl Default for LayerManifest {
    fn default() -> Self {
        Self::new(None, BTreeMap::new())
    }
}

/// Directory of layer manifests.
#[derive(Clone, Debug)]
pub(crate) struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, layer: &LayerId) -> PathBuf {
        self.dir.join(format!("{layer}.{EXTENSION}"))
    }

    fn unreadable(layer: &LayerId, reason: impl ToString) -> WorkspaceError {
        WorkspaceError::Manifest {
            layer: layer.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn load(&self, layer: &LayerId) -> WorkspaceResult<Option<LayerManifest>> {
        let bytes = match std::fs::read(self.path(layer)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let manifest: LayerManifest =
            bincode::deserialize(&bytes).map_err(|e| Self::unreadable(layer, e))?;
        if manifest.version != MANIFEST_VERSION {
            return Err(Self::unreadable(
                layer,
                format!("unsupported manifest version {}", manifest.version),
            ));
        }
        Ok(Some(manifest))
    }

    pub(crate) fn save(&self, layer: &LayerId, manifest: &LayerManifest) -> WorkspaceResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let bytes = bincode::serialize(manifest).map_err(|e| Self::unreadable(layer, e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path(layer)).map_err(|e| e.error)?;
        debug!(%layer, files = manifest.files.len(), "saved layer manifest");
        Ok(())
    }

    pub(crate) fn remove(&self, layer: &LayerId) -> WorkspaceResult<bool> {
        match std::fs::remove_file(self.path(layer)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Every layer with a manifest, sorted.
    pub(crate) fn list(&self) -> WorkspaceResult<Vec<LayerId>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut layers = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| LayerId::new(s).ok())
            {
                layers.push(id);
            }
        }
        layers.sort();
        Ok(layers)
    }
}
