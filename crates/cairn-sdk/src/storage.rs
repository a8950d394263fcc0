use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cairn_bundle::FileBundleStore;
use cairn_chunk::{chunk, chunk_parallel, write_chunked_data, Chunk, ChunkedData, ChunkedDataReader};
use cairn_refs::{FileRefStore, RefName, RefStore};
use cairn_store::{BlobStore, BlobWriter};
use cairn_tree::{
    extract_to_path, read_directory_with, snapshot_path, write_archive, DirectoryNode, ExtractStats,
};
use cairn_types::{BlobHash, CancellationToken};
use cairn_workspace::Workspace;
use tracing::{debug, info};

use crate::config::CairnConfig;
use crate::error::{SdkError, SdkResult};

const BUNDLE_DIR: &str = "bundles";
const REFS_FILE: &str = "refs.json";

/// A local Cairn store: bundle files and refs under one root directory.
pub struct Storage {
    config: CairnConfig,
    blobs: Arc<FileBundleStore>,
    refs: FileRefStore,
}

impl Storage {
    /// Open (creating if needed) the store at `config.storage.root`.
    pub fn open(config: CairnConfig) -> SdkResult<Self> {
        config.validate()?;
        let root = config.storage.root.clone();
        std::fs::create_dir_all(&root)?;
        let blobs = FileBundleStore::open(root.join(BUNDLE_DIR), config.bundle_options()?)?;
        let refs = FileRefStore::open(root.join(REFS_FILE))?;
        info!(
            root = %root.display(),
            blobs = blobs.blob_count(),
            codec = %config.storage.codec,
            "opened storage"
        );
        Ok(Self {
            config,
            blobs: Arc::new(blobs),
            refs,
        })
    }

    pub fn config(&self) -> &CairnConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.storage.root
    }

    pub fn blob_store(&self) -> Arc<dyn BlobStore> {
        self.blobs.clone()
    }

    /// The ref store, for alias operations and compare-and-swap updates.
    pub fn refs(&self) -> &FileRefStore {
        &self.refs
    }

    // ---- Chunked data ----

    /// Chunk boundaries of a file, without storing anything.
    pub fn chunk_file(&self, path: &Path) -> SdkResult<Vec<Chunk>> {
        let data = std::fs::read(path)?;
        let options = &self.config.chunking;
        let chunks = match options.parallel_segment_size {
            Some(segment) => chunk_parallel(&data, &options.leaf, segment)?,
            None => chunk(&data, &options.leaf)?,
        };
        debug!(path = %path.display(), chunks = chunks.len(), "chunked file");
        Ok(chunks)
    }

    /// Store `data` as a chunked data tree. Returns the flushed root hash
    /// together with the tree description.
    pub fn write_data(
        &self,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> SdkResult<(BlobHash, ChunkedData)> {
        let mut writer = BlobWriter::new(self.blob_store());
        let written = write_chunked_data(&mut writer, data, self.config.chunking, cancel)?;
        let root = writer.flush_and_resolve(&written.root)?;
        Ok((root, written))
    }

    pub fn read_data(&self, root: &BlobHash) -> SdkResult<Vec<u8>> {
        Ok(ChunkedDataReader::new(self.blobs.as_ref()).read_all(root)?)
    }

    // ---- Directory trees ----

    /// Snapshot `dir` into the store. Returns the root directory hash.
    pub fn snapshot(&self, dir: &Path, cancel: &CancellationToken) -> SdkResult<BlobHash> {
        let mut writer = BlobWriter::new(self.blob_store());
        Ok(snapshot_path(&mut writer, dir, &self.config.build_options(), cancel)?)
    }

    /// Read a directory node with the configured name comparison.
    pub fn read_tree(&self, tree: &BlobHash) -> SdkResult<DirectoryNode> {
        Ok(read_directory_with(
            self.blobs.as_ref(),
            tree,
            self.config.tree.comparison,
        )?)
    }

    pub fn extract(
        &self,
        tree: &BlobHash,
        dir: &Path,
        cancel: &CancellationToken,
    ) -> SdkResult<ExtractStats> {
        let node = self.read_tree(tree)?;
        let stats = extract_to_path(self.blobs.as_ref(), &node, dir, cancel)?;
        info!(
            tree = %tree,
            path = %dir.display(),
            files = stats.files,
            bytes = stats.bytes,
            "extracted tree"
        );
        Ok(stats)
    }

    /// Export `tree` as a zip archive at `path`.
    pub fn archive(&self, tree: &BlobHash, path: &Path) -> SdkResult<()> {
        let node = self.read_tree(tree)?;
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let tmp = tempfile::NamedTempFile::new_in(&parent)?;
        let sink = write_archive(self.blobs.as_ref(), &node, BufWriter::new(tmp))?;
        let tmp = sink
            .into_inner()
            .map_err(|e| SdkError::Io(e.into_error()))?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| SdkError::Io(e.error))?;
        info!(tree = %tree, path = %path.display(), "wrote archive");
        Ok(())
    }

    // ---- Refs ----

    /// Point `name` at `target`. Returns the previous target.
    pub fn set_ref(&self, name: &str, target: BlobHash) -> SdkResult<Option<BlobHash>> {
        Ok(self.refs.write_ref(&RefName::new(name)?, target)?)
    }

    pub fn read_ref(&self, name: &str) -> SdkResult<Option<BlobHash>> {
        Ok(self.refs.read_ref(&RefName::new(name)?)?)
    }

    pub fn delete_ref(&self, name: &str) -> SdkResult<bool> {
        Ok(self.refs.delete_ref(&RefName::new(name)?)?)
    }

    pub fn list_refs(&self, prefix: &str) -> SdkResult<Vec<(RefName, BlobHash)>> {
        Ok(self.refs.list_refs(prefix)?)
    }

    /// A full hex hash, or the name of a ref pointing at one.
    pub fn resolve(&self, spec: &str) -> SdkResult<BlobHash> {
        if spec.len() == 64 {
            if let Ok(hash) = BlobHash::from_hex(spec) {
                return Ok(hash);
            }
        }
        self.read_ref(spec)?
            .ok_or_else(|| SdkError::NotFound(format!("no hash or ref named {spec}")))
    }

    // ---- Workspaces ----

    pub fn open_workspace(&self, root: impl Into<PathBuf>) -> SdkResult<Workspace> {
        Ok(Workspace::open(
            root,
            self.blob_store(),
            self.config.workspace_options(),
        )?)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("root", &self.config.storage.root)
            .field("blobs", &self.blobs.blob_count())
            .finish()
    }
}
