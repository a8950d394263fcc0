//! Snapshotting directories from disk and materializing them again.

use std::collections::HashMap;
use std::fs::{File, Metadata};
use std::io::Read;
use std::path::{Path, PathBuf};

use cairn_chunk::{write_chunked_data, ChunkedData, ChunkedDataReader, ChunkedDataWriter, ChunkingOptions};
use cairn_store::{BlobStore, BlobWriter};
use cairn_types::{BlobHash, CancellationToken};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{TreeError, TreeResult};
use crate::name::NameComparison;
use crate::node::{read_directory_with, write_directory, DirectoryEntry, DirectoryNode, FileEntry, FileFlags};
use crate::walk::flushed;

const READ_BUFFER: usize = 1024 * 1024;

/// How a directory is turned into a tree.
#[derive(Clone, Debug)]
pub struct BuildOptions {
    pub chunking: ChunkingOptions,
    pub comparison: NameComparison,
    /// Entry names skipped at every depth.
    pub exclude: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingOptions::default(),
            comparison: NameComparison::default(),
            exclude: vec![".cairn".to_string()],
        }
    }
}

/// Counts from [`extract_to_path`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub files: u64,
    pub directories: u64,
    pub bytes: u64,
}

/// Chunk every file below `dir` and queue its directory nodes on `writer`,
/// children before parents. Returns the root node, not yet written.
///
/// Symbolic links and other special files are skipped.
pub fn build_from_path(
    writer: &mut BlobWriter,
    dir: &Path,
    options: &BuildOptions,
    cancel: &CancellationToken,
) -> TreeResult<DirectoryNode> {
    if !std::fs::metadata(dir)?.is_dir() {
        return Err(TreeError::PathNotFound(dir.display().to_string()));
    }
    let entries = WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !options
                    .exclude
                    .iter()
                    .any(|x| e.file_name().to_str() == Some(x.as_str()))
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(std::io::Error::from)?;

    let new_node = || DirectoryNode::new().with_comparison(options.comparison);
    let mut open: HashMap<PathBuf, DirectoryNode> = HashMap::new();
    let mut root = None;

    // Reverse pre-order visits every directory after all of its contents.
    for entry in entries.iter().rev() {
        cancel.check()?;
        let path = entry.path();
        if entry.depth() == 0 {
            root = Some(open.remove(path).unwrap_or_else(new_node));
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            warn!("skipping non-UTF-8 name {:?}", path);
            continue;
        };
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let file_type = entry.file_type();
        if file_type.is_file() {
            let metadata = entry.metadata().map_err(std::io::Error::from)?;
            let data = chunk_file(writer, path, &options.chunking, cancel)?;
            let file = FileEntry::new(name, file_flags(&metadata), data);
            open.entry(parent).or_insert_with(new_node).add_file(file)?;
        } else if file_type.is_dir() {
            let node = open.remove(path).unwrap_or_else(new_node);
            let handle = write_directory(writer, &node)?;
            let dir_entry = DirectoryEntry::new(name, node.length(), handle);
            open.entry(parent)
                .or_insert_with(new_node)
                .add_directory(dir_entry)?;
        } else {
            warn!("skipping {:?}: not a regular file or directory", path);
        }
    }

    let root = root.unwrap_or_else(new_node);
    debug!(
        path = %dir.display(),
        files = root.files().len(),
        directories = root.directories().len(),
        length = root.length(),
        "built directory tree"
    );
    Ok(root)
}

/// Build, write and flush a snapshot of `dir`. Returns the root hash.
pub fn snapshot_path(
    writer: &mut BlobWriter,
    dir: &Path,
    options: &BuildOptions,
    cancel: &CancellationToken,
) -> TreeResult<BlobHash> {
    let root = build_from_path(writer, dir, options, cancel)?;
    let handle = write_directory(writer, &root)?;
    let hash = writer.flush_and_resolve(&handle)?;
    info!(path = %dir.display(), root = %hash, "snapshot written");
    Ok(hash)
}

fn chunk_file(
    writer: &mut BlobWriter,
    path: &Path,
    options: &ChunkingOptions,
    cancel: &CancellationToken,
) -> TreeResult<ChunkedData> {
    if options.parallel_segment_size.is_some() {
        let data = std::fs::read(path)?;
        return Ok(write_chunked_data(writer, &data, *options, cancel)?);
    }
    let mut file = File::open(path)?;
    let mut out = ChunkedDataWriter::new(writer, *options)?.with_cancellation(cancel.clone());
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.append(&buf[..n])?;
    }
    Ok(out.finish()?)
}

/// Flags recorded for a file on disk.
pub fn file_flags(metadata: &Metadata) -> FileFlags {
    let mut flags = FileFlags::NONE;
    if metadata.permissions().readonly() {
        flags.insert(FileFlags::READ_ONLY);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 != 0 {
            flags.insert(FileFlags::EXECUTABLE);
        }
    }
    flags
}

/// Set permissions on `path` to match `flags`.
pub fn apply_flags(path: &Path, flags: FileFlags) -> std::io::Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut mode = if flags.contains(FileFlags::EXECUTABLE) {
            0o755
        } else {
            0o644
        };
        if flags.contains(FileFlags::READ_ONLY) {
            mode &= !0o222;
        }
        perms.set_mode(mode);
    }
    #[cfg(not(unix))]
    perms.set_readonly(flags.contains(FileFlags::READ_ONLY));
    std::fs::set_permissions(path, perms)
}

/// Write every file and directory of `node` below `dir`.
///
/// Each file goes to a temporary name in its target directory first and is
/// renamed into place once complete. Cancellation is checked per file.
pub fn extract_to_path(
    store: &dyn BlobStore,
    node: &DirectoryNode,
    dir: &Path,
    cancel: &CancellationToken,
) -> TreeResult<ExtractStats> {
    std::fs::create_dir_all(dir)?;
    let mut stats = ExtractStats::default();
    for file in node.files() {
        cancel.check()?;
        stats.bytes += extract_file(store, file, &dir.join(&file.name), cancel)?;
        stats.files += 1;
    }
    for sub in node.directories() {
        cancel.check()?;
        let child =
            read_directory_with(store, &flushed(&sub.handle, &sub.name)?, node.comparison())?;
        let target = dir.join(&sub.name);
        if target.is_file() {
            std::fs::remove_file(&target)?;
        }
        let child_stats = extract_to_path(store, &child, &target, cancel)?;
        stats.files += child_stats.files;
        stats.directories += child_stats.directories + 1;
        stats.bytes += child_stats.bytes;
    }
    Ok(stats)
}

/// Materialize one file at `target`. Returns the bytes written.
pub fn extract_file(
    store: &dyn BlobStore,
    file: &FileEntry,
    target: &Path,
    cancel: &CancellationToken,
) -> TreeResult<u64> {
    let root = flushed(&file.data.root, &file.name)?;
    let parent = target
        .parent()
        .ok_or_else(|| TreeError::PathNotFound(target.display().to_string()))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".cairn-extract-")
        .tempfile_in(parent)?;
    let written = ChunkedDataReader::new(store).copy_to(&root, tmp.as_file_mut(), cancel)?;
    tmp.as_file().sync_all()?;
    apply_flags(tmp.path(), file.flags)?;
    if target.is_dir() {
        std::fs::remove_dir_all(target)?;
    }
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(written)
}
