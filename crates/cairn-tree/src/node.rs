//! Directory nodes and their blob encoding.
//!
//! The payload is a bincode document listing every file (name, flags,
//! length, stream hash) and every subdirectory (name, length). Outgoing refs
//! hold the file roots followed by the subdirectory nodes, in the same order,
//! so the store can walk the graph without decoding payloads.

use std::ops::BitOr;

use cairn_chunk::ChunkedData;
use cairn_store::{BlobHandle, BlobStore, BlobType, BlobWriter, StoreError};
use cairn_types::BlobHash;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{TreeError, TreeResult};
use crate::name::{validate_entry_name, NameComparison};

/// Blob type of directory nodes.
pub const DIRECTORY_TYPE: BlobType = BlobType::new(0x4344_4952, 1);

/// Per-file attribute bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileFlags(u32);

impl FileFlags {
    pub const NONE: Self = Self(0);
    pub const EXECUTABLE: Self = Self(1);
    pub const READ_ONLY: Self = Self(1 << 1);

    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Keep only known bits.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & (Self::EXECUTABLE.0 | Self::READ_ONLY.0))
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl BitOr for FileFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A file: its name, flags and chunked content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub flags: FileFlags,
    pub data: ChunkedData,
}

impl FileEntry {
    pub fn new(name: impl Into<String>, flags: FileFlags, data: ChunkedData) -> Self {
        Self {
            name: name.into(),
            flags,
            data,
        }
    }

    pub fn length(&self) -> u64 {
        self.data.length
    }
}

/// A subdirectory: its name, total length and node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub length: u64,
    pub handle: BlobHandle,
}

impl DirectoryEntry {
    pub fn new(name: impl Into<String>, length: u64, handle: BlobHandle) -> Self {
        Self {
            name: name.into(),
            length,
            handle,
        }
    }
}

/// One directory of a snapshot.
///
/// Entries are kept sorted by the byte order of their names whatever the
/// [`NameComparison`] policy, so equal contents always encode identically.
/// A name is either a file or a directory, never both.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryNode {
    comparison: NameComparison,
    files: Vec<FileEntry>,
    directories: Vec<DirectoryEntry>,
}

impl DirectoryNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_comparison(mut self, comparison: NameComparison) -> Self {
        self.comparison = comparison;
        self
    }

    pub fn comparison(&self) -> NameComparison {
        self.comparison
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn directories(&self) -> &[DirectoryEntry] {
        &self.directories
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.directories.is_empty()
    }

    /// Total length of every file below this directory.
    pub fn length(&self) -> u64 {
        self.files.iter().map(FileEntry::length).sum::<u64>()
            + self.directories.iter().map(|d| d.length).sum::<u64>()
    }

    /// Add a file, replacing any file or directory with a matching name.
    pub fn add_file(&mut self, entry: FileEntry) -> TreeResult<()> {
        validate_entry_name(&entry.name)?;
        self.remove_file(&entry.name);
        self.remove_directory(&entry.name);
        let pos = self.files.partition_point(|f| f.name < entry.name);
        self.files.insert(pos, entry);
        Ok(())
    }

    pub fn remove_file(&mut self, name: &str) -> Option<FileEntry> {
        let pos = self.file_index(name)?;
        Some(self.files.remove(pos))
    }

    pub fn find_file(&self, name: &str) -> Option<&FileEntry> {
        self.file_index(name).map(|i| &self.files[i])
    }

    /// Add a subdirectory, replacing any file or directory with a matching name.
    pub fn add_directory(&mut self, entry: DirectoryEntry) -> TreeResult<()> {
        validate_entry_name(&entry.name)?;
        self.remove_file(&entry.name);
        self.remove_directory(&entry.name);
        let pos = self.directories.partition_point(|d| d.name < entry.name);
        self.directories.insert(pos, entry);
        Ok(())
    }

    pub fn remove_directory(&mut self, name: &str) -> Option<DirectoryEntry> {
        let pos = self.directory_index(name)?;
        Some(self.directories.remove(pos))
    }

    pub fn find_directory(&self, name: &str) -> Option<&DirectoryEntry> {
        self.directory_index(name).map(|i| &self.directories[i])
    }

    /// Remove the file or subdirectory at a `/`-separated path below this
    /// node, rewriting every directory node on the way down.
    ///
    /// Returns `Ok(false)` if nothing exists at `path`.
    pub fn delete_path(
        &mut self,
        store: &dyn BlobStore,
        writer: &mut BlobWriter,
        path: &str,
    ) -> TreeResult<bool> {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            return Err(TreeError::InvalidName {
                name: path.to_string(),
                reason: "path has no components".into(),
            });
        }
        self.delete_components(store, writer, &components)
    }

    fn delete_components(
        &mut self,
        store: &dyn BlobStore,
        writer: &mut BlobWriter,
        components: &[&str],
    ) -> TreeResult<bool> {
        let (first, rest) = match components {
            [last] => {
                let removed =
                    self.remove_file(last).is_some() || self.remove_directory(last).is_some();
                return Ok(removed);
            }
            [first, rest @ ..] => (*first, rest),
            [] => return Ok(false),
        };
        let Some(index) = self.directory_index(first) else {
            return Ok(false);
        };
        let hash = writer.flush_and_resolve(&self.directories[index].handle)?;
        let mut child = read_directory_with(store, &hash, self.comparison)?;
        if !child.delete_components(store, writer, rest)? {
            return Ok(false);
        }
        let entry = &mut self.directories[index];
        entry.handle = write_directory(writer, &child)?;
        entry.length = child.length();
        Ok(true)
    }

    fn file_index(&self, name: &str) -> Option<usize> {
        match self.comparison {
            NameComparison::CaseSensitive => self
                .files
                .binary_search_by(|f| f.name.as_str().cmp(name))
                .ok(),
            NameComparison::CaseInsensitive => self
                .files
                .iter()
                .position(|f| self.comparison.eq(&f.name, name)),
        }
    }

    fn directory_index(&self, name: &str) -> Option<usize> {
        match self.comparison {
            NameComparison::CaseSensitive => self
                .directories
                .binary_search_by(|d| d.name.as_str().cmp(name))
                .ok(),
            NameComparison::CaseInsensitive => self
                .directories
                .iter()
                .position(|d| self.comparison.eq(&d.name, name)),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct FileRecord {
    name: String,
    flags: u32,
    length: u64,
    stream_hash: BlobHash,
}

#[derive(Serialize, Deserialize)]
struct DirectoryRecord {
    name: String,
    length: u64,
}

#[derive(Serialize, Deserialize)]
struct DirectoryPayload {
    files: Vec<FileRecord>,
    directories: Vec<DirectoryRecord>,
}

/// Queue `node` on `writer` and return its handle.
pub fn write_directory(writer: &mut BlobWriter, node: &DirectoryNode) -> TreeResult<BlobHandle> {
    let payload = DirectoryPayload {
        files: node
            .files
            .iter()
            .map(|f| FileRecord {
                name: f.name.clone(),
                flags: f.flags.bits(),
                length: f.data.length,
                stream_hash: f.data.stream_hash,
            })
            .collect(),
        directories: node
            .directories
            .iter()
            .map(|d| DirectoryRecord {
                name: d.name.clone(),
                length: d.length,
            })
            .collect(),
    };
    let bytes =
        bincode::serialize(&payload).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let refs: Vec<BlobHandle> = node
        .files
        .iter()
        .map(|f| f.data.root.clone())
        .chain(node.directories.iter().map(|d| d.handle.clone()))
        .collect();
    Ok(writer.write(DIRECTORY_TYPE, bytes, &refs)?)
}

/// Read and decode the directory node stored under `hash`, with the default
/// name comparison.
pub fn read_directory(store: &dyn BlobStore, hash: &BlobHash) -> TreeResult<DirectoryNode> {
    read_directory_with(store, hash, NameComparison::default())
}

/// Read a directory node that matches names with `comparison`.
///
/// The policy is not part of the stored payload, so a node hashes the same
/// under either policy.
pub fn read_directory_with(
    store: &dyn BlobStore,
    hash: &BlobHash,
    comparison: NameComparison,
) -> TreeResult<DirectoryNode> {
    let blob = store.fetch(hash)?;
    let corrupt = |reason: String| TreeError::Corrupt {
        hash: *hash,
        reason,
    };
    if blob.blob_type != DIRECTORY_TYPE {
        return Err(corrupt(format!("unexpected blob type {}", blob.blob_type)));
    }
    let payload: DirectoryPayload =
        bincode::deserialize(&blob.payload).map_err(|e| corrupt(e.to_string()))?;
    if payload.files.len() + payload.directories.len() != blob.refs.len() {
        return Err(corrupt(format!(
            "{} entries but {} refs",
            payload.files.len() + payload.directories.len(),
            blob.refs.len()
        )));
    }
    let (file_refs, dir_refs) = blob.refs.split_at(payload.files.len());
    let files = payload
        .files
        .into_iter()
        .zip(file_refs)
        .map(|(f, root)| FileEntry {
            name: f.name,
            flags: FileFlags::from_bits_truncate(f.flags),
            data: ChunkedData {
                root: BlobHandle::Hashed(*root),
                length: f.length,
                stream_hash: f.stream_hash,
            },
        })
        .collect();
    let directories = payload
        .directories
        .into_iter()
        .zip(dir_refs)
        .map(|(d, handle)| DirectoryEntry::new(d.name, d.length, BlobHandle::Hashed(*handle)))
        .collect();
    debug!(%hash, "read directory node");
    Ok(DirectoryNode {
        comparison,
        files,
        directories,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cairn_chunk::{write_chunked_data, ChunkingOptions};
    use cairn_store::InMemoryBlobStore;
    use cairn_types::CancellationToken;

    use super::*;

    fn setup() -> (Arc<InMemoryBlobStore>, BlobWriter) {
        let store = Arc::new(InMemoryBlobStore::new());
        let writer = BlobWriter::new(store.clone());
        (store, writer)
    }

    fn file(writer: &mut BlobWriter, name: &str, content: &[u8]) -> FileEntry {
        let data = write_chunked_data(
            writer,
            content,
            ChunkingOptions::default(),
            &CancellationToken::none(),
        )
        .unwrap();
        FileEntry::new(name, FileFlags::NONE, data)
    }

    #[test]
    fn entries_stay_sorted_by_bytes() {
        let (_, mut writer) = setup();
        let mut node = DirectoryNode::new();
        for name in ["b", "B", "a", "_"] {
            let entry = file(&mut writer, name, name.as_bytes());
            node.add_file(entry).unwrap();
        }
        let names: Vec<_> = node.files().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["B", "_", "a", "b"]);
        assert_eq!(node.length(), 4);
    }

    #[test]
    fn case_insensitive_replacement_keeps_new_case() {
        let (_, mut writer) = setup();
        let mut node = DirectoryNode::new().with_comparison(NameComparison::CaseInsensitive);
        node.add_file(file(&mut writer, "README.md", b"old")).unwrap();
        node.add_file(file(&mut writer, "readme.md", b"new!")).unwrap();
        assert_eq!(node.files().len(), 1);
        assert_eq!(node.files()[0].name, "readme.md");
        assert_eq!(node.find_file("ReadMe.MD").unwrap().length(), 4);
        assert!(node.remove_file("README.MD").is_some());
        assert!(node.is_empty());

        let mut sensitive = DirectoryNode::new();
        sensitive.add_file(file(&mut writer, "README.md", b"old")).unwrap();
        sensitive.add_file(file(&mut writer, "readme.md", b"new")).unwrap();
        assert_eq!(sensitive.files().len(), 2);
        assert!(sensitive.find_file("ReadMe.md").is_none());
    }

    #[test]
    fn file_replaces_directory_of_same_name() {
        let (_, mut writer) = setup();
        let mut node = DirectoryNode::new();
        let empty = write_directory(&mut writer, &DirectoryNode::new()).unwrap();
        node.add_directory(DirectoryEntry::new("x", 0, empty)).unwrap();
        node.add_file(file(&mut writer, "x", b"data")).unwrap();
        assert!(node.find_directory("x").is_none());
        assert!(node.find_file("x").is_some());
        assert!(node.add_file(file(&mut writer, "a/b", b"")).is_err());
    }

    #[test]
    fn write_read_round_trip() {
        let (store, mut writer) = setup();
        let mut sub = DirectoryNode::new();
        sub.add_file(file(&mut writer, "inner.txt", b"inner")).unwrap();
        let sub_handle = write_directory(&mut writer, &sub).unwrap();

        let mut root = DirectoryNode::new();
        let mut exe = file(&mut writer, "run.sh", b"#!/bin/sh\n");
        exe.flags = FileFlags::EXECUTABLE | FileFlags::READ_ONLY;
        root.add_file(exe).unwrap();
        root.add_directory(DirectoryEntry::new("sub", sub.length(), sub_handle))
            .unwrap();
        let handle = write_directory(&mut writer, &root).unwrap();
        let hash = writer.flush_and_resolve(&handle).unwrap();

        let read = read_directory(store.as_ref(), &hash).unwrap();
        assert_eq!(read.length(), 15);
        let run = read.find_file("run.sh").unwrap();
        assert!(run.flags.contains(FileFlags::EXECUTABLE));
        assert!(run.flags.contains(FileFlags::READ_ONLY));
        assert_eq!(run.data.stream_hash, BlobHash::from_bytes(b"#!/bin/sh\n"));
        assert!(read.find_directory("sub").unwrap().handle.hash().is_some());

        // Same content, same hash.
        let again = write_directory(&mut writer, &read).unwrap();
        assert_eq!(writer.flush_and_resolve(&again).unwrap(), hash);
    }

    #[test]
    fn name_comparison_survives_store_round_trip() {
        let (store, mut writer) = setup();
        let mut sub = DirectoryNode::new().with_comparison(NameComparison::CaseInsensitive);
        sub.add_file(file(&mut writer, "Notes.TXT", b"notes")).unwrap();
        let sub_handle = write_directory(&mut writer, &sub).unwrap();
        let mut root = DirectoryNode::new().with_comparison(NameComparison::CaseInsensitive);
        root.add_directory(DirectoryEntry::new("Docs", sub.length(), sub_handle))
            .unwrap();
        let handle = write_directory(&mut writer, &root).unwrap();
        let hash = writer.flush_and_resolve(&handle).unwrap();

        let mut read =
            read_directory_with(store.as_ref(), &hash, NameComparison::CaseInsensitive).unwrap();
        assert_eq!(read.comparison(), NameComparison::CaseInsensitive);
        assert!(read.find_directory("docs").is_some());
        assert!(read_directory(store.as_ref(), &hash)
            .unwrap()
            .find_directory("docs")
            .is_none());

        // Children read on the way down inherit the policy.
        assert!(read
            .delete_path(store.as_ref(), &mut writer, "DOCS/notes.txt")
            .unwrap());
        assert_eq!(read.length(), 0);

        // The policy is not part of the hash.
        let mut plain_root = DirectoryNode::new();
        plain_root
            .add_directory(DirectoryEntry::new("Docs", sub.length(), sub_handle))
            .unwrap();
        let plain_handle = write_directory(&mut writer, &plain_root).unwrap();
        assert_eq!(writer.flush_and_resolve(&plain_handle).unwrap(), hash);
    }

    #[test]
    fn delete_path_rewrites_parents() {
        let (store, mut writer) = setup();
        let mut deep = DirectoryNode::new();
        deep.add_file(file(&mut writer, "keep.txt", b"keep")).unwrap();
        deep.add_file(file(&mut writer, "drop.txt", b"drop me")).unwrap();
        let deep_handle = write_directory(&mut writer, &deep).unwrap();
        let mut mid = DirectoryNode::new();
        mid.add_directory(DirectoryEntry::new("deep", deep.length(), deep_handle))
            .unwrap();
        let mid_handle = write_directory(&mut writer, &mid).unwrap();
        let mut root = DirectoryNode::new();
        root.add_directory(DirectoryEntry::new("mid", mid.length(), mid_handle))
            .unwrap();
        assert_eq!(root.length(), 11);

        assert!(root
            .delete_path(store.as_ref(), &mut writer, "mid/deep/drop.txt")
            .unwrap());
        assert_eq!(root.length(), 4);
        assert!(!root
            .delete_path(store.as_ref(), &mut writer, "mid/missing/x")
            .unwrap());

        let mid_hash = writer
            .flush_and_resolve(&root.find_directory("mid").unwrap().handle)
            .unwrap();
        let mid = read_directory(store.as_ref(), &mid_hash).unwrap();
        let deep_hash = mid.find_directory("deep").unwrap().handle.hash().unwrap();
        let deep = read_directory(store.as_ref(), &deep_hash).unwrap();
        assert!(deep.find_file("drop.txt").is_none());
        assert!(deep.find_file("keep.txt").is_some());

        assert!(root.delete_path(store.as_ref(), &mut writer, "/mid/").unwrap());
        assert!(root.is_empty());
        assert!(root.delete_path(store.as_ref(), &mut writer, "//").is_err());
    }

    #[test]
    fn rejects_foreign_blob() {
        let store = InMemoryBlobStore::new();
        let hash = store
            .write(cairn_store::BlobData::new(BlobType::RAW, b"x".to_vec(), vec![]))
            .unwrap();
        assert!(matches!(
            read_directory(&store, &hash),
            Err(TreeError::Corrupt { .. })
        ));
    }
}
