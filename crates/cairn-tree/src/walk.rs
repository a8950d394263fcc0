//! Flattening a directory tree into full paths.

use cairn_store::{BlobHandle, BlobStore};
use cairn_types::BlobHash;

use crate::error::{TreeError, TreeResult};
use crate::node::{read_directory_with, DirectoryNode, FileEntry};

/// A file with its `/`-separated path from the tree root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlatFile {
    pub path: String,
    pub entry: FileEntry,
}

/// Every file and directory below a root, depth-first in name order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlatTree {
    pub files: Vec<FlatFile>,
    pub directories: Vec<String>,
}

/// Walk `root` and every directory below it.
///
/// Subdirectory handles must already be flushed.
pub fn flatten(store: &dyn BlobStore, root: &DirectoryNode) -> TreeResult<FlatTree> {
    let mut out = FlatTree::default();
    visit(store, root, "", &mut out)?;
    Ok(out)
}

/// Hash behind a handle that must already have been flushed.
pub(crate) fn flushed(handle: &BlobHandle, name: &str) -> TreeResult<BlobHash> {
    handle
        .hash()
        .ok_or_else(|| TreeError::Unflushed(name.to_string()))
}

pub(crate) fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

fn visit(
    store: &dyn BlobStore,
    node: &DirectoryNode,
    prefix: &str,
    out: &mut FlatTree,
) -> TreeResult<()> {
    for file in node.files() {
        out.files.push(FlatFile {
            path: join(prefix, &file.name),
            entry: file.clone(),
        });
    }
    for dir in node.directories() {
        let path = join(prefix, &dir.name);
        let child = read_directory_with(store, &flushed(&dir.handle, &path)?, node.comparison())?;
        out.directories.push(path.clone());
        visit(store, &child, &path, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cairn_chunk::{write_chunked_data, ChunkingOptions};
    use cairn_store::{BlobWriter, InMemoryBlobStore};
    use cairn_types::CancellationToken;

    use super::*;
    use crate::node::read_directory;
    use crate::node::{write_directory, DirectoryEntry, FileFlags};

    #[test]
    fn flattens_nested_directories() {
        let store = Arc::new(InMemoryBlobStore::new());
        let mut writer = BlobWriter::new(store.clone());
        let add = |node: &mut DirectoryNode, writer: &mut BlobWriter, name: &str| {
            let data = write_chunked_data(
                writer,
                name.as_bytes(),
                ChunkingOptions::default(),
                &CancellationToken::none(),
            )
            .unwrap();
            node.add_file(FileEntry::new(name, FileFlags::NONE, data)).unwrap();
        };

        let mut b = DirectoryNode::new();
        add(&mut b, &mut writer, "c.txt");
        let b_handle = write_directory(&mut writer, &b).unwrap();
        let mut root = DirectoryNode::new();
        add(&mut root, &mut writer, "a.txt");
        root.add_directory(DirectoryEntry::new("b", b.length(), b_handle))
            .unwrap();
        root.add_directory(DirectoryEntry::new(
            "empty",
            0,
            write_directory(&mut writer, &DirectoryNode::new()).unwrap(),
        ))
        .unwrap();

        assert!(matches!(
            flatten(store.as_ref(), &root),
            Err(TreeError::Unflushed(_))
        ));

        writer.flush().unwrap();
        let root_ref = write_directory(&mut writer, &root).unwrap();
        let root_hash = writer.flush_and_resolve(&root_ref).unwrap();
        let root = read_directory(store.as_ref(), &root_hash).unwrap();
        let flat = flatten(store.as_ref(), &root).unwrap();
        let paths: Vec<_> = flat.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["a.txt", "b/c.txt"]);
        assert_eq!(flat.directories, ["b", "empty"]);
        assert!(flat.files.iter().all(|f| f.entry.data.root_hash().is_some()));
    }
}
