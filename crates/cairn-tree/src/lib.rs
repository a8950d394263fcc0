//! Content-addressed directory trees for Cairn.
//!
//! A [`DirectoryNode`] lists the files and subdirectories of one directory.
//! Files point at chunked data, subdirectories at further directory nodes,
//! so a whole snapshot is a Merkle DAG whose root hash depends only on names,
//! flags and content. Unchanged subtrees share storage across snapshots.
//!
//! # Key Types
//!
//! - [`DirectoryNode`] -- one directory, entries kept in byte order of name
//! - [`FileEntry`] / [`DirectoryEntry`] -- the two kinds of entry
//! - [`NameComparison`] -- case policy for lookups, replacement and removal
//!
//! # Filesystem
//!
//! - [`build_from_path`] snapshots a directory on disk
//! - [`extract_to_path`] materializes a snapshot
//! - [`write_archive`] exports a deterministic zip

pub mod archive;
pub mod error;
pub mod fs;
pub mod name;
pub mod node;
pub mod walk;

pub use archive::write_archive;
pub use error::{TreeError, TreeResult};
pub use fs::{
    apply_flags, build_from_path, extract_file, extract_to_path, file_flags, snapshot_path,
    BuildOptions, ExtractStats,
};
pub use name::{validate_entry_name, NameComparison};
pub use node::{
    read_directory, read_directory_with, write_directory, DirectoryEntry, DirectoryNode,
    FileEntry, FileFlags, DIRECTORY_TYPE,
};
pub use walk::{flatten, FlatFile, FlatTree};
