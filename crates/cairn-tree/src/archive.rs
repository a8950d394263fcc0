//! Deterministic zip export.
//!
//! Entries are written in sorted path order with a fixed timestamp and
//! permissions derived only from file flags, so the same tree always
//! produces the same archive bytes.

use std::io::{Seek, Write};

use cairn_chunk::ChunkedDataReader;
use cairn_store::BlobStore;
use cairn_types::CancellationToken;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::TreeResult;
use crate::node::{DirectoryNode, FileFlags};
use crate::walk::{flatten, flushed};

enum Item<'a> {
    Directory(String),
    File(&'a crate::walk::FlatFile),
}

impl Item<'_> {
    fn sort_key(&self) -> &str {
        match self {
            Self::Directory(path) => path,
            Self::File(file) => &file.path,
        }
    }
}

fn entry_options(mode: u32) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(mode)
}

/// Write `node` and everything below it to `sink` as a zip archive.
pub fn write_archive<W: Write + Seek>(
    store: &dyn BlobStore,
    node: &DirectoryNode,
    sink: W,
) -> TreeResult<W> {
    let tree = flatten(store, node)?;
    let mut items: Vec<Item<'_>> = tree
        .directories
        .iter()
        .map(|d| Item::Directory(format!("{d}/")))
        .chain(tree.files.iter().map(Item::File))
        .collect();
    items.sort_by(|a, b| a.sort_key().cmp(b.sort_key()));

    let reader = ChunkedDataReader::new(store);
    let none = CancellationToken::none();
    let mut zip = ZipWriter::new(sink);
    for item in &items {
        match item {
            Item::Directory(path) => {
                zip.add_directory(path.as_str(), entry_options(0o755))?;
            }
            Item::File(file) => {
                let flags = file.entry.flags;
                let mut mode = if flags.contains(FileFlags::EXECUTABLE) {
                    0o755
                } else {
                    0o644
                };
                if flags.contains(FileFlags::READ_ONLY) {
                    mode &= !0o222;
                }
                zip.start_file(file.path.as_str(), entry_options(mode))?;
                let root = flushed(&file.entry.data.root, &file.path)?;
                reader.copy_to(&root, &mut zip, &none)?;
            }
        }
    }
    debug!(entries = items.len(), "wrote archive");
    Ok(zip.finish()?)
}
