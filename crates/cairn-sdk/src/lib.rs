//! High-level SDK for Cairn.
//!
//! Wires the storage crates together behind one configuration file and one
//! facade. This is the main entry point for applications embedding Cairn.
//!
//! # Key Types
//!
//! - [`CairnConfig`] -- TOML configuration, every section optional
//! - [`Storage`] -- bundle store, refs and workspaces under one root

pub mod config;
pub mod error;
pub mod storage;

pub use config::{
    CairnConfig, LogFormat, LoggingConfig, StorageConfig, TreeConfig, WorkspaceConfig,
};
pub use error::{SdkError, SdkResult};
pub use storage::Storage;

// Re-export key types
pub use cairn_bundle::BundleCodec;
pub use cairn_chunk::{Chunk, ChunkedData, ChunkingOptions};
pub use cairn_refs::RefName;
pub use cairn_tree::{DirectoryNode, ExtractStats, NameComparison};
pub use cairn_types::{BlobHash, CancellationToken};
pub use cairn_workspace::{LayerId, SyncReport, Workspace, WorkspaceSyncStats};
