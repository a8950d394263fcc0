//! Layered workspace synchronization.
//!
//! A workspace is a directory on disk plus a `.cairn` control directory.
//! Named layers each track one directory tree from the blob store; syncing a
//! layer brings the files it owns in line with a new tree while moving as
//! few bytes as possible:
//!
//! 1. files already correct are **kept**,
//! 2. files this layer no longer needs at one path are **moved** to where
//!    the same content is wanted,
//! 3. content already on disk elsewhere is **copied**,
//! 4. anything else is **downloaded** through a [`cairn_pipeline::BlobPipeline`],
//! 5. files nobody owns any more are **deleted**.
//!
//! A file counts as untouched while its length and last-write time match
//! what the manifest recorded when it was placed.
//!
//! # Key Types
//!
//! - [`Workspace`] -- sync, layer removal, status, verify and clean
//! - [`LayerId`] -- validated layer name
//! - [`SyncReport`] -- stats and per-file failures of one sync
//! - [`LayerManifest`] -- what a layer owns, persisted under `.cairn/layers`

mod apply;
pub mod error;
pub mod layer;
pub mod manifest;
mod plan;
pub mod types;
pub mod workspace;

pub use error::{WorkspaceError, WorkspaceResult};
pub use layer::LayerId;
pub use manifest::{FileStamp, LayerManifest, ManifestFile};
pub use types::{
    FileChange, StatusEntry, SyncFailure, SyncOperation, SyncPhase, SyncReport, VerifyMismatch,
    VerifyReport, WorkspaceStatus, WorkspaceSyncStats,
};
pub use workspace::{Workspace, WorkspaceOptions, CONTROL_DIR};
