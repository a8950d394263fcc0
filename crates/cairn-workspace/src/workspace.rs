use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cairn_pipeline::PipelineOptions;
use cairn_store::BlobStore;
use cairn_tree::{flatten, read_directory, TreeError};
use cairn_types::{BlobHash, CancellationToken};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::apply::{disk_path, verify_file, Applier};
use crate::error::{WorkspaceError, WorkspaceResult};
use crate::layer::LayerId;
use crate::manifest::{FileStamp, LayerManifest, ManifestFile, ManifestStore};
use crate::plan::{plan_sync, Source, TargetFile};
use crate::types::{
    FileChange, StatusEntry, SyncPhase, SyncReport, VerifyMismatch, VerifyReport, WorkspaceStatus,
};

/// Name of the control directory at the workspace root.
pub const CONTROL_DIR: &str = ".cairn";

/// Tuning for syncs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceOptions {
    pub pipeline: PipelineOptions,
    /// Rehash every downloaded file before moving it into place.
    pub verify_downloads: bool,
}

impl Default for WorkspaceOptions {
    fn default() -> Self {
        Self {
            pipeline: PipelineOptions::default(),
            verify_downloads: true,
        }
    }
}

/// A directory kept in step with one or more content-addressed trees.
///
/// Each layer syncs independently. A path may belong to several layers as
/// long as they agree on its content; it stays on disk until the last
/// owning layer lets go of it.
pub struct Workspace {
    root: PathBuf,
    control: PathBuf,
    store: Arc<dyn BlobStore>,
    options: WorkspaceOptions,
    manifests: ManifestStore,
    phase: Mutex<SyncPhase>,
    sync_lock: tokio::sync::Mutex<()>,
}

impl Workspace {
    /// Open the workspace rooted at `root`, creating the control directory
    /// if needed. Leftovers of interrupted syncs are discarded.
    pub fn open(
        root: impl Into<PathBuf>,
        store: Arc<dyn BlobStore>,
        options: WorkspaceOptions,
    ) -> WorkspaceResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        if !root.is_dir() {
            return Err(WorkspaceError::NotADirectory(root.display().to_string()));
        }
        let control = root.join(CONTROL_DIR);
        for scratch in ["staging", "tmp"] {
            let dir = control.join(scratch);
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
            std::fs::create_dir_all(&dir)?;
        }
        let manifests = ManifestStore::new(control.join("layers"));
        debug!(root = %root.display(), "opened workspace");
        Ok(Self {
            root,
            control,
            store,
            options,
            manifests,
            phase: Mutex::new(SyncPhase::Idle),
            sync_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn control_dir(&self) -> &Path {
        &self.control
    }

    pub fn options(&self) -> &WorkspaceOptions {
        &self.options
    }

    /// Phase of the sync currently running, if any.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock().expect("phase lock poisoned")
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.lock().expect("phase lock poisoned") = phase;
    }

    /// Every layer with a manifest, sorted by id.
    pub fn layers(&self) -> WorkspaceResult<Vec<LayerId>> {
        self.manifests.list()
    }

    /// The tree `layer` was last synced to.
    pub fn layer_tree(&self, layer: &LayerId) -> WorkspaceResult<Option<BlobHash>> {
        Ok(self.layer_manifest(layer)?.tree)
    }

    pub fn layer_manifest(&self, layer: &LayerId) -> WorkspaceResult<LayerManifest> {
        self.manifests
            .load(layer)?
            .ok_or_else(|| WorkspaceError::LayerNotFound(layer.to_string()))
    }

    /// Bring `layer` in line with `target`, or with nothing when `target` is
    /// `None`.
    ///
    /// Per-file problems are reported in [`SyncReport::failures`] and do not
    /// stop the sync. On cancellation the manifest records whatever was
    /// finished and `Cancelled` is returned.
    pub async fn sync(
        &self,
        layer: &LayerId,
        target: Option<BlobHash>,
        cancel: &CancellationToken,
    ) -> WorkspaceResult<SyncReport> {
        self.sync_at(layer, "", target, cancel).await
    }

    /// Like [`sync`](Self::sync), with the tree placed below `base`, a
    /// `/`-separated directory relative to the workspace root.
    pub async fn sync_at(
        &self,
        layer: &LayerId,
        base: &str,
        target: Option<BlobHash>,
        cancel: &CancellationToken,
    ) -> WorkspaceResult<SyncReport> {
        let base = normalize_base(base)?;
        let _guard = self.sync_lock.lock().await;
        let result = self.sync_locked(layer, &base, target, cancel).await;
        self.set_phase(SyncPhase::Idle);
        result
    }

    /// Delete every file only `layer` owns, then forget the layer.
    ///
    /// If some files could not be deleted the manifest stays, so a later
    /// removal retries them.
    pub async fn remove_layer(
        &self,
        layer: &LayerId,
        cancel: &CancellationToken,
    ) -> WorkspaceResult<SyncReport> {
        if self.manifests.load(layer)?.is_none() {
            return Err(WorkspaceError::LayerNotFound(layer.to_string()));
        }
        let report = self.sync(layer, None, cancel).await?;
        if report.is_clean() {
            self.manifests.remove(layer)?;
            info!(%layer, "removed layer");
        }
        Ok(report)
    }

    async fn sync_locked(
        &self,
        layer: &LayerId,
        base: &str,
        target: Option<BlobHash>,
        cancel: &CancellationToken,
    ) -> WorkspaceResult<SyncReport> {
        self.set_phase(SyncPhase::Diffing);
        info!(%layer, base, target = ?target, "sync started");
        cancel.check()?;

        let previous = self.manifests.load(layer)?.unwrap_or_default();
        let mut others = Vec::new();
        for id in self.manifests.list()? {
            if id != *layer {
                if let Some(manifest) = self.manifests.load(&id)? {
                    others.push(manifest);
                }
            }
        }
        let (files, directories) = match target {
            Some(hash) => self.target_files(&hash, base)?,
            None => (BTreeMap::new(), Vec::new()),
        };
        let plan = plan_sync(&files, &previous, &others, |path| {
            FileStamp::read(&disk_path(&self.root, path))
        });
        debug!(
            %layer,
            keep = plan.kept.len(),
            moves = plan.count(|s| matches!(s, Source::Move { .. })),
            copies = plan.count(|s| matches!(s, Source::Copy { .. })),
            downloads = plan.count(|s| matches!(s, Source::Download)),
            deletes = plan.deletes.len(),
            "sync planned"
        );

        self.set_phase(SyncPhase::Applying);
        let mut applier = Applier::new(
            &self.root,
            &self.control,
            self.store.clone(),
            self.options,
            cancel,
        );
        let applied = applier.run(plan, &directories).await;
        let outcome = applier.finish();

        let tree = if applied.is_ok() { target } else { previous.tree };
        self.manifests
            .save(layer, &LayerManifest::new(tree, outcome.files))?;
        applied?;

        let report = SyncReport {
            tree,
            stats: outcome.stats,
            failures: outcome.failures,
        };
        info!(
            %layer,
            kept = report.stats.files_kept,
            moved = report.stats.files_moved,
            copied = report.stats.files_copied,
            downloaded = report.stats.files_downloaded,
            deleted = report.stats.files_deleted,
            failures = report.failures.len(),
            "sync finished"
        );
        Ok(report)
    }

    /// Files and directories of the tree at `hash` placed below `base`,
    /// keyed by path.
    fn target_files(
        &self,
        hash: &BlobHash,
        base: &str,
    ) -> WorkspaceResult<(BTreeMap<String, TargetFile>, Vec<String>)> {
        let root = read_directory(self.store.as_ref(), hash)?;
        let flat = flatten(self.store.as_ref(), &root)?;
        let under = |path: String| {
            if base.is_empty() {
                path
            } else {
                format!("{base}/{path}")
            }
        };
        let mut directories: Vec<String> = base
            .match_indices('/')
            .map(|(i, _)| base[..i].to_string())
            .collect();
        if !base.is_empty() {
            directories.push(base.to_string());
        }
        directories.extend(flat.directories.into_iter().map(under));
        let mut files = BTreeMap::new();
        for file in flat.files {
            let root = file
                .entry
                .data
                .root_hash()
                .ok_or_else(|| TreeError::Unflushed(file.path.clone()))?;
            let record = ManifestFile {
                stream_hash: file.entry.data.stream_hash,
                length: file.entry.data.length,
                flags: file.entry.flags,
                modified: 0,
            };
            files.insert(under(file.path), TargetFile { root, record });
        }
        Ok((files, directories))
    }

    // ----------------------------------------------------------------------
    // Inspection
    // ----------------------------------------------------------------------

    /// Compare the disk against every layer's manifest using file metadata
    /// only. Nothing is read or changed.
    pub async fn status(&self, cancel: &CancellationToken) -> WorkspaceResult<WorkspaceStatus> {
        let _guard = self.sync_lock.lock().await;
        let owned = self.owned_files()?;
        let mut entries = Vec::new();
        for (path, records) in &owned {
            cancel.check()?;
            let change = match FileStamp::read(&disk_path(&self.root, path)) {
                None => FileChange::Missing,
                Some(stamp) if !records.iter().any(|r| r.matches_disk(Some(stamp))) => {
                    FileChange::Modified
                }
                Some(_) => continue,
            };
            entries.push(StatusEntry {
                path: path.clone(),
                change,
            });
        }
        for path in self.untracked(&owned, cancel)? {
            entries.push(StatusEntry {
                path,
                change: FileChange::Untracked,
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(tracked = owned.len(), changes = entries.len(), "workspace status");
        Ok(WorkspaceStatus {
            tracked: owned.len() as u64,
            entries,
        })
    }

    /// Rehash the files of `layer`, or of every layer, and compare them with
    /// their recorded stream hashes.
    pub async fn verify(
        &self,
        layer: Option<&LayerId>,
        cancel: &CancellationToken,
    ) -> WorkspaceResult<VerifyReport> {
        let _guard = self.sync_lock.lock().await;
        let files: BTreeMap<String, ManifestFile> = match layer {
            Some(layer) => self.layer_manifest(layer)?.files,
            None => self
                .owned_files()?
                .into_iter()
                .filter_map(|(path, records)| Some((path, *records.first()?)))
                .collect(),
        };
        let mut report = VerifyReport::default();
        for (path, record) in files {
            cancel.check()?;
            let file = disk_path(&self.root, &path);
            let problem = if FileStamp::read(&file).is_none() {
                Some("missing".to_string())
            } else {
                verify_file(&file, &record).err().map(|e| e.to_string())
            };
            report.files_checked += 1;
            report.bytes_checked += record.length;
            if let Some(message) = problem {
                warn!(path = %path, "verify failed: {message}");
                report.mismatches.push(VerifyMismatch { path, message });
            }
        }
        info!(
            files = report.files_checked,
            mismatches = report.mismatches.len(),
            "workspace verified"
        );
        Ok(report)
    }

    /// Delete every file no layer owns, then any directory that leaves
    /// empty. Returns the deleted paths.
    pub async fn clean(&self, cancel: &CancellationToken) -> WorkspaceResult<Vec<String>> {
        let _guard = self.sync_lock.lock().await;
        let owned = self.owned_files()?;
        let untracked = self.untracked(&owned, cancel)?;
        let mut parents = Vec::new();
        for path in &untracked {
            cancel.check()?;
            let file = disk_path(&self.root, path);
            std::fs::remove_file(&file)?;
            if let Some(parent) = file.parent() {
                parents.push(parent.to_path_buf());
            }
        }
        parents.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in parents {
            let mut current = dir.as_path();
            while current != self.root && current.starts_with(&self.root) {
                if std::fs::remove_dir(current).is_err() {
                    break;
                }
                match current.parent() {
                    Some(parent) => current = parent,
                    None => break,
                }
            }
        }
        info!(removed = untracked.len(), "workspace cleaned");
        Ok(untracked)
    }

    /// Records of every path any layer owns.
    fn owned_files(&self) -> WorkspaceResult<BTreeMap<String, Vec<ManifestFile>>> {
        let mut owned: BTreeMap<String, Vec<ManifestFile>> = BTreeMap::new();
        for id in self.manifests.list()? {
            let Some(manifest) = self.manifests.load(&id)? else {
                continue;
            };
            for (path, record) in manifest.files {
                owned.entry(path).or_default().push(record);
            }
        }
        Ok(owned)
    }

    /// Files on disk outside the control directory that no layer owns.
    fn untracked(
        &self,
        owned: &BTreeMap<String, Vec<ManifestFile>>,
        cancel: &CancellationToken,
    ) -> WorkspaceResult<Vec<String>> {
        let walk = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !(e.depth() == 1 && e.file_name() == CONTROL_DIR));
        let mut untracked = Vec::new();
        for entry in walk {
            cancel.check()?;
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_dir() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let parts: Option<Vec<&str>> =
                relative.components().map(|c| c.as_os_str().to_str()).collect();
            let Some(parts) = parts else {
                warn!("skipping non-UTF-8 path {:?}", entry.path());
                continue;
            };
            let path = parts.join("/");
            if !owned.contains_key(&path) {
                untracked.push(path);
            }
        }
        Ok(untracked)
    }
}

/// Normalize a sync base path to `a/b` form. Empty means the root.
fn normalize_base(base: &str) -> WorkspaceResult<String> {
    let invalid = |reason: &str| WorkspaceError::InvalidPath {
        path: base.to_string(),
        reason: reason.to_string(),
    };
    let trimmed = base.replace('\\', "/");
    let trimmed = trimmed.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    for part in trimmed.split('/') {
        if part.is_empty() || part == "." || part == ".." {
            return Err(invalid("components must be plain names"));
        }
    }
    if trimmed.split('/').next() == Some(CONTROL_DIR) {
        return Err(invalid("path is inside the workspace control directory"));
    }
    Ok(trimmed.to_string())
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("root", &self.root)
            .field("options", &self.options)
            .field("phase", &self.phase())
            .finish()
    }
}
