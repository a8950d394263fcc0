//! Deciding what a sync has to do.
//!
//! Planning is pure: it sees the target files, the layer's previous
//! manifest, the manifests of every other layer and a lookup for the
//! [`FileStamp`] of whatever is on disk at a path. A recorded file counts as
//! untouched only while both its length and last-write time still match.
//! Nothing is touched until the plan is applied.

use std::collections::{BTreeMap, HashMap};

use cairn_types::BlobHash;

use crate::manifest::{FileStamp, LayerManifest, ManifestFile};
use crate::types::{SyncFailure, SyncOperation};
use crate::workspace::CONTROL_DIR;

/// A file of the target tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TargetFile {
    /// Root of the file's chunked data.
    pub root: BlobHash,
    pub record: ManifestFile,
}

/// Where a placed file's bytes come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Source {
    /// Rename a file this layer no longer needs at its old path. `record`
    /// is that file's own manifest entry.
    Move { from: String, record: ManifestFile },
    /// Copy a file that stays on disk after the sync.
    Copy { from: String },
    Download,
}

/// A file that has to be written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Placement {
    pub path: String,
    pub target: TargetFile,
    pub source: Source,
    /// This layer's previous file at the same path, on disk until replaced.
    pub replaces: Option<ManifestFile>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct SyncPlan {
    /// Files already in place, including those adopted from other layers.
    pub kept: BTreeMap<String, ManifestFile>,
    pub placements: Vec<Placement>,
    /// Files owned only by this layer that the target no longer has.
    pub deletes: BTreeMap<String, ManifestFile>,
    pub failures: Vec<SyncFailure>,
}

impl SyncPlan {
    pub(crate) fn count(&self, kind: fn(&Source) -> bool) -> usize {
        self.placements.iter().filter(|p| kind(&p.source)).count()
    }
}

type ContentKey = (BlobHash, u64);

fn key(file: &ManifestFile) -> ContentKey {
    (file.stream_hash, file.length)
}

fn in_control_dir(path: &str) -> bool {
    path == CONTROL_DIR || path.starts_with(&format!("{CONTROL_DIR}/"))
}

pub(crate) fn plan_sync(
    target: &BTreeMap<String, TargetFile>,
    previous: &LayerManifest,
    others: &[LayerManifest],
    on_disk: impl Fn(&str) -> Option<FileStamp>,
) -> SyncPlan {
    let foreign: BTreeMap<&str, &ManifestFile> = others
        .iter()
        .flat_map(|m| m.files.iter())
        .map(|(path, file)| (path.as_str(), file))
        .collect();

    let mut plan = SyncPlan::default();
    let mut needed: Vec<(&String, &TargetFile)> = Vec::new();
    for (path, file) in target {
        if in_control_dir(path) {
            plan.failures.push(SyncFailure::new(
                path.as_str(),
                SyncOperation::Conflict,
                "path is inside the workspace control directory",
            ));
            continue;
        }
        let unchanged = previous
            .files
            .get(path)
            .filter(|prev| prev.same_content(&file.record))
            .filter(|prev| prev.matches_disk(on_disk(path.as_str())));
        if let Some(prev) = unchanged {
            plan.kept.insert(
                path.clone(),
                ManifestFile {
                    modified: prev.modified,
                    ..file.record
                },
            );
            continue;
        }
        match foreign.get(path.as_str()) {
            Some(other) if other.same_content(&file.record) => {
                plan.kept.insert(
                    path.clone(),
                    ManifestFile {
                        modified: other.modified,
                        ..file.record
                    },
                );
            }
            Some(other) => plan.failures.push(SyncFailure::new(
                path.as_str(),
                SyncOperation::Conflict,
                format!(
                    "another layer owns this path with content {}",
                    other.stream_hash.short_hex()
                ),
            )),
            None => needed.push((path, file)),
        }
    }

    // Files this layer leaves behind. Paths shared with another layer only
    // lose this layer's ownership.
    let mut candidates: BTreeMap<String, ManifestFile> = previous
        .files
        .iter()
        .filter(|(path, _)| !plan.kept.contains_key(*path))
        .filter(|(path, _)| !foreign.contains_key(path.as_str()))
        .map(|(path, file)| (path.clone(), *file))
        .collect();

    let mut movable: HashMap<ContentKey, Vec<String>> = HashMap::new();
    for (path, file) in &candidates {
        if file.matches_disk(on_disk(path.as_str())) {
            movable.entry(key(file)).or_default().push(path.clone());
        }
    }

    let mut survivors: HashMap<ContentKey, String> = HashMap::new();
    for (path, file) in &plan.kept {
        survivors.entry(key(file)).or_insert_with(|| path.clone());
    }
    for (path, file) in &foreign {
        if file.matches_disk(on_disk(*path)) {
            survivors
                .entry(key(file))
                .or_insert_with(|| path.to_string());
        }
    }

    let mut sources: Vec<Option<Source>> = needed
        .iter()
        .map(|(path, file)| {
            let from = movable.get_mut(&key(&file.record))?.pop()?;
            let record = candidates.remove(&from)?;
            survivors
                .entry(key(&file.record))
                .or_insert_with(|| (*path).clone());
            Some(Source::Move { from, record })
        })
        .collect();
    for ((path, file), source) in needed.iter().zip(sources.iter_mut()) {
        if source.is_some() {
            continue;
        }
        *source = Some(match survivors.get(&key(&file.record)) {
            Some(from) => Source::Copy { from: from.clone() },
            None => {
                survivors.insert(key(&file.record), (*path).clone());
                Source::Download
            }
        });
    }

    for ((path, file), source) in needed.into_iter().zip(sources) {
        plan.placements.push(Placement {
            path: path.clone(),
            target: *file,
            source: source.unwrap_or(Source::Download),
            replaces: candidates.remove(path),
        });
    }
    plan.deletes = candidates;
    plan
}
