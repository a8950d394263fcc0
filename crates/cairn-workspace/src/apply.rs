//! Carrying out a [`SyncPlan`] on disk.
//!
//! Moves go first and are staged through the control directory, so chains
//! and swaps of renames never overwrite a file that is still needed. Then
//! downloads, then copies (which may read freshly downloaded files), then
//! deletes. Problems with one file are recorded and the rest carry on.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cairn_chunk::{ChunkError, ChunkedDataNode, ChunkedDataReader};
use cairn_crypto::StreamHasher;
use cairn_pipeline::{BlobPipeline, BlobResponse, PipelineResult};
use cairn_store::{BlobData, BlobStore};
use cairn_tree::apply_flags;
use cairn_types::{BlobHash, CancellationToken};
use tracing::{debug, warn};

use crate::error::{WorkspaceError, WorkspaceResult};
use crate::manifest::{FileStamp, ManifestFile};
use crate::plan::{Placement, Source, SyncPlan};
use crate::types::{SyncFailure, SyncOperation, WorkspaceSyncStats};
use crate::workspace::WorkspaceOptions;

/// Map a `/`-separated workspace path below `root`.
pub(crate) fn disk_path(root: &Path, path: &str) -> PathBuf {
    path.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
}

/// One node read on behalf of a download.
#[derive(Clone, Copy, Debug)]
struct NodeRequest {
    job: usize,
    offset: u64,
    length: u64,
}

struct Download {
    placement: Placement,
    part: PathBuf,
    /// Nodes requested and not yet answered.
    outstanding: usize,
    error: Option<String>,
}

pub(crate) struct Applier<'a> {
    root: &'a Path,
    staging: PathBuf,
    tmp: PathBuf,
    store: Arc<dyn BlobStore>,
    options: WorkspaceOptions,
    cancel: &'a CancellationToken,
    /// Files the layer owns once the sync is done.
    owned: BTreeMap<String, ManifestFile>,
    deletes: BTreeMap<String, ManifestFile>,
    /// Old files at placement paths, still on disk until replaced.
    replaced: BTreeMap<String, ManifestFile>,
    /// Placement paths that were not materialized.
    missing: HashSet<String>,
    /// Directories that may have been emptied.
    touched: BTreeSet<PathBuf>,
    stats: WorkspaceSyncStats,
    failures: Vec<SyncFailure>,
}

/// Files a layer owns after an apply, with the counters and failures.
pub(crate) struct ApplyOutcome {
    pub files: BTreeMap<String, ManifestFile>,
    pub stats: WorkspaceSyncStats,
    pub failures: Vec<SyncFailure>,
}

impl<'a> Applier<'a> {
    pub(crate) fn new(
        root: &'a Path,
        control: &Path,
        store: Arc<dyn BlobStore>,
        options: WorkspaceOptions,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            root,
            staging: control.join("staging"),
            tmp: control.join("tmp"),
            store,
            options,
            cancel,
            owned: BTreeMap::new(),
            deletes: BTreeMap::new(),
            replaced: BTreeMap::new(),
            missing: HashSet::new(),
            touched: BTreeSet::new(),
            stats: WorkspaceSyncStats::default(),
            failures: Vec::new(),
        }
    }

    /// Apply `plan`, leaving the directories in `keep_dirs` in place even
    /// when empty.
    ///
    /// On error the applier still describes what is on disk; call
    /// [`finish`](Self::finish) either way.
    pub(crate) async fn run(
        &mut self,
        plan: SyncPlan,
        keep_dirs: &[String],
    ) -> WorkspaceResult<()> {
        self.stats.files_kept = plan.kept.len() as u64;
        self.owned = plan.kept;
        self.deletes = plan.deletes;
        self.failures = plan.failures;

        let mut moves = Vec::new();
        let mut downloads = Vec::new();
        let mut copies = Vec::new();
        for placement in plan.placements {
            if let Some(old) = placement.replaces {
                self.replaced.insert(placement.path.clone(), old);
            }
            match placement.source.clone() {
                Source::Move { from, record } => moves.push((placement, from, record)),
                Source::Copy { from } => copies.push((placement, from)),
                Source::Download => downloads.push(placement),
            }
        }

        self.apply_moves(moves)?;
        self.apply_downloads(downloads).await?;
        self.apply_copies(copies)?;
        self.apply_deletes()?;
        for dir in keep_dirs {
            if let Err(e) = fs::create_dir_all(disk_path(self.root, dir)) {
                warn!("could not create directory {dir}: {e}");
            }
        }
        self.prune(keep_dirs);
        Ok(())
    }

    pub(crate) fn finish(self) -> ApplyOutcome {
        let mut files = self.deletes;
        files.extend(self.replaced);
        files.extend(self.owned);
        ApplyOutcome {
            files,
            stats: self.stats,
            failures: self.failures,
        }
    }

    fn fail(&mut self, path: &str, operation: SyncOperation, message: impl ToString) {
        let failure = SyncFailure::new(path, operation, message);
        warn!("sync failure: {failure}");
        self.missing.insert(path.to_string());
        self.failures.push(failure);
    }

    /// Record a file that is now in place, with the mtime it landed with.
    fn placed(&mut self, placement: &Placement) {
        self.replaced.remove(&placement.path);
        let mut record = placement.target.record;
        record.modified = FileStamp::read(&disk_path(self.root, &placement.path))
            .map_or(0, |stamp| stamp.modified);
        self.owned.insert(placement.path.clone(), record);
    }

    // ----------------------------------------------------------------------
    // Placement
    // ----------------------------------------------------------------------

    /// Rename `source` to the placement's path, clearing anything this layer
    /// is deleting that is in the way.
    fn place(&mut self, source: &Path, placement: &Placement) -> WorkspaceResult<()> {
        let dst = disk_path(self.root, &placement.path);
        self.evict_around(&placement.path)?;
        if dst.is_dir() {
            remove_empty_dirs(&dst)?;
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        apply_flags(source, placement.target.record.flags)?;
        fs::rename(source, &dst)?;
        Ok(())
    }

    /// Delete scheduled files that are ancestors or descendants of `path`.
    fn evict_around(&mut self, path: &str) -> WorkspaceResult<()> {
        let mut blocking: Vec<String> = path
            .match_indices('/')
            .map(|(i, _)| &path[..i])
            .filter(|prefix| self.deletes.contains_key(*prefix))
            .map(str::to_string)
            .collect();
        let below = format!("{path}/");
        blocking.extend(
            self.deletes
                .range(below.clone()..)
                .take_while(|(p, _)| p.starts_with(&below))
                .map(|(p, _)| p.clone()),
        );
        for victim in blocking {
            self.delete_file(&victim)?;
        }
        Ok(())
    }

    fn delete_file(&mut self, path: &str) -> WorkspaceResult<()> {
        let file = disk_path(self.root, path);
        match fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(parent) = file.parent() {
            self.touched.insert(parent.to_path_buf());
        }
        self.deletes.remove(path);
        self.stats.files_deleted += 1;
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Moves
    // ----------------------------------------------------------------------

    fn apply_moves(
        &mut self,
        moves: Vec<(Placement, String, ManifestFile)>,
    ) -> WorkspaceResult<()> {
        if moves.is_empty() {
            return Ok(());
        }
        self.cancel.check()?;
        let mut staged = Vec::with_capacity(moves.len());
        for (i, (placement, from, record)) in moves.into_iter().enumerate() {
            let stage = self.staging.join(i.to_string());
            let source = disk_path(self.root, &from);
            match fs::rename(&source, &stage) {
                Ok(()) => {
                    if let Some(parent) = source.parent() {
                        self.touched.insert(parent.to_path_buf());
                    }
                    staged.push((placement, stage));
                }
                Err(e) => {
                    // The source stays where it was and is deleted normally.
                    self.deletes.insert(from, record);
                    self.fail(&placement.path, SyncOperation::Move, e);
                }
            }
        }
        for (placement, stage) in staged {
            match self.place(&stage, &placement) {
                Ok(()) => {
                    self.stats.files_moved += 1;
                    self.stats.bytes_reused += placement.target.record.length;
                    self.placed(&placement);
                }
                Err(e) => {
                    let _ = fs::remove_file(&stage);
                    self.fail(&placement.path, SyncOperation::Move, e);
                }
            }
        }
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Downloads
    // ----------------------------------------------------------------------

    async fn apply_downloads(&mut self, downloads: Vec<Placement>) -> WorkspaceResult<()> {
        if downloads.is_empty() {
            return Ok(());
        }
        let mut pipeline: BlobPipeline<NodeRequest> =
            BlobPipeline::new(self.store.clone(), self.options.pipeline, self.cancel.clone())?;
        let mut jobs = Vec::with_capacity(downloads.len());
        let mut queue = VecDeque::new();
        for (i, placement) in downloads.into_iter().enumerate() {
            let part = self.tmp.join(format!("{i}.part"));
            let length = placement.target.record.length;
            let mut job = Download {
                placement,
                part,
                outstanding: 0,
                error: None,
            };
            match create_part(&job.part, length) {
                Ok(()) => {
                    job.outstanding = 1;
                    queue.push_back((
                        job.placement.target.root,
                        NodeRequest {
                            job: i,
                            offset: 0,
                            length,
                        },
                    ));
                }
                Err(e) => job.error = Some(e.to_string()),
            }
            jobs.push(job);
        }
        for job in jobs.iter_mut().filter(|job| job.outstanding == 0) {
            self.finish_download(job);
        }

        loop {
            while let Some((hash, request)) = queue.pop_front() {
                pipeline.submit(hash, request).await?;
                while let Some(response) = pipeline.try_next() {
                    self.on_node(&mut jobs, response, &mut queue);
                }
            }
            if pipeline.in_flight() == 0 {
                break;
            }
            match pipeline.next().await {
                Some(response) => self.on_node(&mut jobs, response, &mut queue),
                None => break,
            }
        }
        pipeline.finish_submitting();

        for job in &jobs {
            if job.outstanding > 0 {
                let _ = fs::remove_file(&job.part);
            }
        }
        self.cancel.check()?;
        Ok(())
    }

    fn on_node(
        &mut self,
        jobs: &mut [Download],
        response: BlobResponse<NodeRequest>,
        queue: &mut VecDeque<(BlobHash, NodeRequest)>,
    ) {
        let request = response.payload;
        let job = &mut jobs[request.job];
        job.outstanding -= 1;
        if job.error.is_none() {
            match self.handle_node(job, response.hash, request, response.result, queue) {
                Ok(()) => {}
                Err(e) => job.error = Some(e.to_string()),
            }
        }
        if job.outstanding == 0 {
            self.finish_download(job);
        }
    }

    fn handle_node(
        &self,
        job: &mut Download,
        hash: BlobHash,
        request: NodeRequest,
        result: PipelineResult<BlobData>,
        queue: &mut VecDeque<(BlobHash, NodeRequest)>,
    ) -> WorkspaceResult<()> {
        let blob = result?;
        let node = ChunkedDataNode::decode(&hash, &blob)?;
        if node.length() != request.length {
            return Err(WorkspaceError::Chunk(ChunkError::Corrupt {
                hash,
                reason: format!(
                    "node holds {} bytes, parent expects {}",
                    node.length(),
                    request.length
                ),
            }));
        }
        match node {
            ChunkedDataNode::Leaf(leaf) => {
                let mut file = OpenOptions::new().write(true).open(&job.part)?;
                file.seek(SeekFrom::Start(request.offset))?;
                file.write_all(&leaf.data)?;
            }
            ChunkedDataNode::Interior(interior) => {
                let lengths = ChunkedDataReader::new(self.store.as_ref()).child_lengths(&interior)?;
                let mut offset = request.offset;
                for (child, length) in interior.children.iter().zip(lengths) {
                    queue.push_back((
                        *child,
                        NodeRequest {
                            job: request.job,
                            offset,
                            length,
                        },
                    ));
                    job.outstanding += 1;
                    offset += length;
                }
            }
        }
        Ok(())
    }

    fn finish_download(&mut self, job: &mut Download) {
        let path = job.placement.path.clone();
        if let Some(error) = job.error.take() {
            let _ = fs::remove_file(&job.part);
            if !self.cancel.is_cancelled() {
                self.fail(&path, SyncOperation::Download, error);
            }
            return;
        }
        let record = job.placement.target.record;
        if self.options.verify_downloads {
            if let Err(e) = verify_file(&job.part, &record) {
                let _ = fs::remove_file(&job.part);
                self.fail(&path, SyncOperation::Download, e);
                return;
            }
        }
        match self.place(&job.part, &job.placement) {
            Ok(()) => {
                self.stats.files_downloaded += 1;
                self.stats.bytes_downloaded += record.length;
                self.placed(&job.placement);
                debug!(path = %path, bytes = record.length, "downloaded");
            }
            Err(e) => {
                let _ = fs::remove_file(&job.part);
                self.fail(&path, SyncOperation::Download, e);
            }
        }
    }

    // ----------------------------------------------------------------------
    // Copies and deletes
    // ----------------------------------------------------------------------

    fn apply_copies(&mut self, copies: Vec<(Placement, String)>) -> WorkspaceResult<()> {
        for (i, (placement, from)) in copies.into_iter().enumerate() {
            self.cancel.check()?;
            if self.missing.contains(&from) {
                self.fail(
                    &placement.path,
                    SyncOperation::Copy,
                    format!("source {from} was not materialized"),
                );
                continue;
            }
            let tmp = self.tmp.join(format!("copy-{i}"));
            let copied = fs::copy(disk_path(self.root, &from), &tmp)
                .map_err(WorkspaceError::from)
                .and_then(|len| {
                    if len == placement.target.record.length {
                        Ok(())
                    } else {
                        Err(WorkspaceError::Io(std::io::Error::other(format!(
                            "source {from} has {len} bytes, expected {}",
                            placement.target.record.length
                        ))))
                    }
                })
                .and_then(|()| self.place(&tmp, &placement));
            match copied {
                Ok(()) => {
                    self.stats.files_copied += 1;
                    self.stats.bytes_reused += placement.target.record.length;
                    self.placed(&placement);
                }
                Err(e) => {
                    let _ = fs::remove_file(&tmp);
                    self.fail(&placement.path, SyncOperation::Copy, e);
                }
            }
        }
        Ok(())
    }

    fn apply_deletes(&mut self) -> WorkspaceResult<()> {
        let paths: Vec<String> = self.deletes.keys().cloned().collect();
        for path in paths {
            self.cancel.check()?;
            if let Err(e) = self.delete_file(&path) {
                let failure = SyncFailure::new(path.as_str(), SyncOperation::Delete, e);
                warn!("sync failure: {failure}");
                self.failures.push(failure);
            }
        }
        Ok(())
    }

    /// Remove directories emptied by this sync, walking up towards the root.
    fn prune(&mut self, keep_dirs: &[String]) {
        let keep: HashSet<PathBuf> = keep_dirs
            .iter()
            .map(|d| disk_path(self.root, d))
            .collect();
        let mut dirs: Vec<PathBuf> = std::mem::take(&mut self.touched).into_iter().collect();
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs {
            let mut current = dir.as_path();
            while current != self.root && current.starts_with(self.root) && !keep.contains(current) {
                if fs::remove_dir(current).is_err() {
                    break;
                }
                match current.parent() {
                    Some(parent) => current = parent,
                    None => break,
                }
            }
        }
    }
}

fn create_part(part: &Path, length: u64) -> std::io::Result<()> {
    let file = fs::File::create(part)?;
    file.set_len(length)
}

/// Remove `dir` if it holds nothing but empty directories.
fn remove_empty_dirs(dir: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            remove_empty_dirs(&entry.path())?;
        }
    }
    fs::remove_dir(dir)
}

pub(crate) fn verify_file(path: &Path, expected: &ManifestFile) -> WorkspaceResult<()> {
    let mut file = fs::File::open(path)?;
    let mut hasher = StreamHasher::new();
    let mut buf = vec![0u8; 1 << 20];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let actual = hasher.finalize();
    if actual != expected.stream_hash || hasher.length() != expected.length {
        return Err(WorkspaceError::Chunk(ChunkError::VerifyFailed {
            expected: expected.stream_hash,
            expected_len: expected.length,
            actual,
            actual_len: hasher.length(),
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use cairn_store::InMemoryBlobStore;
    use cairn_tree::FileFlags;

    use super::*;
    use crate::plan::TargetFile;

    fn record(content: &[u8], flags: FileFlags, modified: u64) -> ManifestFile {
        ManifestFile {
            stream_hash: BlobHash::from_bytes(content),
            length: content.len() as u64,
            flags,
            modified,
        }
    }

    #[test]
    fn unstaged_move_source_keeps_its_own_record() {
        let root = tempfile::tempdir().unwrap();
        // No staging directory, so the rename into it fails.
        let control = root.path().join(".cairn");
        std::fs::write(root.path().join("old"), b"payload").unwrap();
        let source = record(b"payload", FileFlags::EXECUTABLE, 11);
        let placement = Placement {
            path: "new".into(),
            target: TargetFile {
                root: BlobHash::from_bytes(b"root"),
                record: record(b"payload", FileFlags::NONE, 0),
            },
            source: Source::Move {
                from: "old".into(),
                record: source,
            },
            replaces: None,
        };
        let cancel = CancellationToken::none();
        let mut applier = Applier::new(
            root.path(),
            &control,
            Arc::new(InMemoryBlobStore::new()),
            WorkspaceOptions::default(),
            &cancel,
        );

        applier
            .apply_moves(vec![(placement, "old".into(), source)])
            .unwrap();
        assert_eq!(applier.deletes.get("old"), Some(&source));
        assert!(applier.missing.contains("new"));
        assert_eq!(applier.failures.len(), 1);
        assert_eq!(applier.failures[0].operation, SyncOperation::Move);
        assert!(root.path().join("old").exists());
    }

    #[test]
    fn placed_file_records_its_mtime() {
        let root = tempfile::tempdir().unwrap();
        let control = root.path().join(".cairn");
        let cancel = CancellationToken::none();
        let mut applier = Applier::new(
            root.path(),
            &control,
            Arc::new(InMemoryBlobStore::new()),
            WorkspaceOptions::default(),
            &cancel,
        );
        std::fs::write(root.path().join("f"), b"data").unwrap();
        let placement = Placement {
            path: "f".into(),
            target: TargetFile {
                root: BlobHash::from_bytes(b"root"),
                record: record(b"data", FileFlags::NONE, 0),
            },
            source: Source::Download,
            replaces: None,
        };

        applier.placed(&placement);
        let stamp = FileStamp::read(&root.path().join("f")).unwrap();
        assert_eq!(applier.owned["f"].modified, stamp.modified);
        assert!(applier.owned["f"].matches_disk(Some(stamp)));
    }
}
