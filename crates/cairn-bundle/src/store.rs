use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use cairn_store::{BlobData, BlobStore, StoreResult};
use cairn_types::BlobHash;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::BundleCodec;
use crate::error::BundleResult;
use crate::format::{BundleFormat, BundleId, FILE_EXTENSION};
use crate::reader::BundleReader;
use crate::writer::BundleWriter;

/// Settings for a [`FileBundleStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleOptions {
    pub codec: BundleCodec,
    pub format: BundleFormat,
    /// Open bundle readers kept in memory.
    pub cache_capacity: usize,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            codec: BundleCodec::default(),
            format: BundleFormat::default(),
            cache_capacity: 32,
        }
    }
}

/// A [`BlobStore`] over a directory of bundle files.
///
/// Every `write_batch` becomes one bundle. The blob → bundle location map is
/// rebuilt at open by reading each bundle's index; bundles that fail to parse
/// are skipped with a warning.
pub struct FileBundleStore {
    dir: PathBuf,
    options: BundleOptions,
    locations: RwLock<HashMap<BlobHash, BundleId>>,
    cache: Mutex<ReaderCache>,
}

struct ReaderCache {
    capacity: usize,
    readers: HashMap<BundleId, Arc<BundleReader>>,
    order: VecDeque<BundleId>,
}

impl ReaderCache {
    fn get(&mut self, id: &BundleId) -> Option<Arc<BundleReader>> {
        let reader = self.readers.get(id)?.clone();
        self.order.retain(|other| other != id);
        self.order.push_back(*id);
        Some(reader)
    }

    fn insert(&mut self, reader: Arc<BundleReader>) {
        let id = reader.id();
        if self.readers.insert(id, reader).is_none() {
            self.order.push_back(id);
        }
        while self.readers.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.readers.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

impl FileBundleStore {
    /// Open (creating if needed) a bundle directory.
    pub fn open(dir: impl Into<PathBuf>, options: BundleOptions) -> BundleResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let mut locations = HashMap::new();
        let mut bundles = 0usize;

        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name.starts_with(".tmp-bundle-") {
                // Left behind by an interrupted publish; never visible to readers.
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("failed to remove stale temp bundle {:?}: {}", path, e);
                }
                continue;
            }
            if path.extension().map(|e| e == FILE_EXTENSION).unwrap_or(false) {
                match BundleReader::open(&path) {
                    Ok(reader) => {
                        for entry in reader.entries() {
                            locations.insert(entry.hash, reader.id());
                        }
                        bundles += 1;
                    }
                    Err(e) => {
                        warn!("skipping corrupt bundle {:?}: {}", path, e);
                    }
                }
            }
        }
        info!(dir = %dir.display(), bundles, blobs = locations.len(), "opened bundle store");

        Ok(Self {
            cache: Mutex::new(ReaderCache {
                capacity: options.cache_capacity.max(1),
                readers: HashMap::new(),
                order: VecDeque::new(),
            }),
            dir,
            options,
            locations: RwLock::new(locations),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn options(&self) -> &BundleOptions {
        &self.options
    }

    /// Number of blobs indexed across all bundles.
    pub fn blob_count(&self) -> usize {
        self.locations.read().expect("lock poisoned").len()
    }

    /// Bundle holding a blob, if any.
    pub fn bundle_of(&self, hash: &BlobHash) -> Option<BundleId> {
        self.locations.read().expect("lock poisoned").get(hash).copied()
    }

    fn reader(&self, id: &BundleId) -> BundleResult<Arc<BundleReader>> {
        if let Some(reader) = self.cache.lock().expect("lock poisoned").get(id) {
            return Ok(reader);
        }
        let reader = Arc::new(BundleReader::open(&self.dir.join(id.file_name()))?);
        self.cache
            .lock()
            .expect("lock poisoned")
            .insert(reader.clone());
        Ok(reader)
    }
}

impl BlobStore for FileBundleStore {
    fn read(&self, hash: &BlobHash) -> StoreResult<Option<BlobData>> {
        let Some(id) = self.bundle_of(hash) else {
            return Ok(None);
        };
        Ok(self.reader(&id)?.read_blob(hash)?)
    }

    fn exists(&self, hash: &BlobHash) -> StoreResult<bool> {
        Ok(self.bundle_of(hash).is_some())
    }

    fn write_batch(&self, blobs: Vec<(BlobHash, BlobData)>) -> StoreResult<()> {
        let mut writer = BundleWriter::new(self.options.codec, self.options.format);
        {
            let locations = self.locations.read().expect("lock poisoned");
            for (hash, blob) in blobs {
                if !locations.contains_key(&hash) {
                    writer.add(hash, blob);
                }
            }
        }
        if writer.is_empty() {
            return Ok(());
        }
        let bundle = writer.finish()?;
        let path = bundle.publish(&self.dir)?;
        debug!(bundle = %bundle.id, path = %path.display(), "published bundle");

        let mut locations = self.locations.write().expect("lock poisoned");
        for entry in bundle.index.entries() {
            locations.insert(entry.hash, bundle.id);
        }
        drop(locations);
        let reader = BundleReader::from_bytes(bundle.bytes)?;
        self.cache
            .lock()
            .expect("lock poisoned")
            .insert(Arc::new(reader));
        Ok(())
    }
}

impl std::fmt::Debug for FileBundleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBundleStore")
            .field("dir", &self.dir)
            .field("codec", &self.options.codec)
            .field("blob_count", &self.blob_count())
            .finish()
    }
}
