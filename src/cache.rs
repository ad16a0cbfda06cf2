//! Process-wide cache of loaded bucket metadata.
//!
//! Concurrent joins over the same datasets share one parsed document per directory.
//! Entries are never refreshed automatically; call [`MetadataCache::invalidate`] after
//! rewriting a dataset.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::metadata::BucketMetadata;

#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: RwLock<HashMap<PathBuf, Arc<BucketMetadata>>>,
}

/// Cache key: the canonical directory path when it exists.
fn cache_key(dir: &Path) -> PathBuf {
    dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached metadata of `dir`, `None` if not loaded yet.
    pub fn get(&self, dir: &Path) -> Option<Arc<BucketMetadata>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&cache_key(dir)).cloned()
    }

    /// Cached metadata of `dir`, loading it on a miss.
    ///
    /// Load errors are returned and nothing is cached.
    pub fn get_or_load(&self, dir: &Path) -> Result<Arc<BucketMetadata>> {
        let key = cache_key(dir);
        if let Some(hit) = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Ok(Arc::clone(hit));
        }

        let loaded = Arc::new(BucketMetadata::load(dir)?);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        // Another thread may have loaded it meanwhile; keep the first entry.
        let entry = entries.entry(key).or_insert(loaded);
        Ok(Arc::clone(entry))
    }

    pub fn insert(&self, dir: &Path, metadata: Arc<BucketMetadata>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(cache_key(dir), metadata);
    }

    /// Drop the entry for `dir`, returning it if present.
    pub fn invalidate(&self, dir: &Path) -> Option<Arc<BucketMetadata>> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&cache_key(dir))
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
