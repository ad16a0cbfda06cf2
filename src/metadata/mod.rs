//! Bucket metadata: the partitioning contract of a bucketed dataset.
//!
//! A bucketed dataset directory looks like:
//!
//! ```text
//! users/
//! ├── metadata.toml                                     # BucketMetadata
//! ├── bucket-00000-of-00004-shard-00000-of-00002.parquet
//! ├── bucket-00000-of-00004-shard-00001-of-00002.parquet
//! └── ...
//! ```
//!
//! The metadata document is written last and is the only source of truth read back
//! at join time.

mod coder;
mod hash;
mod keys;

pub use coder::{
    probe_deterministic, BytesCoder, BytesRecordCoder, CoderDescriptor, I64Coder, KeyCoder,
    RecordCoder, StringCoder, U64Coder, Utf8RecordCoder,
};
pub use hash::{murmur3_32, HashType};
pub use keys::{KeyDescriptor, KeyStrategy, SortKey};

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::constants::{
    BUCKET_FILE_SUFFIX, CURRENT_VERSION, MAX_BUCKETS, MAX_SHARDS, MIN_MIGRATABLE_VERSION,
};
use crate::error::{BucketJoinError, Result};

/// Standard file names within a bucketed dataset directory.
pub mod files {
    pub const METADATA: &str = "metadata.toml";
    pub(crate) const METADATA_TMP: &str = ".metadata.toml.tmp";
}

/// Partitioning scheme of one bucketed dataset.
///
/// Stored as TOML for human readability and easy inspection. Structural equality
/// (`PartialEq`) compares every field; join compatibility uses
/// [`BucketMetadata::compatibility_key`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketMetadata {
    version: u32,
    num_buckets: u32,
    num_shards: u32,
    hash_type: HashType,
    filename_prefix: String,
    key: KeyDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secondary_key: Option<KeyDescriptor>,
}

/// The subset of metadata that decides whether two datasets can be joined.
///
/// Shard count and filename prefix are write-time details and are excluded. Bucket
/// counts are compared separately by the power-of-two ratio rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompatibilityKey {
    pub hash_type: HashType,
    pub key_type: String,
    pub secondary_key_type: Option<String>,
}

/// Identifies one bucket file of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketShardId {
    pub bucket_id: u32,
    pub shard_id: u32,
}

impl BucketShardId {
    pub fn new(bucket_id: u32, shard_id: u32) -> Self {
        Self {
            bucket_id,
            shard_id,
        }
    }
}

impl BucketMetadata {
    /// Create metadata at the current version.
    pub fn try_new(
        num_buckets: u32,
        num_shards: u32,
        hash_type: HashType,
        filename_prefix: impl Into<String>,
        key: KeyDescriptor,
        secondary_key: Option<KeyDescriptor>,
    ) -> Result<Self> {
        let metadata = Self {
            version: CURRENT_VERSION,
            num_buckets,
            num_shards,
            hash_type,
            filename_prefix: filename_prefix.into(),
            key,
            secondary_key,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    /// Check every construction invariant.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_MIGRATABLE_VERSION..=CURRENT_VERSION).contains(&self.version) {
            return Err(BucketJoinError::invalid_metadata(format!(
                "unsupported metadata version {} (supported: {}..={})",
                self.version, MIN_MIGRATABLE_VERSION, CURRENT_VERSION
            )));
        }
        if self.num_buckets == 0 || !self.num_buckets.is_power_of_two() {
            return Err(BucketJoinError::invalid_metadata(format!(
                "num_buckets must be a power of two >= 1, got {}",
                self.num_buckets
            )));
        }
        if self.num_buckets > MAX_BUCKETS {
            return Err(BucketJoinError::invalid_metadata(format!(
                "num_buckets {} exceeds maximum {}",
                self.num_buckets, MAX_BUCKETS
            )));
        }
        if self.num_shards == 0 || self.num_shards > MAX_SHARDS {
            return Err(BucketJoinError::invalid_metadata(format!(
                "num_shards must be in 1..={}, got {}",
                MAX_SHARDS, self.num_shards
            )));
        }
        if self.filename_prefix.is_empty()
            || self.filename_prefix.contains(['/', '\\'])
            || self.filename_prefix.starts_with('.')
        {
            return Err(BucketJoinError::invalid_metadata(format!(
                "invalid filename prefix '{}'",
                self.filename_prefix
            )));
        }
        if !self.key.coder.deterministic {
            return Err(BucketJoinError::invalid_metadata(format!(
                "primary key coder '{}' is not deterministic",
                self.key.coder.type_name
            )));
        }
        if let Some(secondary) = &self.secondary_key {
            if !secondary.coder.deterministic {
                return Err(BucketJoinError::invalid_metadata(format!(
                    "secondary key coder '{}' is not deterministic",
                    secondary.coder.type_name
                )));
            }
        }
        Ok(())
    }

    /// Upgrade an older document in memory.
    fn migrate(mut self) -> Self {
        // Version 0 had no key field names; serde already defaulted them.
        if self.version < CURRENT_VERSION {
            self.version = CURRENT_VERSION;
        }
        self
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn num_buckets(&self) -> u32 {
        self.num_buckets
    }

    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    pub fn hash_type(&self) -> HashType {
        self.hash_type
    }

    pub fn filename_prefix(&self) -> &str {
        &self.filename_prefix
    }

    pub fn key(&self) -> &KeyDescriptor {
        &self.key
    }

    pub fn secondary_key(&self) -> Option<&KeyDescriptor> {
        self.secondary_key.as_ref()
    }

    pub fn compatibility_key(&self) -> CompatibilityKey {
        CompatibilityKey {
            hash_type: self.hash_type,
            key_type: self.key.coder.type_name.clone(),
            secondary_key_type: self
                .secondary_key
                .as_ref()
                .map(|k| k.coder.type_name.clone()),
        }
    }

    /// Bucket of an encoded primary key.
    #[inline]
    pub fn bucket_for_key(&self, primary_key: &[u8]) -> u32 {
        self.hash_type.bucket(primary_key, self.num_buckets)
    }

    /// File name of one `(bucket, shard)` file, without directory.
    pub fn filename(&self, id: BucketShardId) -> String {
        format!(
            "{}-{:05}-of-{:05}-shard-{:05}-of-{:05}{}",
            self.filename_prefix,
            id.bucket_id,
            self.num_buckets,
            id.shard_id,
            self.num_shards,
            BUCKET_FILE_SUFFIX
        )
    }

    pub fn bucket_file_path(&self, dir: &Path, id: BucketShardId) -> PathBuf {
        dir.join(self.filename(id))
    }

    /// Every `(bucket, shard)` of the dataset, bucket-major.
    pub fn all_bucket_shards(&self) -> impl Iterator<Item = BucketShardId> + '_ {
        (0..self.num_buckets).flat_map(move |b| {
            (0..self.num_shards).map(move |s| BucketShardId::new(b, s))
        })
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Parse and validate a metadata document, migrating older versions.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let metadata: Self = toml::from_str(s)?;
        metadata.validate()?;
        Ok(metadata.migrate())
    }

    /// Publish metadata to a dataset directory.
    ///
    /// Writes and fsyncs a temporary file, then renames it, so a reader never
    /// observes a partially written document. The directory is synced before the
    /// rename (bucket file entries) and after it (the metadata entry).
    pub fn save(&self, dir: &Path) -> Result<()> {
        let tmp = dir.join(files::METADATA_TMP);
        let path = dir.join(files::METADATA);
        let toml_str = self.to_toml_string()?;

        let mut file = File::create(&tmp)
            .map_err(|e| BucketJoinError::io(tmp.clone(), "create metadata", e))?;
        file.write_all(toml_str.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| BucketJoinError::io(tmp.clone(), "write metadata", e))?;
        drop(file);

        sync_dir(dir)?;
        fs::rename(&tmp, &path)
            .map_err(|e| BucketJoinError::io(path.clone(), "publish metadata", e))?;
        sync_dir(dir)
    }

    /// Load metadata from a dataset directory.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(files::METADATA);
        let toml_str = fs::read_to_string(&path)
            .map_err(|e| BucketJoinError::io(path.clone(), "read metadata", e))?;
        Self::from_toml_str(&toml_str).map_err(|e| match e {
            BucketJoinError::InvalidMetadata(msg) => {
                BucketJoinError::invalid_metadata(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }
}

/// Flush directory entries to disk.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| BucketJoinError::io(dir.to_path_buf(), "sync dataset directory", e))
}

// Directories cannot be opened as files here; entries are flushed with the volume.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Check if a path is a bucketed dataset directory.
pub fn is_bucketed_dataset(path: &Path) -> bool {
    path.is_dir() && path.join(files::METADATA).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8_key() -> KeyDescriptor {
        KeyDescriptor::new("user_id", CoderDescriptor::deterministic("utf8"))
    }

    fn sample(num_buckets: u32, num_shards: u32) -> BucketMetadata {
        BucketMetadata::try_new(
            num_buckets,
            num_shards,
            HashType::Murmur3_32,
            "bucket",
            utf8_key(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_num_buckets_must_be_power_of_two() {
        for bad in [0, 3, 6, 100] {
            let err = BucketMetadata::try_new(
                bad,
                1,
                HashType::Murmur3_32,
                "bucket",
                utf8_key(),
                None,
            )
            .unwrap_err();
            assert!(matches!(err, BucketJoinError::InvalidMetadata(_)), "{}", bad);
        }
        for good in [1, 2, 4, 1024] {
            assert_eq!(sample(good, 1).num_buckets(), good);
        }
    }

    #[test]
    fn test_invalid_shards_and_prefix() {
        assert!(BucketMetadata::try_new(4, 0, HashType::Crc32, "b", utf8_key(), None).is_err());
        assert!(BucketMetadata::try_new(4, 1, HashType::Crc32, "", utf8_key(), None).is_err());
        assert!(
            BucketMetadata::try_new(4, 1, HashType::Crc32, "a/b", utf8_key(), None).is_err()
        );
    }

    #[test]
    fn test_non_deterministic_coder_rejected() {
        let key = KeyDescriptor::new(
            "payload",
            CoderDescriptor {
                type_name: "java-serialized".into(),
                deterministic: false,
            },
        );
        let err =
            BucketMetadata::try_new(4, 1, HashType::Murmur3_32, "bucket", key, None).unwrap_err();
        assert!(matches!(err, BucketJoinError::InvalidMetadata(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let metadata = BucketMetadata::try_new(
            16,
            3,
            HashType::Crc32,
            "events",
            utf8_key(),
            Some(KeyDescriptor::new(
                "ts",
                CoderDescriptor::deterministic("u64be"),
            )),
        )
        .unwrap();

        let text = metadata.to_toml_string().unwrap();
        let loaded = BucketMetadata::from_toml_str(&text).unwrap();
        assert_eq!(loaded, metadata);
    }

    #[test]
    fn test_save_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let metadata = sample(8, 2);
        metadata.save(tmp.path()).unwrap();

        assert!(is_bucketed_dataset(tmp.path()));
        assert!(!tmp.path().join(files::METADATA_TMP).exists());
        assert_eq!(BucketMetadata::load(tmp.path()).unwrap(), metadata);
    }

    #[test]
    fn test_save_replaces_existing_document() {
        let tmp = TempDir::new().unwrap();
        sample(8, 2).save(tmp.path()).unwrap();
        let newer = sample(16, 1);
        newer.save(tmp.path()).unwrap();

        assert!(!tmp.path().join(files::METADATA_TMP).exists());
        assert_eq!(BucketMetadata::load(tmp.path()).unwrap(), newer);
    }

    #[test]
    fn test_future_version_rejected() {
        let text = sample(4, 1)
            .to_toml_string()
            .unwrap()
            .replace("version = 1", "version = 99");
        let err = BucketMetadata::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, BucketJoinError::InvalidMetadata(_)));
    }

    #[test]
    fn test_version_zero_migrated() {
        let text = r#"
version = 0
num_buckets = 4
num_shards = 1
hash_type = "murmur3_32"
filename_prefix = "bucket"

[key.coder]
type_name = "utf8"
deterministic = true
"#;
        let metadata = BucketMetadata::from_toml_str(text).unwrap();
        assert_eq!(metadata.version(), CURRENT_VERSION);
        assert_eq!(metadata.key().field, "");
    }

    #[test]
    fn test_load_rejects_bad_bucket_count() {
        let tmp = TempDir::new().unwrap();
        let text = sample(4, 1)
            .to_toml_string()
            .unwrap()
            .replace("num_buckets = 4", "num_buckets = 3");
        fs::write(tmp.path().join(files::METADATA), text).unwrap();
        let err = BucketMetadata::load(tmp.path()).unwrap_err();
        assert!(matches!(err, BucketJoinError::InvalidMetadata(_)));
    }

    #[test]
    fn test_compatibility_key_ignores_shards_and_prefix() {
        let a = sample(4, 1);
        let b = BucketMetadata::try_new(4, 7, HashType::Murmur3_32, "other", utf8_key(), None)
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(a.compatibility_key(), b.compatibility_key());
    }

    #[test]
    fn test_filenames() {
        let metadata = sample(4, 2);
        assert_eq!(
            metadata.filename(BucketShardId::new(3, 1)),
            "bucket-00003-of-00004-shard-00001-of-00002.parquet"
        );
        let ids: Vec<_> = metadata.all_bucket_shards().collect();
        assert_eq!(ids.len(), 8);
        assert_eq!(ids[1], BucketShardId::new(0, 1));
        assert_eq!(ids[2], BucketShardId::new(1, 0));
    }
}
