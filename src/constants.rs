//! Constants used throughout the bucketjoin library for safety limits, performance
//! tuning, and on-disk format definitions.
//!
//! Centralizing these constants ensures consistency across the codebase and makes
//! it easy to adjust values when needed.

// ============================================================================
// Metadata Format
// ============================================================================

/// Current metadata document version.
pub const CURRENT_VERSION: u32 = 1;

/// Oldest metadata version that can still be migrated on load.
pub(crate) const MIN_MIGRATABLE_VERSION: u32 = 0;

/// Default filename prefix for bucket files.
pub const DEFAULT_FILENAME_PREFIX: &str = "bucket";

/// Extension for bucket files.
pub const BUCKET_FILE_SUFFIX: &str = ".parquet";

// ============================================================================
// Safety Limits
// ============================================================================

/// Maximum number of buckets per dataset (2^20).
pub const MAX_BUCKETS: u32 = 1 << 20;

/// Maximum number of shards per bucket (2^16).
pub const MAX_SHARDS: u32 = 1 << 16;

// ============================================================================
// Hashing
// ============================================================================

/// Seed of the bucket hash. Zero keeps murmur3 output compatible with other
/// murmur3_32 implementations.
pub(crate) const BUCKET_HASH_SEED: u32 = 0;

/// Seed of the shard hash. Must differ from the bucket seed so that shard
/// assignment is independent of bucket assignment.
pub(crate) const SHARD_HASH_SEED: u32 = 0x9747_b28c;

// ============================================================================
// Parquet Tuning
// ============================================================================

/// Default rows per row group for bucket files.
pub const DEFAULT_ROW_GROUP_SIZE: usize = 64 * 1024;

/// Default number of rows decoded per batch when reading bucket files.
pub const DEFAULT_READ_BATCH_SIZE: usize = 8 * 1024;

/// Column names of a bucket file.
pub(crate) mod columns {
    pub const KEY: &str = "key";
    pub const SECONDARY_KEY: &str = "secondary_key";
    pub const VALUE: &str = "value";
}
