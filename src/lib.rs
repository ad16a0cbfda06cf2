//! Sort-merge-bucket storage and shuffle-free joins.
//!
//! Datasets are written as `num_buckets × num_shards` Parquet files, each sorted by
//! key, plus a `metadata.toml` describing the partitioning. Datasets with compatible
//! metadata can then be joined bucket by bucket with a streaming N-way merge.
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use bucketjoin::{
//!     BucketAssigner, BucketMetadata, BucketedSource, HashType, KeyStrategy, ReadOptions,
//!     SortedBucketReader, SortedBucketWriter, StringCoder, Utf8RecordCoder, WriteOptions,
//! };
//!
//! # fn main() -> bucketjoin::Result<()> {
//! let keys = KeyStrategy::new("column:0", StringCoder, |line: &String| {
//!     line.split('\t').next().map(str::to_string)
//! })?;
//! let metadata = BucketMetadata::try_new(
//!     16, 1, HashType::Murmur3_32, "bucket", keys.primary_descriptor().clone(), None,
//! )?;
//! let writer = SortedBucketWriter::new(
//!     BucketAssigner::new(metadata, keys)?,
//!     Arc::new(Utf8RecordCoder),
//!     WriteOptions::default(),
//! )?;
//! writer.write(Path::new("users"), vec!["u1\talice".to_string()])?;
//!
//! let reader = SortedBucketReader::new(
//!     vec![BucketedSource::open(Path::new("users"))?, BucketedSource::open(Path::new("orders"))?],
//!     ReadOptions::default(),
//! )?;
//! let counts = reader.process_buckets(|_bucket, groups| Ok(groups.len()))?;
//! # let _ = counts;
//! # Ok(())
//! # }
//! ```

pub mod assign;
pub mod bucket_file;
pub mod cache;
pub mod compat;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod merge;
pub mod metadata;
pub mod reader;
pub mod writer;

pub use assign::{Assignment, BucketAssigner};
pub use bucket_file::{BucketFileCompression, BucketFileOptions, BucketFileReader};
pub use cache::MetadataCache;
pub use compat::{check_compatibility, plan_join, JoinPlan, KeyGrouping, TargetParallelism};
pub use error::{BucketJoinError, Result};
pub use merge::{
    CancellationToken, CoGroup, KeyedRecord, MergeJoin, RecordStream, RehashFilter, VecStream,
};
pub use metadata::{
    is_bucketed_dataset, probe_deterministic, BucketMetadata, BucketShardId, BytesCoder,
    BytesRecordCoder, CoderDescriptor, CompatibilityKey, HashType, I64Coder, KeyCoder,
    KeyDescriptor, KeyStrategy, RecordCoder, SortKey, StringCoder, U64Coder, Utf8RecordCoder,
};
pub use reader::{BucketedSource, ReadOptions, SortedBucketReader};
pub use writer::{BucketFileInfo, SortedBucketWriter, WriteOptions, WriteResult};
