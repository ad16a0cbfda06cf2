//! Sorted bucket reader: opens the bucket files of every source for one target
//! bucket and merges them.

use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::bucket_file::BucketFileReader;
use crate::cache::MetadataCache;
use crate::compat::{plan_join, JoinPlan, KeyGrouping, TargetParallelism};
use crate::constants::DEFAULT_READ_BATCH_SIZE;
use crate::error::{BucketJoinError, Result};
use crate::merge::{
    CancellationToken, CheckedStream, CoGroup, MergeJoin, RecordStream, RehashFilter, ShardMerge,
};
use crate::metadata::{BucketMetadata, BucketShardId};

/// One bucketed dataset taking part in a join.
#[derive(Debug, Clone)]
pub struct BucketedSource {
    label: String,
    dir: PathBuf,
    metadata: Arc<BucketMetadata>,
}

impl BucketedSource {
    /// Load the metadata of `dir`. The label defaults to the directory name.
    pub fn open(dir: &Path) -> Result<Self> {
        let metadata = Arc::new(BucketMetadata::load(dir)?);
        Ok(Self::with_metadata(dir, metadata))
    }

    /// Like [`BucketedSource::open`], sharing metadata through `cache`.
    pub fn open_cached(dir: &Path, cache: &MetadataCache) -> Result<Self> {
        let metadata = cache.get_or_load(dir)?;
        Ok(Self::with_metadata(dir, metadata))
    }

    pub fn with_metadata(dir: &Path, metadata: Arc<BucketMetadata>) -> Self {
        let label = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        Self {
            label,
            dir: dir.to_path_buf(),
            metadata,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metadata(&self) -> &Arc<BucketMetadata> {
        &self.metadata
    }
}

/// Options for reading and merging.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Rows decoded per Parquet batch. Default: 8,192.
    pub batch_size: usize,
    pub grouping: KeyGrouping,
    pub parallelism: TargetParallelism,
    pub cancel: Option<CancellationToken>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_READ_BATCH_SIZE,
            grouping: KeyGrouping::Primary,
            parallelism: TargetParallelism::Max,
            cancel: None,
        }
    }
}

/// Joins N bucketed sources bucket by bucket.
///
/// Construction checks compatibility on metadata alone; no bucket file is opened
/// until a bucket is read.
#[derive(Debug)]
pub struct SortedBucketReader {
    sources: Vec<BucketedSource>,
    plan: JoinPlan,
    options: ReadOptions,
}

impl SortedBucketReader {
    pub fn new(sources: Vec<BucketedSource>, options: ReadOptions) -> Result<Self> {
        let metadata: Vec<&BucketMetadata> = sources.iter().map(|s| s.metadata.as_ref()).collect();
        let plan = plan_join(&metadata, options.grouping, options.parallelism)?;
        Ok(Self {
            sources,
            plan,
            options,
        })
    }

    pub fn plan(&self) -> &JoinPlan {
        &self.plan
    }

    pub fn sources(&self) -> &[BucketedSource] {
        &self.sources
    }

    pub fn num_target_buckets(&self) -> u32 {
        self.plan.target_buckets()
    }

    /// Open every file feeding target bucket `target` and return the merge.
    ///
    /// Fails with `MissingBucketFile` if any expected file is absent or unreadable.
    pub fn open_bucket(&self, target: u32) -> Result<MergeJoin> {
        if target >= self.plan.target_buckets() {
            return Err(BucketJoinError::unsupported(format!(
                "target bucket {} out of range 0..{}",
                target,
                self.plan.target_buckets()
            )));
        }

        let mut streams: Vec<Box<dyn RecordStream>> = Vec::with_capacity(self.sources.len());
        for (i, source) in self.sources.iter().enumerate() {
            let metadata = &source.metadata;
            let mut files: Vec<Box<dyn RecordStream>> = Vec::new();
            let buckets = self.plan.source_buckets_for(i, target).ok_or_else(|| {
                BucketJoinError::unsupported(format!("join plan has no source {}", i))
            })?;
            for bucket in buckets {
                for shard in 0..metadata.num_shards() {
                    let path = metadata.bucket_file_path(&source.dir, BucketShardId::new(bucket, shard));
                    let reader = BucketFileReader::open_with_batch_size(&path, self.options.batch_size)?;
                    let label = path.display().to_string();
                    files.push(Box::new(CheckedStream::new(reader, label)));
                }
            }
            streams.push(Box::new(ShardMerge::new(source.label.clone(), files)));
        }

        let filter = self.plan.requires_rehash().then(|| RehashFilter {
            hash_type: self.plan.hash_type(),
            target_buckets: self.plan.target_buckets(),
            target,
        });

        let mut join = MergeJoin::new(streams, self.options.grouping).with_filter(filter);
        if let Some(token) = &self.options.cancel {
            join = join.with_cancellation(token.clone());
        }
        Ok(join)
    }

    /// Every co-group of one target bucket, or the first error.
    pub fn read_bucket(&self, target: u32) -> Result<Vec<CoGroup>> {
        self.open_bucket(target)?.collect()
    }

    /// Run `f` over every target bucket in parallel.
    ///
    /// Results are returned in bucket order. Each call receives a complete bucket;
    /// the first failing bucket fails the whole run.
    pub fn process_buckets<T, F>(&self, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(u32, Vec<CoGroup>) -> Result<T> + Sync + Send,
    {
        let start = Instant::now();
        let results: Result<Vec<T>> = (0..self.plan.target_buckets())
            .into_par_iter()
            .map(|target| {
                let groups = self.read_bucket(target)?;
                log::debug!("Bucket {}: {} co-groups", target, groups.len());
                f(target, groups)
            })
            .collect();
        let results = results?;
        log::info!(
            "Merged {} target buckets across {} sources in {:.2}s",
            self.plan.target_buckets(),
            self.sources.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(results)
    }

    /// Every co-group of the join, in bucket order then key order.
    pub fn read_all(&self) -> Result<Vec<CoGroup>> {
        let buckets = self.process_buckets(|_, groups| Ok(groups))?;
        Ok(buckets.into_iter().flatten().collect())
    }
}
