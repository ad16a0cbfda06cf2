//! Sorted bucket writer.
//!
//! Partitions records into `(bucket, shard)` groups, sorts each group by key and
//! writes one Parquet file per group. The metadata document is published only after
//! every data file has been closed.

use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::assign::BucketAssigner;
use crate::bucket_file::{write_bucket_file, BucketFileOptions};
use crate::error::{BucketJoinError, Result};
use crate::merge::KeyedRecord;
use crate::metadata::{files, BucketMetadata, BucketShardId, RecordCoder};

/// Options for one write job.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Abort with `KeyExtraction` once more than this many records lack a key.
    /// `None` never aborts.
    pub max_key_failures: Option<usize>,

    /// Parquet settings for the bucket files.
    pub file: BucketFileOptions,
}

impl WriteOptions {
    pub fn validate(&self) -> Result<()> {
        self.file.validate()
    }
}

/// One written bucket file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketFileInfo {
    pub id: BucketShardId,
    pub path: PathBuf,
    pub records: u64,
}

/// Outcome of a write job.
#[derive(Debug)]
pub struct WriteResult<R> {
    pub metadata: Arc<BucketMetadata>,
    /// Every file of the dataset, bucket-major.
    pub files: Vec<BucketFileInfo>,
    /// Side output: records without a derivable key, in input order.
    pub failed_records: Vec<R>,
    pub records_written: u64,
}

impl<R> WriteResult<R> {
    pub fn failed_count(&self) -> usize {
        self.failed_records.len()
    }

    /// Number of files holding at least one record.
    pub fn populated_files(&self) -> usize {
        self.files.iter().filter(|f| f.records > 0).count()
    }
}

/// Writes a bucketed dataset.
pub struct SortedBucketWriter<R> {
    assigner: BucketAssigner<R>,
    coder: Arc<dyn RecordCoder<R>>,
    options: WriteOptions,
}

impl<R> SortedBucketWriter<R> {
    pub fn new(
        assigner: BucketAssigner<R>,
        coder: Arc<dyn RecordCoder<R>>,
        options: WriteOptions,
    ) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            assigner,
            coder,
            options,
        })
    }

    pub fn metadata(&self) -> &Arc<BucketMetadata> {
        self.assigner.metadata()
    }

    /// Partition, sort and write `records` into `dir`.
    ///
    /// Rewriting the same input into the same directory produces byte-identical
    /// bucket files. Any previous metadata document is removed first, so an
    /// interrupted rewrite never looks like a complete dataset.
    pub fn write(
        &self,
        dir: &Path,
        records: impl IntoIterator<Item = R>,
    ) -> Result<WriteResult<R>> {
        let start = Instant::now();
        let metadata = Arc::clone(self.assigner.metadata());

        fs::create_dir_all(dir)
            .map_err(|e| BucketJoinError::io(dir.to_path_buf(), "create dataset directory", e))?;
        let metadata_path = dir.join(files::METADATA);
        if metadata_path.exists() {
            fs::remove_file(&metadata_path).map_err(|e| {
                BucketJoinError::io(metadata_path.clone(), "remove stale metadata", e)
            })?;
        }

        let (mut groups, failed_records) = self.partition(records)?;
        if !failed_records.is_empty() {
            log::warn!(
                "{} records without a key routed to side output",
                failed_records.len()
            );
        }

        // Every (bucket, shard) gets a file, populated or not.
        let work: Vec<(BucketShardId, Vec<KeyedRecord>)> = metadata
            .all_bucket_shards()
            .map(|id| (id, groups.remove(&id).unwrap_or_default()))
            .collect();

        let file_opts = &self.options.file;
        let results: Result<Vec<BucketFileInfo>> = work
            .into_par_iter()
            .map(|(id, mut group)| {
                // Stable: records with equal keys keep input order.
                group.sort_by(|a, b| a.key.cmp(&b.key));
                let path = metadata.bucket_file_path(dir, id);
                let records = write_bucket_file(&path, &group, file_opts)?;
                log::debug!(
                    "Wrote bucket {} shard {}: {} records",
                    id.bucket_id,
                    id.shard_id,
                    records
                );
                Ok(BucketFileInfo { id, path, records })
            })
            .collect();
        let files = results?;

        metadata.save(dir)?;

        let records_written = files.iter().map(|f| f.records).sum();
        log::info!(
            "Wrote {} records into {} files ({} buckets x {} shards) in {:.2}s",
            records_written,
            files.len(),
            metadata.num_buckets(),
            metadata.num_shards(),
            start.elapsed().as_secs_f64()
        );

        Ok(WriteResult {
            metadata,
            files,
            failed_records,
            records_written,
        })
    }

    /// Assign and encode every record; collect the ones without a key.
    fn partition(
        &self,
        records: impl IntoIterator<Item = R>,
    ) -> Result<(HashMap<BucketShardId, Vec<KeyedRecord>>, Vec<R>)> {
        let mut groups: HashMap<BucketShardId, Vec<KeyedRecord>> = HashMap::new();
        let mut failed = Vec::new();

        for record in records {
            match self.assigner.assign(&record) {
                Some(assignment) => {
                    let value = self.coder.encode(&record)?;
                    groups
                        .entry(assignment.id)
                        .or_default()
                        .push(KeyedRecord::new(assignment.key, value));
                }
                None => {
                    failed.push(record);
                    if let Some(threshold) = self.options.max_key_failures {
                        if failed.len() > threshold {
                            return Err(BucketJoinError::KeyExtraction {
                                failures: failed.len(),
                                threshold,
                            });
                        }
                    }
                }
            }
        }
        Ok((groups, failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket_file::BucketFileReader;
    use crate::merge::RecordStream;
    use crate::metadata::{HashType, KeyStrategy, StringCoder, Utf8RecordCoder};
    use tempfile::TempDir;

    fn writer(num_buckets: u32, num_shards: u32, max_failures: Option<usize>) -> SortedBucketWriter<String> {
        let keys = KeyStrategy::new("column:0", StringCoder, |line: &String| {
            line.split(',').next().filter(|k| !k.is_empty()).map(str::to_string)
        })
        .unwrap();
        let metadata = BucketMetadata::try_new(
            num_buckets,
            num_shards,
            HashType::Murmur3_32,
            "bucket",
            keys.primary_descriptor().clone(),
            None,
        )
        .unwrap();
        SortedBucketWriter::new(
            BucketAssigner::new(metadata, keys).unwrap(),
            Arc::new(Utf8RecordCoder),
            WriteOptions {
                max_key_failures: max_failures,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_every_file_written_and_sorted() {
        let tmp = TempDir::new().unwrap();
        let w = writer(4, 2, None);
        let lines: Vec<String> = (0..100).rev().map(|i| format!("k{},{}", i % 37, i)).collect();
        let result = w.write(tmp.path(), lines).unwrap();

        assert_eq!(result.files.len(), 8);
        assert_eq!(result.records_written, 100);
        assert!(tmp.path().join(files::METADATA).exists());

        for info in &result.files {
            assert!(info.path.exists());
            let mut reader = BucketFileReader::open(&info.path).unwrap();
            let mut last = None;
            let mut n = 0;
            while let Some(r) = reader.next_record().unwrap() {
                assert_eq!(w.metadata().bucket_for_key(&r.key.primary), info.id.bucket_id);
                if let Some(prev) = &last {
                    assert!(*prev <= r.key);
                }
                last = Some(r.key);
                n += 1;
            }
            assert_eq!(n, info.records);
        }
    }

    #[test]
    fn test_side_output_and_threshold() {
        let tmp = TempDir::new().unwrap();
        let lines = vec![
            "a,1".to_string(),
            ",no key".to_string(),
            "b,2".to_string(),
            ",also none".to_string(),
        ];

        let result = writer(2, 1, Some(2)).write(tmp.path(), lines.clone()).unwrap();
        assert_eq!(result.failed_records, vec![",no key".to_string(), ",also none".to_string()]);
        assert_eq!(result.records_written, 2);

        let err = writer(2, 1, Some(1)).write(tmp.path(), lines).unwrap_err();
        assert!(matches!(
            err,
            BucketJoinError::KeyExtraction {
                failures: 2,
                threshold: 1
            }
        ));
        // Aborted job leaves no metadata behind.
        assert!(!tmp.path().join(files::METADATA).exists());
    }

    #[test]
    fn test_rewrite_is_byte_identical() {
        let tmp_a = TempDir::new().unwrap();
        let tmp_b = TempDir::new().unwrap();
        let lines: Vec<String> = (0..50).map(|i| format!("u{},{}", i % 7, i)).collect();

        let w = writer(4, 1, None);
        let a = w.write(tmp_a.path(), lines.clone()).unwrap();
        w.write(tmp_b.path(), lines).unwrap();

        for info in &a.files {
            let other = tmp_b.path().join(info.path.file_name().unwrap());
            assert_eq!(fs::read(&info.path).unwrap(), fs::read(other).unwrap());
        }
    }
}
